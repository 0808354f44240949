//! Display helpers shared by the JSON responses: relative times, abbreviated
//! trading volumes and page bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Human-readable age of `then` as seen from `now`.
///
/// Under an hour reports minutes, under a day hours, under a week days;
/// anything older falls back to the calendar date (`dd/mm/yyyy`).
/// Timestamps in the future count as zero minutes old.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - then).max(chrono::Duration::zero());
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 60 {
        format!("{} phút trước", minutes)
    } else if hours < 24 {
        format!("{} giờ trước", hours)
    } else if days < 7 {
        format!("{} ngày trước", days)
    } else {
        then.format("%d/%m/%Y").to_string()
    }
}

/// Trading volume shortened to one decimal with an `M` or `K` suffix.
pub fn abbreviate_volume(volume: u64) -> String {
    if volume >= 1_000_000 {
        format!("{:.1}M", volume as f64 / 1_000_000.0)
    } else if volume >= 1_000 {
        format!("{:.1}K", volume as f64 / 1_000.0)
    } else {
        volume.to_string()
    }
}

/// Keep a zero-based page index inside `0..total_pages`.
pub fn clamp_page(requested: i64, total_pages: i64) -> i64 {
    if total_pages <= 0 {
        return 0;
    }
    requested.clamp(0, total_pages - 1)
}

pub fn total_pages(total_elements: i64, size: i64) -> i64 {
    if size <= 0 {
        return 0;
    }
    (total_elements + size - 1) / size
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn size(&self) -> i64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Resolve the requested page against the number of matching rows,
    /// returning `(page, offset)`.
    pub fn resolve(&self, total_elements: i64) -> (i64, i64) {
        let size = self.size();
        let page = clamp_page(self.page, total_pages(total_elements, size));
        (page, page * size)
    }
}

/// One page of results, shaped the way the web client pages through them
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: i64,
    pub total_pages: i64,
    pub size: i64,
    pub number: i64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, number: i64, size: i64, total_elements: i64) -> Self {
        Self {
            content,
            total_elements,
            total_pages: total_pages(total_elements, size),
            size,
            number,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            size: self.size,
            number: self.number,
        }
    }
}
