//! Article extraction from HTML listing pages and RSS/Atom feeds.

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::config::Selectors;

/// An article pulled out of a source page, not yet stored
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedArticle {
    pub title: String,
    pub url: String,
    pub description: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Resolve `href` against `base`, dropping the fragment. Only http(s) links survive.
pub fn canonical_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let mut url = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);
    Some(url.to_string())
}

/// Collapse runs of whitespace into single spaces
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop markup from a feed summary and tidy its whitespace
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    squash_whitespace(&text)
}

fn compile(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| anyhow::anyhow!("Invalid CSS selector '{}': {}", selector, e))
}

fn element_text(element: ElementRef<'_>) -> String {
    squash_whitespace(&element.text().collect::<String>())
}

fn image_of(item: ElementRef<'_>, selector: &Selector, base: &str) -> Option<String> {
    let img = item.select(selector).next()?;
    ["src", "data-src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .find_map(|value| canonical_url(base, value))
}

/// Extract up to `limit` articles from an HTML listing page.
///
/// Items without a title or without an http(s) link are skipped, and only the
/// first `limit` item elements are looked at.
pub fn parse_html(
    source_url: &str,
    html: &str,
    selectors: &Selectors,
    limit: usize,
) -> anyhow::Result<Vec<ScrapedArticle>> {
    let item_selector = compile(&selectors.item)?;
    let title_selector = compile(&selectors.title)?;
    let description_selector = compile(&selectors.description)?;
    let image_selector = compile(&selectors.image)?;

    let document = Html::parse_document(html);
    let mut articles = Vec::new();

    for item in document.select(&item_selector).take(limit) {
        let Some(title_element) = item.select(&title_selector).next() else {
            continue;
        };

        let title = element_text(title_element);
        if title.is_empty() {
            continue;
        }

        let Some(url) = title_element
            .value()
            .attr("href")
            .and_then(|href| canonical_url(source_url, href))
        else {
            debug!("Skipping '{}' without a usable link", title);
            continue;
        };

        let description = item
            .select(&description_selector)
            .next()
            .map(element_text)
            .unwrap_or_default();

        articles.push(ScrapedArticle {
            title,
            url,
            description,
            image_url: image_of(item, &image_selector, source_url),
            tags: Vec::new(),
            published_at: None,
        });
    }

    Ok(articles)
}

/// Extract up to `limit` articles from an RSS or Atom document
pub fn parse_feed(bytes: &[u8], limit: usize) -> anyhow::Result<Vec<ScrapedArticle>> {
    let feed = parser::parse(bytes)?;
    let mut articles = Vec::new();

    for entry in feed.entries.into_iter().take(limit) {
        let title = entry
            .title
            .as_ref()
            .map(|t| squash_whitespace(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let Some(url) = entry
            .links
            .first()
            .and_then(|l| canonical_url(&l.href, &l.href))
        else {
            debug!("Skipping feed entry with no link: {}", title);
            continue;
        };

        let description = entry
            .summary
            .as_ref()
            .map(|s| strip_html(&s.content))
            .unwrap_or_default();

        let image_url = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|c| c.url.as_ref().map(|u| u.to_string()))
            .chain(
                entry
                    .media
                    .iter()
                    .flat_map(|m| m.thumbnails.iter())
                    .map(|t| t.image.uri.clone()),
            )
            .next();

        let tags = entry
            .categories
            .iter()
            .map(|c| c.term.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        articles.push(ScrapedArticle {
            title,
            url,
            description,
            image_url,
            tags,
            published_at: entry.published.or(entry.updated),
        });
    }

    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod canonical_url_tests {
        use super::*;

        #[test]
        fn test_relative_link_is_resolved() {
            assert_eq!(
                canonical_url("https://cafef.vn/chung-khoan.chn", "/vn-index-tang-diem.chn"),
                Some("https://cafef.vn/vn-index-tang-diem.chn".to_string())
            );
        }

        #[test]
        fn test_fragment_is_dropped() {
            assert_eq!(
                canonical_url("https://a.vn/", "https://a.vn/tin/1#comments"),
                Some("https://a.vn/tin/1".to_string())
            );
        }

        #[test]
        fn test_non_http_links_are_rejected() {
            assert_eq!(canonical_url("https://a.vn/", "javascript:void(0)"), None);
            assert_eq!(canonical_url("https://a.vn/", "mailto:x@a.vn"), None);
            assert_eq!(canonical_url("https://a.vn/", "   "), None);
        }

        #[test]
        fn test_bad_base_with_relative_link() {
            assert_eq!(canonical_url("not a url", "/path"), None);
        }
    }

    mod strip_html_tests {
        use super::*;

        #[test]
        fn test_markup_removed() {
            assert_eq!(
                strip_html("<p>VN-Index <b>tăng</b>\n\n  mạnh</p>"),
                "VN-Index tăng mạnh"
            );
        }

        #[test]
        fn test_plain_text_untouched() {
            assert_eq!(strip_html("Khối ngoại mua ròng"), "Khối ngoại mua ròng");
        }
    }

    mod parse_html_tests {
        use super::*;

        const LISTING: &str = r#"
            <html><body>
              <div class="box-category-item">
                <h3><a href="/co-phieu-ngan-hang.chn">  Cổ phiếu ngân hàng   dẫn dắt </a></h3>
                <p class="sapo">Dòng tiền đổ mạnh vào nhóm ngân hàng.</p>
                <img data-src="/img/bank.jpg">
              </div>
              <div class="box-category-item">
                <h3><a href="javascript:void(0)">Quảng cáo</a></h3>
              </div>
              <div class="box-category-item">
                <h3><a href="https://cafef.vn/thep.chn"></a></h3>
              </div>
              <article>
                <h2><a href="https://cafef.vn/thep-tang-tran.chn#top">Cổ phiếu thép tăng trần</a></h2>
                <img src="https://img.cafef.vn/thep.png">
              </article>
            </body></html>
        "#;

        #[test]
        fn test_extracts_valid_items() {
            let articles =
                parse_html("https://cafef.vn/chung-khoan.chn", LISTING, &Selectors::default(), 15)
                    .unwrap();

            assert_eq!(articles.len(), 2);

            assert_eq!(articles[0].title, "Cổ phiếu ngân hàng dẫn dắt");
            assert_eq!(articles[0].url, "https://cafef.vn/co-phieu-ngan-hang.chn");
            assert_eq!(articles[0].description, "Dòng tiền đổ mạnh vào nhóm ngân hàng.");
            assert_eq!(
                articles[0].image_url.as_deref(),
                Some("https://cafef.vn/img/bank.jpg")
            );

            assert_eq!(articles[1].url, "https://cafef.vn/thep-tang-tran.chn");
            assert_eq!(articles[1].description, "");
            assert_eq!(
                articles[1].image_url.as_deref(),
                Some("https://img.cafef.vn/thep.png")
            );
        }

        #[test]
        fn test_limit_applies_to_item_elements() {
            let articles =
                parse_html("https://cafef.vn/", LISTING, &Selectors::default(), 1).unwrap();
            assert_eq!(articles.len(), 1);
        }

        #[test]
        fn test_custom_selectors() {
            let html = r#"
                <ul><li class="story"><span class="headline"><a href="/a">A</a></span></li></ul>
            "#;
            let selectors = Selectors {
                item: ".story".to_string(),
                title: ".headline a".to_string(),
                ..Selectors::default()
            };

            let articles = parse_html("https://ssi.com.vn/", html, &selectors, 10).unwrap();
            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].url, "https://ssi.com.vn/a");
            assert!(articles[0].image_url.is_none());
        }

        #[test]
        fn test_invalid_selector_is_an_error() {
            let selectors = Selectors {
                item: "[[[".to_string(),
                ..Selectors::default()
            };
            assert!(parse_html("https://a.vn/", "<html></html>", &selectors, 10).is_err());
        }

        #[test]
        fn test_image_source_preference() {
            let html = r#"
                <div class="box-category-item">
                  <h3><a href="/a.chn">Có cả src lẫn data-src</a></h3>
                  <img src="/img/real.jpg" data-src="/img/lazy.jpg">
                </div>
                <div class="box-category-item">
                  <h3><a href="/b.chn">Ảnh tải chậm</a></h3>
                  <img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=" data-src="/img/lazy-b.jpg">
                </div>
            "#;

            let articles =
                parse_html("https://cafef.vn/", html, &Selectors::default(), 10).unwrap();
            assert_eq!(articles.len(), 2);
            assert_eq!(
                articles[0].image_url.as_deref(),
                Some("https://cafef.vn/img/real.jpg")
            );
            assert_eq!(
                articles[1].image_url.as_deref(),
                Some("https://cafef.vn/img/lazy-b.jpg")
            );
        }

        #[test]
        fn test_page_without_items() {
            let articles =
                parse_html("https://a.vn/", "<html><body></body></html>", &Selectors::default(), 10)
                    .unwrap();
            assert!(articles.is_empty());
        }
    }

    mod parse_feed_tests {
        use super::*;

        const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0">
              <channel>
                <title>Chứng khoán</title>
                <link>https://vnexpress.net</link>
                <description>Tin chứng khoán</description>
                <item>
                  <title>VN-Index chinh phục mốc 1,300 điểm</title>
                  <link>https://vnexpress.net/vn-index-1300.html</link>
                  <guid>https://vnexpress.net/vn-index-1300.html</guid>
                  <description><![CDATA[<a href="x"><img src="y"></a>Thanh khoản <b>cao</b> kỷ lục]]></description>
                  <category>Chứng khoán</category>
                  <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                </item>
                <item>
                  <title>Tin không có liên kết</title>
                </item>
                <item>
                  <title>Khối ngoại mua ròng</title>
                  <link>https://vnexpress.net/khoi-ngoai.html</link>
                </item>
              </channel>
            </rss>
        "#;

        #[test]
        fn test_extracts_entries() {
            let articles = parse_feed(RSS.as_bytes(), 15).unwrap();

            assert_eq!(articles.len(), 2);
            assert_eq!(articles[0].title, "VN-Index chinh phục mốc 1,300 điểm");
            assert_eq!(articles[0].url, "https://vnexpress.net/vn-index-1300.html");
            assert_eq!(articles[0].description, "Thanh khoản cao kỷ lục");
            assert_eq!(articles[0].tags, vec!["Chứng khoán".to_string()]);
            assert_eq!(
                articles[0].published_at.map(|d| d.to_rfc3339()),
                Some("2024-12-09T12:00:00+00:00".to_string())
            );

            assert_eq!(articles[1].title, "Khối ngoại mua ròng");
            assert!(articles[1].published_at.is_none());
        }

        const MEDIA_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
              <channel>
                <title>Kinh doanh</title>
                <link>https://example.vn</link>
                <description>Tin kinh doanh</description>
                <item>
                  <title>Giá vàng lập đỉnh</title>
                  <link>https://example.vn/gia-vang.html</link>
                  <media:content url="https://img.example.vn/vang.jpg" medium="image"/>
                  <media:thumbnail url="https://img.example.vn/vang-thumb.jpg"/>
                </item>
                <item>
                  <title>Lãi suất tiết kiệm giảm</title>
                  <link>https://example.vn/lai-suat.html</link>
                  <media:thumbnail url="https://img.example.vn/lai-suat-thumb.jpg"/>
                </item>
              </channel>
            </rss>
        "#;

        const ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <title>Thị trường</title>
              <id>urn:thi-truong</id>
              <updated>2024-12-10T08:30:00Z</updated>
              <entry>
                <id>urn:thi-truong:1</id>
                <link href="https://example.vn/atom-1.html"/>
                <updated>2024-12-10T08:30:00Z</updated>
                <summary>Phiên sáng giằng co</summary>
              </entry>
            </feed>
        "#;

        #[test]
        fn test_media_content_then_thumbnail() {
            let articles = parse_feed(MEDIA_RSS.as_bytes(), 10).unwrap();
            assert_eq!(articles.len(), 2);
            assert_eq!(
                articles[0].image_url.as_deref(),
                Some("https://img.example.vn/vang.jpg")
            );
            assert_eq!(
                articles[1].image_url.as_deref(),
                Some("https://img.example.vn/lai-suat-thumb.jpg")
            );
        }

        #[test]
        fn test_atom_entry_defaults() {
            let articles = parse_feed(ATOM.as_bytes(), 10).unwrap();
            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].title, "Untitled");
            assert_eq!(articles[0].url, "https://example.vn/atom-1.html");
            assert_eq!(articles[0].description, "Phiên sáng giằng co");
            assert_eq!(
                articles[0].published_at.map(|d| d.to_rfc3339()),
                Some("2024-12-10T08:30:00+00:00".to_string())
            );
        }

        #[test]
        fn test_limit_applies_to_entries() {
            let articles = parse_feed(RSS.as_bytes(), 1).unwrap();
            assert_eq!(articles.len(), 1);
        }

        #[test]
        fn test_invalid_feed_is_an_error() {
            assert!(parse_feed(b"<html>not a feed</html>", 10).is_err());
        }
    }
}
