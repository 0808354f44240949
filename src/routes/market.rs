use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;
use crate::market::{self, Quote};

#[derive(Debug, Serialize)]
pub struct QuoteList {
    pub data: Vec<Quote>,
    pub count: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl QuoteList {
    fn new(kind: &'static str, data: Vec<Quote>) -> Self {
        Self {
            count: data.len(),
            data,
            kind,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MarketOverview {
    pub stocks: Vec<Quote>,
    pub bonds: Vec<Quote>,
    pub funds: Vec<Quote>,
}

pub async fn stocks(State(state): State<Arc<AppState>>) -> Json<QuoteList> {
    Json(QuoteList::new("stocks", state.market.stocks().await))
}

pub async fn bonds() -> Json<QuoteList> {
    Json(QuoteList::new("bonds", market::bonds()))
}

pub async fn funds() -> Json<QuoteList> {
    Json(QuoteList::new("funds", market::funds()))
}

pub async fn all(State(state): State<Arc<AppState>>) -> Json<MarketOverview> {
    Json(MarketOverview {
        stocks: state.market.stocks().await,
        bonds: market::bonds(),
        funds: market::funds(),
    })
}
