//! Market News - Vietnamese stock-market news service
//!
//! Crawls financial news sites and feeds into SQLite, serves them through a
//! JSON API with accounts and subscription tiers, and notifies users when
//! new articles match their keyword alerts.

pub mod alerts;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod format;
pub mod market;
pub mod parse;
pub mod rate_limit;
pub mod routes;
