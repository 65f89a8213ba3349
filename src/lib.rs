pub mod billing;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ledger;
pub mod resolver;
pub mod routes;
pub mod tracker;
pub mod webhooks;

pub use routes::{api_routes, app, AppComponents};
