pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::ports::SettlementRepository;

#[derive(Clone)]
pub struct AppState {
    pub settlements: Arc<dyn SettlementRepository>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/settlements", get(handlers::settlements::list_settlements))
        .route("/settlements/:id", get(handlers::settlements::get_settlement))
        .with_state(state)
}
