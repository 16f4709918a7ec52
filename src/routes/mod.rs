pub mod health;
pub mod products;

use axum::Router;

use crate::db::DbPool;
use crate::services::queue::Producer;

/// Stato condiviso delle route del producer
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub producer: Producer,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router(state.producer.queue().name().to_string()))
        .merge(products::router(state))
}
