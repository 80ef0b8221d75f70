//! Bundle Service
//!
//! REST API deploying bundles of services on a remote orchestration
//! controller, recording which user owns which bundle, and reporting the
//! deployment status of every unit.

pub mod config;
pub mod controller;
pub mod handlers;
pub mod mock_controller;
pub mod models;
pub mod orchestrator;
pub mod redis_store;
pub mod service;
pub mod storage;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::{Config, ControllerMode, StorageMode};
pub use controller::{ControllerClient, ControllerConnector, RemoteController};
pub use handlers::AppState;
pub use mock_controller::MockController;
pub use orchestrator::Orchestrator;
pub use redis_store::RedisStore;
pub use service::BundleService;
pub use storage::{BundleStore, MemoryStore, Session};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            "/api/v1.0/{user_id}/services",
            post(handlers::deploy_bundle_handler).get(handlers::list_bundles_handler),
        )
        .route(
            "/api/v1.0/{user_id}/services/{bundle_id}",
            get(handlers::bundle_status_handler).delete(handlers::destroy_bundle_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
