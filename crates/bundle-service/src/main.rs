//! Bundle Service
//!
//! REST API for deploying and tracking bundles on a remote controller

use anyhow::{Context, Result};
use bundle_service::{
    create_router, AppState, BundleService, BundleStore, Config, ControllerClient,
    ControllerConnector, ControllerMode, MemoryStore, MockController, RedisStore, StorageMode,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bundle_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting Bundle Service");
    info!("Listening on {}", config.api_address());

    // Initialize storage
    let store: Arc<dyn BundleStore> = match config.storage_mode {
        StorageMode::Redis => {
            info!("Redis URL: {}", config.redis_url);
            let store = RedisStore::new(&config.redis_url)
                .await
                .context("Failed to initialize storage")?;
            Arc::new(store)
        }
        StorageMode::Memory => {
            warn!("Using in-memory storage, bundles are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize the controller connector
    let connector: Arc<dyn ControllerConnector> = match config.controller_mode {
        ControllerMode::Remote => {
            let address = config
                .controller_address
                .as_deref()
                .context("CONTROLLER_ADDRESS is not set")?;
            let token = config
                .controller_token
                .clone()
                .context("CONTROLLER_TOKEN is not set")?;
            let client = ControllerClient::new(
                address,
                config.controller_port,
                token,
                config.controller_timeout(),
            )
            .context("Failed to create the controller client")?;
            info!("Controller API: {}", client.base_url());
            Arc::new(client)
        }
        ControllerMode::Mock => {
            warn!("Using the mock controller, nothing is deployed");
            Arc::new(MockController::new())
        }
    };

    // Create application state
    let state = AppState {
        service: BundleService::new(connector, store),
    };

    // Create router
    let app = create_router(state);

    // Bind and serve
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Bundle Service running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
