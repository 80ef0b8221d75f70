//! API request handlers for the bundle service

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bundle_common::{BundleStatus, Error};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{
    BundlesListResponse, DeployBundleResponse, DestroyBundleResponse, ErrorResponse,
};
use crate::service::BundleService;

/// Shared application state
pub struct AppState {
    pub service: BundleService,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            kind: self.kind.to_string(),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidBundle { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::RemoteController { .. } | Error::RemoteInconsistency(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", err);
        } else {
            warn!("Request rejected: {}", err);
        }

        ApiError {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let controller = match state.service.controller_info().await {
        Ok(info) => info,
        Err(e) => {
            warn!("Controller health check failed: {}", e);
            serde_json::Value::from("unreachable")
        }
    };

    Json(serde_json::json!({
        "status": "healthy",
        "service": "bundle-service",
        "controller": controller,
    }))
}

/// Deploy a bundle for a user. The body is the raw bundle document, kept as
/// text so the order of its services survives.
pub async fn deploy_bundle_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    body: String,
) -> Result<Json<DeployBundleResponse>, ApiError> {
    info!("Deploying bundle for user: {}", user_id);

    let bundle_id = state.service.deploy(&user_id, &body).await?;

    Ok(Json(DeployBundleResponse { bundle_id }))
}

/// List the bundles owned by a user
pub async fn list_bundles_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<BundlesListResponse>, ApiError> {
    info!("Listing bundles for user: {}", user_id);

    let bundles = state.service.list_bundles(&user_id).await?;
    let total = bundles.len();

    Ok(Json(BundlesListResponse {
        user_id,
        bundles,
        total,
    }))
}

/// Get the deployment status of a bundle
pub async fn bundle_status_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, bundle_id)): Path<(String, String)>,
) -> Result<Json<BundleStatus>, ApiError> {
    info!("Getting status of bundle ({}) for user: {}", bundle_id, user_id);

    let status = state.service.status(&user_id, &bundle_id).await?;

    Ok(Json(status))
}

/// Destroy a bundle and every service it deployed
pub async fn destroy_bundle_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, bundle_id)): Path<(String, String)>,
) -> Result<Json<DestroyBundleResponse>, ApiError> {
    info!("Destroying bundle ({}) for user: {}", bundle_id, user_id);

    state.service.destroy(&user_id, &bundle_id).await?;

    Ok(Json(DestroyBundleResponse {
        bundle_id,
        deleted: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundle_common::BundleErrorKind;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                Error::invalid_bundle(BundleErrorKind::Empty, "empty document"),
                StatusCode::BAD_REQUEST,
            ),
            (Error::NotFound("a1".to_string()), StatusCode::NOT_FOUND),
            (
                Error::Forbidden {
                    user_id: "2".to_string(),
                    bundle_id: "a1".to_string(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                Error::remote("Failed to deploy", "refused"),
                StatusCode::BAD_GATEWAY,
            ),
            (
                Error::RemoteInconsistency("gone".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                Error::Storage("down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let api_error = ApiError::from(err);
            assert_eq!(api_error.status, expected);
        }
    }

    #[test]
    fn test_error_kind_is_reported() {
        let api_error = ApiError::from(Error::NotFound("a1".to_string()));
        assert_eq!(api_error.kind, "not_found");
        assert!(api_error.message.contains("a1"));
    }
}
