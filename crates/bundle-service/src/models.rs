//! Request and response bodies of the HTTP API

use serde::{Deserialize, Serialize};

/// Response from a successful deploy
#[derive(Debug, Serialize, Deserialize)]
pub struct DeployBundleResponse {
    pub bundle_id: String,
}

/// Response from a successful destroy
#[derive(Debug, Serialize, Deserialize)]
pub struct DestroyBundleResponse {
    pub bundle_id: String,
    pub deleted: bool,
}

/// Bundles owned by a user
#[derive(Debug, Serialize, Deserialize)]
pub struct BundlesListResponse {
    pub user_id: String,
    pub bundles: Vec<String>,
    pub total: usize,
}

/// Error payload returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
