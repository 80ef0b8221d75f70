//! Request cycle around the orchestration workflows
//!
//! Each call opens a controller connection and a store session, runs one
//! workflow, commits on success or rolls back on error, and closes the
//! controller connection on every path.

use bundle_common::{BundleStatus, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::controller::{ControllerConnector, RemoteController};
use crate::orchestrator::Orchestrator;
use crate::storage::{BundleStore, Session};

#[derive(Clone)]
pub struct BundleService {
    connector: Arc<dyn ControllerConnector>,
    store: Arc<dyn BundleStore>,
}

impl BundleService {
    pub fn new(connector: Arc<dyn ControllerConnector>, store: Arc<dyn BundleStore>) -> Self {
        Self { connector, store }
    }

    /// Deploy a bundle for a user and return its identifier.
    ///
    /// If the records cannot be committed after every service was deployed,
    /// the deployed services are destroyed again before the commit error is
    /// returned.
    pub async fn deploy(&self, user_id: &str, raw_bundle: &str) -> Result<String> {
        let controller = self.connector.connect().await?;
        let result = self.run_deploy(user_id, raw_bundle, controller.as_ref()).await;
        controller.close().await;
        result
    }

    pub async fn destroy(&self, user_id: &str, bundle_id: &str) -> Result<()> {
        let controller = self.connector.connect().await?;
        let result = self.run_destroy(user_id, bundle_id, controller.as_ref()).await;
        controller.close().await;
        result
    }

    pub async fn status(&self, user_id: &str, bundle_id: &str) -> Result<BundleStatus> {
        let controller = self.connector.connect().await?;
        let mut session = Session::new(self.store.clone());
        let result = Orchestrator::new(user_id, controller.as_ref(), &mut session)
            .bundle_status(bundle_id)
            .await;
        controller.close().await;
        result
    }

    /// Bundles owned by a user; the controller is not contacted
    pub async fn list_bundles(&self, user_id: &str) -> Result<Vec<String>> {
        Session::new(self.store.clone()).user_bundles(user_id).await
    }

    /// Environment information reported by the controller
    pub async fn controller_info(&self) -> Result<Value> {
        let controller = self.connector.connect().await?;
        let result = controller.info().await;
        controller.close().await;
        result
    }

    async fn run_deploy(
        &self,
        user_id: &str,
        raw_bundle: &str,
        controller: &dyn RemoteController,
    ) -> Result<String> {
        let mut session = Session::new(self.store.clone());
        let mut orchestrator = Orchestrator::new(user_id, controller, &mut session);
        let outcome = orchestrator.deploy_bundle(raw_bundle).await;
        let deployed = orchestrator.into_deployed();

        let bundle_id = match outcome {
            Ok(bundle_id) => bundle_id,
            Err(e) => {
                warn!("Deploy failed for user ({}): {}", user_id, e);
                session.rollback();
                return Err(e);
            }
        };

        if let Err(e) = session.commit().await {
            error!(
                "Failed to record bundle ({}), destroying its {} deployed service(s): {}",
                bundle_id,
                deployed.len(),
                e
            );
            compensate(controller, &deployed).await;
            return Err(e);
        }

        info!("Bundle ({}) deployed for user ({})", bundle_id, user_id);
        Ok(bundle_id)
    }

    async fn run_destroy(
        &self,
        user_id: &str,
        bundle_id: &str,
        controller: &dyn RemoteController,
    ) -> Result<()> {
        let mut session = Session::new(self.store.clone());
        let outcome = Orchestrator::new(user_id, controller, &mut session)
            .destroy_bundle(bundle_id)
            .await;

        if let Err(e) = outcome {
            warn!("Destroy of bundle ({}) failed: {}", bundle_id, e);
            session.rollback();
            return Err(e);
        }

        session.commit().await?;
        info!("Bundle ({}) destroyed", bundle_id);
        Ok(())
    }
}

/// Destroy services whose records could not be stored. Failures are logged
/// and do not stop the remaining services.
async fn compensate(controller: &dyn RemoteController, services: &[String]) {
    for service_name in services.iter().rev() {
        let machines = match controller.machines_for_service(service_name).await {
            Ok(machines) => machines,
            Err(e) => {
                error!("Failed to find machines of ({}): {}", service_name, e);
                Vec::new()
            }
        };

        if let Err(e) = controller.destroy_service(service_name).await {
            error!("Failed to destroy orphaned service ({}): {}", service_name, e);
            continue;
        }

        if !machines.is_empty() {
            if let Err(e) = controller.destroy_machines(&machines, true).await {
                error!(
                    "Failed to destroy machines ({}) of ({}): {}",
                    machines.join(", "),
                    service_name,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_controller::{ControllerCall, MockController, Operation};
    use crate::storage::MemoryStore;
    use bundle_common::{DeploymentState, Error};

    const BUNDLE: &str = r#"{
        "envExport": {
            "services": {
                "mysql": {"charm": "cs:precise/mysql-51", "num_units": 1},
                "wordpress": {"charm": "cs:precise/wordpress-20", "num_units": 2, "expose": true}
            },
            "relations": [["wordpress:db", "mysql:db"]]
        }
    }"#;

    fn service(mock: &MockController, store: &Arc<MemoryStore>) -> BundleService {
        BundleService::new(Arc::new(mock.clone()), store.clone())
    }

    #[tokio::test]
    async fn test_deploy_status_destroy_cycle() {
        let mock = MockController::new();
        let store = Arc::new(MemoryStore::new());
        let service = service(&mock, &store);

        let bundle_id = service.deploy("7", BUNDLE).await.unwrap();
        assert_eq!(store.service_count().await, 2);
        assert_eq!(service.list_bundles("7").await.unwrap(), vec![bundle_id.clone()]);

        let status = service.status("7", &bundle_id).await.unwrap();
        assert_eq!(status.status, DeploymentState::Started);

        service.destroy("7", &bundle_id).await.unwrap();
        assert_eq!(store.bundle_count().await, 0);
        assert!(mock.deployed_services().await.is_empty());

        let result = service.status("7", &bundle_id).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_relation_to_undefined_service_fails_remotely() {
        let raw = r#"{
            "envExport": {
                "services": {
                    "mysql": {"charm": "cs:precise/mysql-27", "num_units": 1},
                    "wordpress": {"charm": "cs:precise/wordpress-20", "num_units": 1}
                },
                "relations": [["wordpress:cache", "memcached:cache"]]
            }
        }"#;
        let mock = MockController::new();
        let store = Arc::new(MemoryStore::new());
        let service = service(&mock, &store);

        let result = service.deploy("7", raw).await;
        assert!(matches!(result, Err(Error::RemoteController { .. })));

        let calls = mock.calls().await;
        let relations = calls
            .iter()
            .filter(|c| matches!(c, ControllerCall::AddRelation(..)))
            .count();
        assert_eq!(relations, 1);
        assert_eq!(store.bundle_count().await, 0);
        assert_eq!(store.service_count().await, 0);
        assert!(service.list_bundles("7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_controller_closed_on_error() {
        let mock = MockController::new();
        let store = Arc::new(MemoryStore::new());
        let service = service(&mock, &store);

        let result = service.destroy("7", "a7missing").await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let calls = mock.calls().await;
        assert_eq!(calls, vec![ControllerCall::Connect, ControllerCall::Close]);
    }

    #[tokio::test]
    async fn test_remote_failure_rolls_back() {
        let mock = MockController::new();
        mock.fail_on(Operation::AddRelation, 0).await;
        let store = Arc::new(MemoryStore::new());
        let service = service(&mock, &store);

        let result = service.deploy("7", BUNDLE).await;
        assert!(matches!(result, Err(Error::RemoteController { .. })));
        assert_eq!(store.bundle_count().await, 0);

        // services stay on the controller, no compensation for remote failures
        assert_eq!(mock.deployed_services().await.len(), 2);
        assert_eq!(mock.calls().await.last(), Some(&ControllerCall::Close));
    }

    #[tokio::test]
    async fn test_commit_failure_destroys_deployed_services() {
        let mock = MockController::new();
        let store = Arc::new(MemoryStore::new());
        store.set_fail_commits(true);
        let service = service(&mock, &store);

        let result = service.deploy("7", BUNDLE).await;
        assert!(matches!(result, Err(Error::Storage(_))));

        assert!(mock.deployed_services().await.is_empty());
        assert!(mock.machines().await.is_empty());
        assert_eq!(store.bundle_count().await, 0);

        let calls = mock.calls().await;
        let destroyed = calls
            .iter()
            .filter(|c| matches!(c, ControllerCall::DestroyService(_)))
            .count();
        assert_eq!(destroyed, 2);
        assert_eq!(calls.last(), Some(&ControllerCall::Close));
    }

    #[tokio::test]
    async fn test_compensation_continues_after_failures() {
        let mock = MockController::new();
        mock.fail_on(Operation::DestroyService, 0).await;
        let store = Arc::new(MemoryStore::new());
        store.set_fail_commits(true);
        let service = service(&mock, &store);

        let result = service.deploy("7", BUNDLE).await;
        assert!(matches!(result, Err(Error::Storage(_))));

        let calls = mock.calls().await;
        let attempts = calls
            .iter()
            .filter(|c| matches!(c, ControllerCall::DestroyService(_)))
            .count();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        let mock = MockController::new();
        mock.fail_on(Operation::Connect, 0).await;
        let store = Arc::new(MemoryStore::new());
        let service = service(&mock, &store);

        let result = service.deploy("7", BUNDLE).await;
        assert!(matches!(result, Err(Error::RemoteController { .. })));
        assert!(service.controller_info().await.is_err());
        assert_eq!(store.bundle_count().await, 0);
    }

    #[tokio::test]
    async fn test_controller_info() {
        let mock = MockController::new();
        let store = Arc::new(MemoryStore::new());
        let info = service(&mock, &store).controller_info().await.unwrap();
        assert_eq!(info["provider"], "mock");
    }
}
