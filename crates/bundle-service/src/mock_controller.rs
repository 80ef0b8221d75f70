//! Mock controller for development and testing
//!
//! Simulates the remote controller in process: deployed services, their
//! units and machines, relations, and a log of every call made. Failures can
//! be injected per operation.

use async_trait::async_trait;
use bundle_common::{ControllerStatus, Error, Result, ServiceStatus, UnitStatus};
use bundle_parser::endpoint_service;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::controller::{ControllerConnector, RemoteController};

/// Largest unit count the mock accepts for one service
pub const MAX_MOCK_UNITS: u32 = 64;

/// Controller operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Deploy,
    Expose,
    AddRelation,
    DestroyService,
    DestroyMachines,
    Status,
}

/// A call received by the mock controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Connect,
    Deploy {
        service_name: String,
        charm_name: String,
        num_units: u32,
    },
    Expose(String),
    AddRelation(String, String),
    DestroyService(String),
    DestroyMachines { machines: Vec<String>, force: bool },
    Status,
    ServiceConfig(String),
    Info,
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    services: HashMap<String, ServiceStatus>,
    relations: Vec<(String, String)>,
    machines: BTreeSet<String>,
    next_machine: u32,
    calls: Vec<ControllerCall>,
    /// Operation -> number of calls that still succeed before it starts failing
    failures: HashMap<Operation, usize>,
}

impl MockState {
    fn check(&mut self, operation: Operation) -> Result<()> {
        match self.failures.get_mut(&operation) {
            Some(0) => Err(Error::remote(
                format!("{:?} rejected by the controller", operation),
                "injected failure",
            )),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-process controller. Clones share the same simulated state.
#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    initial_agent_state: String,
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockController {
    /// Create a mock whose units report `started` as soon as they are deployed
    pub fn new() -> Self {
        Self::with_agent_state(UnitStatus::STARTED)
    }

    /// Create a mock whose new units report `agent_state`
    pub fn with_agent_state(agent_state: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            initial_agent_state: agent_state.to_string(),
        }
    }

    /// Make `operation` fail once `succeed_first` calls of it have succeeded
    pub async fn fail_on(&self, operation: Operation, succeed_first: usize) {
        self.state
            .lock()
            .await
            .failures
            .insert(operation, succeed_first);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Change the agent state reported by one unit
    pub async fn set_agent_state(&self, unit_name: &str, agent_state: &str) {
        let mut state = self.state.lock().await;
        for service in state.services.values_mut() {
            if let Some(unit) = service.units.get_mut(unit_name) {
                unit.agent_state = agent_state.to_string();
            }
        }
    }

    /// Drop a service from the simulated controller without any call
    pub async fn forget_service(&self, service_name: &str) {
        self.state.lock().await.services.remove(service_name);
    }

    pub async fn calls(&self) -> Vec<ControllerCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn deployed_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.services.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn relations(&self) -> Vec<(String, String)> {
        self.state.lock().await.relations.clone()
    }

    pub async fn machines(&self) -> Vec<String> {
        self.state.lock().await.machines.iter().cloned().collect()
    }
}

#[async_trait]
impl ControllerConnector for MockController {
    async fn connect(&self) -> Result<Box<dyn RemoteController>> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::Connect);
        state.check(Operation::Connect)?;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RemoteController for MockController {
    async fn deploy_service(
        &self,
        service_name: &str,
        charm_name: &str,
        num_units: u32,
    ) -> Result<Value> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::Deploy {
            service_name: service_name.to_string(),
            charm_name: charm_name.to_string(),
            num_units,
        });
        state.check(Operation::Deploy)?;

        if num_units > MAX_MOCK_UNITS {
            return Err(Error::remote(
                format!("Failed to deploy the service ({})", service_name),
                format!(
                    "{} units requested, the mock controller allows at most {}",
                    num_units, MAX_MOCK_UNITS
                ),
            ));
        }

        if state.services.contains_key(service_name) {
            return Err(Error::remote(
                format!("Failed to deploy the service ({})", service_name),
                "service already exists",
            ));
        }

        let mut service = ServiceStatus::default();
        for index in 0..num_units {
            state.next_machine += 1;
            let machine = state.next_machine.to_string();
            state.machines.insert(machine.clone());
            service.units.insert(
                format!("{}/{}", service_name, index),
                UnitStatus {
                    agent_state: self.initial_agent_state.clone(),
                    machine,
                },
            );
        }
        state.services.insert(service_name.to_string(), service);

        debug!("Mock controller: deployed ({}) with {} unit(s)", service_name, num_units);
        Ok(json!({ "service": service_name }))
    }

    async fn expose(&self, service_name: &str) -> Result<Value> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::Expose(service_name.to_string()));
        state.check(Operation::Expose)?;

        if !state.services.contains_key(service_name) {
            return Err(Error::remote(
                format!("Failed to expose the service ({})", service_name),
                "service not found",
            ));
        }
        Ok(Value::Null)
    }

    async fn add_relation(&self, endpoint_a: &str, endpoint_b: &str) -> Result<Value> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::AddRelation(
            endpoint_a.to_string(),
            endpoint_b.to_string(),
        ));
        state.check(Operation::AddRelation)?;

        for endpoint in [endpoint_a, endpoint_b] {
            if !state.services.contains_key(endpoint_service(endpoint)) {
                return Err(Error::remote(
                    format!("Failed to add the relation ({}, {})", endpoint_a, endpoint_b),
                    format!("service for endpoint ({}) not found", endpoint),
                ));
            }
        }

        state
            .relations
            .push((endpoint_a.to_string(), endpoint_b.to_string()));
        Ok(Value::Null)
    }

    async fn destroy_service(&self, service_name: &str) -> Result<Value> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ControllerCall::DestroyService(service_name.to_string()));
        state.check(Operation::DestroyService)?;

        state.services.remove(service_name);
        state.relations.retain(|(a, b)| {
            endpoint_service(a) != service_name && endpoint_service(b) != service_name
        });
        Ok(Value::Null)
    }

    async fn machines_for_service(&self, service_name: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::Status);
        state.check(Operation::Status)?;

        let status = ControllerStatus {
            services: state.services.clone(),
        };
        Ok(status.machines_for(service_name))
    }

    async fn destroy_machines(&self, machines: &[String], force: bool) -> Result<Value> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::DestroyMachines {
            machines: machines.to_vec(),
            force,
        });
        state.check(Operation::DestroyMachines)?;

        for machine in machines {
            state.machines.remove(machine);
        }
        Ok(Value::Null)
    }

    async fn status(&self) -> Result<ControllerStatus> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::Status);
        state.check(Operation::Status)?;

        Ok(ControllerStatus {
            services: state.services.clone(),
        })
    }

    async fn service_config(&self, service_name: &str) -> Result<Value> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ControllerCall::ServiceConfig(service_name.to_string()));
        state.check(Operation::Status)?;

        match state.services.get(service_name) {
            Some(service) => Ok(json!({
                "service": service_name,
                "num_units": service.units.len(),
                "settings": {},
            })),
            None => Err(Error::remote(
                format!("Failed to get the configuration of the service ({})", service_name),
                "service not found",
            )),
        }
    }

    async fn info(&self) -> Result<Value> {
        let mut state = self.state.lock().await;
        state.calls.push(ControllerCall::Info);
        Ok(json!({
            "provider": "mock",
            "services": state.services.len(),
            "machines": state.machines.len(),
        }))
    }

    async fn close(&self) {
        self.state.lock().await.calls.push(ControllerCall::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_allocates_units_and_machines() {
        let mock = MockController::new();
        mock.deploy_service("a1mysql", "cs:mysql", 2).await.unwrap();

        let status = mock.status().await.unwrap();
        let units = &status.services["a1mysql"].units;
        assert_eq!(units.len(), 2);
        assert!(units["a1mysql/0"].is_started());
        assert_eq!(mock.machines().await, vec!["1", "2"]);
        assert_eq!(
            mock.machines_for_service("a1mysql").await.unwrap(),
            vec!["1", "2"]
        );
    }

    #[tokio::test]
    async fn test_relation_requires_known_services() {
        let mock = MockController::new();
        mock.deploy_service("a1mysql", "cs:mysql", 1).await.unwrap();

        let result = mock.add_relation("a1wordpress:db", "a1mysql:db").await;
        assert!(matches!(result, Err(Error::RemoteController { .. })));
        assert!(mock.relations().await.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_unknown_service_is_a_no_op() {
        let mock = MockController::new();
        mock.destroy_service("ghost").await.unwrap();
        assert!(mock.deployed_services().await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mock = MockController::new();
        mock.fail_on(Operation::Deploy, 1).await;

        mock.deploy_service("a1mysql", "cs:mysql", 1).await.unwrap();
        let second = mock.deploy_service("a1wordpress", "cs:wordpress", 1).await;
        assert!(matches!(second, Err(Error::RemoteController { .. })));

        mock.clear_failures().await;
        mock.deploy_service("a1wordpress", "cs:wordpress", 1).await.unwrap();
        assert_eq!(mock.deployed_services().await, vec!["a1mysql", "a1wordpress"]);
    }

    #[tokio::test]
    async fn test_unit_count_is_capped() {
        let mock = MockController::new();
        let result = mock
            .deploy_service("a1mysql", "cs:mysql", 4_000_000_000)
            .await;

        assert!(matches!(result, Err(Error::RemoteController { .. })));
        assert!(mock.deployed_services().await.is_empty());
        assert!(mock.machines().await.is_empty());

        mock.deploy_service("a1mysql", "cs:mysql", MAX_MOCK_UNITS)
            .await
            .unwrap();
        assert_eq!(mock.machines().await.len(), MAX_MOCK_UNITS as usize);
    }

    #[tokio::test]
    async fn test_service_config() {
        let mock = MockController::new();
        mock.deploy_service("a1mysql", "cs:mysql", 2).await.unwrap();

        let config = mock.service_config("a1mysql").await.unwrap();
        assert_eq!(config["service"], "a1mysql");
        assert_eq!(config["num_units"], 2);

        let missing = mock.service_config("a1ghost").await;
        assert!(matches!(missing, Err(Error::RemoteController { .. })));
    }

    #[tokio::test]
    async fn test_connect_shares_state() {
        let mock = MockController::new();
        let session = mock.connect().await.unwrap();
        session.deploy_service("a1mysql", "cs:mysql", 1).await.unwrap();
        session.close().await;

        assert_eq!(mock.deployed_services().await, vec!["a1mysql"]);
        let calls = mock.calls().await;
        assert_eq!(calls.first(), Some(&ControllerCall::Connect));
        assert_eq!(calls.last(), Some(&ControllerCall::Close));
    }
}
