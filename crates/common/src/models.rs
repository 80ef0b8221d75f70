//! Records shared between the parser, the orchestration core and the stores

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Persisted bundle, owned by exactly one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    /// Generated bundle identifier (primary key)
    pub bundle_id: String,

    /// User that deployed the bundle
    pub owner_user_id: String,

    /// Original document, serialized verbatim
    pub raw_data: String,
}

impl BundleRecord {
    pub fn new(bundle_id: String, owner_user_id: String, raw_data: String) -> Self {
        Self {
            bundle_id,
            owner_user_id,
            raw_data,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id
    }
}

/// Persisted service of a bundle; never mutated after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Bundle-qualified service name
    pub service_id: String,

    pub bundle_id: String,

    pub num_units: u32,
}

impl ServiceRecord {
    pub fn new(service_id: String, bundle_id: String, num_units: u32) -> Self {
        Self {
            service_id,
            bundle_id,
            num_units,
        }
    }
}

/// Full status snapshot reported by the remote controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    #[serde(rename = "Services", default)]
    pub services: HashMap<String, ServiceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Units keyed by unit name (`service/0`, `service/1`, ...)
    #[serde(rename = "Units", default)]
    pub units: BTreeMap<String, UnitStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    #[serde(rename = "AgentState")]
    pub agent_state: String,

    #[serde(rename = "Machine")]
    pub machine: String,
}

impl UnitStatus {
    pub const STARTED: &'static str = "started";

    pub fn is_started(&self) -> bool {
        self.agent_state == Self::STARTED
    }
}

impl ControllerStatus {
    /// Machines hosting the units of a service, without duplicates
    pub fn machines_for(&self, service_name: &str) -> Vec<String> {
        let mut machines: Vec<String> = Vec::new();
        if let Some(service) = self.services.get(service_name) {
            for unit in service.units.values() {
                if !machines.contains(&unit.machine) {
                    machines.push(unit.machine.clone());
                }
            }
        }
        machines
    }
}

/// Aggregated state of a deployed bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentState {
    Started,
    Pending,
}

/// Result of the status workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStatus {
    pub bundle_id: String,

    pub status: DeploymentState,

    /// `unit: state` for every unit that is not started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub information: Option<Vec<String>>,
}

impl BundleStatus {
    pub fn started(bundle_id: String) -> Self {
        Self {
            bundle_id,
            status: DeploymentState::Started,
            information: None,
        }
    }

    pub fn pending(bundle_id: String, information: Vec<String>) -> Self {
        Self {
            bundle_id,
            status: DeploymentState::Pending,
            information: Some(information),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_status_from_snapshot() {
        let json = r#"{
            "Services": {
                "a1mysql": {
                    "Units": {
                        "a1mysql/0": {"AgentState": "started", "Machine": "1"},
                        "a1mysql/1": {"AgentState": "pending", "Machine": "1"},
                        "a1mysql/2": {"AgentState": "started", "Machine": "2"}
                    }
                }
            }
        }"#;

        let status: ControllerStatus = serde_json::from_str(json).unwrap();
        let units = &status.services["a1mysql"].units;
        assert_eq!(units.len(), 3);
        assert!(units["a1mysql/0"].is_started());
        assert!(!units["a1mysql/1"].is_started());

        assert_eq!(status.machines_for("a1mysql"), vec!["1", "2"]);
        assert!(status.machines_for("unknown").is_empty());
    }

    #[test]
    fn test_started_status_omits_information() {
        let status = BundleStatus::started("a1".to_string());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "Started");
        assert!(json.get("information").is_none());

        let pending = BundleStatus::pending("a1".to_string(), vec!["a1mysql/0: error".into()]);
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["status"], "Pending");
        assert_eq!(json["information"][0], "a1mysql/0: error");
    }
}
