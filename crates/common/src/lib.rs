pub mod error;
pub mod models;

pub use error::{BundleErrorKind, Error, Result};
pub use models::{
    BundleRecord, BundleStatus, ControllerStatus, DeploymentState, ServiceRecord, ServiceStatus,
    UnitStatus,
};
