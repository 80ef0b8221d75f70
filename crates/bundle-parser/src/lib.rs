//! Bundle parser
//!
//! Validates declarative bundle documents (services, unit counts, exposure
//! flags and relations), renames services consistently across relation
//! endpoints, and generates bundle identifiers.

pub mod bundle;
pub mod ids;
pub mod parser;

pub use bundle::{Relation, ServiceSpec};
pub use ids::{generate_bundle_id, service_id, IdGenerator};
pub use parser::{endpoint_service, BundleParser};
