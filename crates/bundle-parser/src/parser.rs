//! Bundle parser and rename engine
//!
//! This module validates a raw bundle document once and then gives typed,
//! mutable access to its services and relations.

use crate::bundle::{BundleFile, Relation, ServiceSpec};
use anyhow::Context;
use bundle_common::{BundleErrorKind, Error, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// A parsed bundle document.
///
/// Every parser owns its own copy of the document; renames on one parser
/// never show up in another.
#[derive(Debug, Clone)]
pub struct BundleParser {
    name: String,
    services: Vec<(String, ServiceSpec)>,
    relations: Vec<Relation>,
}

impl BundleParser {
    /// Parse a bundle from a JSON string
    ///
    /// Services keep the order in which they appear in `json_str`.
    pub fn parse_str(json_str: &str) -> Result<Self> {
        if json_str.trim().is_empty() {
            return Err(Error::invalid_bundle(
                BundleErrorKind::Empty,
                "The bundle provided is empty",
            ));
        }

        let value: Value = serde_json::from_str(json_str).map_err(|e| {
            Error::invalid_bundle(BundleErrorKind::Malformed, format!("Invalid JSON: {}", e))
        })?;
        check_shape(&value)?;

        let file: BundleFile = serde_json::from_str(json_str).map_err(malformed)?;
        let bundle = Self::from_file(file);
        for (name, _) in &bundle.services {
            check_service_name(name)?;
        }
        Ok(bundle)
    }

    /// Parse a bundle from a JSON file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json_str = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read bundle file: {}", path.as_ref().display()))?;

        Self::parse_str(&json_str)
    }

    fn from_file(file: BundleFile) -> Self {
        let (name, config) = file.0.into_iter().next().unwrap_or_default();
        Self {
            name,
            services: config.services,
            relations: config.relations,
        }
    }

    /// Name of the top-level entry (e.g. `envExport`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current service names, in document order
    pub fn list_services(&self) -> Vec<String> {
        self.services.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn service_exists(&self, service_name: &str) -> bool {
        self.position(service_name).is_some()
    }

    pub fn get_service(&self, service_name: &str) -> Result<&ServiceSpec> {
        self.lookup(service_name).ok_or_else(|| {
            Error::invalid_bundle(
                BundleErrorKind::UnknownService,
                format!("Unknown service ({}) requested in the bundle", service_name),
            )
        })
    }

    /// Unit count of a service; missing services count as missing the field
    pub fn number_of_units(&self, service_name: &str) -> Result<u32> {
        self.lookup(service_name)
            .and_then(|spec| spec.num_units)
            .ok_or_else(|| {
                Error::invalid_bundle(
                    BundleErrorKind::MissingField,
                    format!("No units provided for the service ({})", service_name),
                )
            })
    }

    /// Charm of a service; missing services count as missing the field
    pub fn charm_name(&self, service_name: &str) -> Result<&str> {
        self.lookup(service_name)
            .and_then(|spec| spec.charm.as_deref())
            .ok_or_else(|| {
                Error::invalid_bundle(
                    BundleErrorKind::MissingField,
                    format!("No charm provided for the service ({})", service_name),
                )
            })
    }

    /// Whether a service is exposed. Unknown services are simply not exposed.
    pub fn is_exposed(&self, service_name: &str) -> bool {
        self.lookup(service_name)
            .map(|spec| spec.expose)
            .unwrap_or(false)
    }

    /// Relations as currently stored, renames included
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Relation endpoints whose service is not defined in the bundle
    pub fn dangling_endpoints(&self) -> Vec<&str> {
        self.relations
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|endpoint| !self.service_exists(endpoint_service(endpoint)))
            .collect()
    }

    /// Rename a service and every relation endpoint that refers to it.
    ///
    /// `old` and `old:interface` endpoints become `new` and `new:interface`;
    /// endpoints of other services are left untouched. Nothing is modified
    /// when the rename fails.
    pub fn rename_service(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let index = self.position(old_name).ok_or_else(|| {
            Error::invalid_bundle(
                BundleErrorKind::UnknownService,
                format!("Unknown service ({}) requested in the bundle", old_name),
            )
        })?;

        if old_name == new_name {
            return Ok(());
        }

        check_service_name(new_name)?;

        if self.service_exists(new_name) {
            return Err(Error::invalid_bundle(
                BundleErrorKind::DuplicateService,
                format!(
                    "Cannot rename ({}) to ({}): the name is already used",
                    old_name, new_name
                ),
            ));
        }

        self.services[index].0 = new_name.to_string();

        let mut rewritten = 0usize;
        for relation in &mut self.relations {
            for endpoint in relation.iter_mut() {
                if let Some(renamed) = rename_endpoint(endpoint, old_name, new_name) {
                    *endpoint = renamed;
                    rewritten += 1;
                }
            }
        }

        debug!(
            "Renamed service ({}) to ({}), {} relation endpoint(s) rewritten",
            old_name, new_name, rewritten
        );

        Ok(())
    }

    fn position(&self, service_name: &str) -> Option<usize> {
        self.services.iter().position(|(name, _)| name == service_name)
    }

    fn lookup(&self, service_name: &str) -> Option<&ServiceSpec> {
        self.services
            .iter()
            .find(|(name, _)| name == service_name)
            .map(|(_, spec)| spec)
    }
}

/// Service part of a relation endpoint (`wordpress:db` -> `wordpress`)
pub fn endpoint_service(endpoint: &str) -> &str {
    endpoint
        .split_once(':')
        .map(|(service, _)| service)
        .unwrap_or(endpoint)
}

fn rename_endpoint(endpoint: &str, old_name: &str, new_name: &str) -> Option<String> {
    match endpoint.split_once(':') {
        Some((service, interface)) if service == old_name => {
            Some(format!("{}:{}", new_name, interface))
        }
        None if endpoint == old_name => Some(new_name.to_string()),
        _ => None,
    }
}

/// Check the document is one top-level entry holding a non-empty object
fn check_shape(value: &Value) -> Result<()> {
    let top = match value {
        Value::Null => {
            return Err(Error::invalid_bundle(
                BundleErrorKind::Empty,
                "The bundle provided is empty",
            ))
        }
        Value::Object(top) => top,
        _ => {
            return Err(Error::invalid_bundle(
                BundleErrorKind::Malformed,
                "The bundle provided is not a structured document",
            ))
        }
    };

    let mut entries = top.iter();
    let (name, config) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        (None, _) => {
            return Err(Error::invalid_bundle(
                BundleErrorKind::Empty,
                "The bundle provided is empty",
            ))
        }
        (Some(_), Some(_)) => {
            return Err(Error::invalid_bundle(
                BundleErrorKind::Malformed,
                format!(
                    "Expected a single top-level entry, found {}",
                    top.len()
                ),
            ))
        }
    };

    match config {
        Value::Object(config) if !config.is_empty() => Ok(()),
        Value::Object(_) | Value::Null => Err(Error::invalid_bundle(
            BundleErrorKind::Empty,
            format!("The bundle ({}) is incorrectly configured", name),
        )),
        _ => Err(Error::invalid_bundle(
            BundleErrorKind::Malformed,
            format!("The bundle ({}) configuration is not an object", name),
        )),
    }
}

/// Characters that would change the meaning of a service name once it is
/// used as an endpoint or as a controller URL path segment
const RESERVED_NAME_CHARS: [char; 5] = ['/', ':', '?', '#', '%'];

fn check_service_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(&RESERVED_NAME_CHARS[..]) || name == "." || name == ".." {
        return Err(Error::invalid_bundle(
            BundleErrorKind::Malformed,
            format!("Invalid service name ({})", name),
        ));
    }
    Ok(())
}

fn malformed(err: serde_json::Error) -> Error {
    Error::invalid_bundle(BundleErrorKind::Malformed, err.to_string())
}
