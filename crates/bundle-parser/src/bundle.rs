//! Bundle document schema
//!
//! A bundle is a single top-level entry whose value holds the bundle
//! configuration:
//!
//! ```json
//! {"envExport": {
//!     "services": {"mysql": {"charm": "cs:precise/mysql-27", "num_units": 1}},
//!     "relations": [["wordpress:db", "mysql:db"]]
//! }}
//! ```

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Definition of one service of the bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Charm backing the service (required to deploy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charm: Option<String>,

    /// Number of units to deploy (required to deploy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_units: Option<u32>,

    /// Whether the service is reachable from outside the cluster
    #[serde(default)]
    pub expose: bool,
}

/// Relation between endpoints, each either `service` or `service:interface`.
///
/// Only pairs are deployable; other lengths are kept as-is and skipped at
/// deploy time.
pub type Relation = Vec<String>;

/// Configuration object nested under the top-level entry
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BundleConfig {
    #[serde(default, deserialize_with = "ordered_map")]
    pub services: Vec<(String, ServiceSpec)>,

    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Whole document, entries kept in document order
#[derive(Debug, Deserialize)]
pub(crate) struct BundleFile(#[serde(deserialize_with = "ordered_map")] pub Vec<(String, BundleConfig)>);

/// Deserialize a JSON object into `(key, value)` pairs in the order the
/// deserializer yields them, rejecting repeated keys.
pub(crate) fn ordered_map<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct OrderedMap<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMap<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object keyed by name")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if entries.iter().any(|(existing, _)| *existing == key) {
                    return Err(de::Error::custom(format!("duplicate name `{}`", key)));
                }
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedMap(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_keep_document_order() {
        let json = r#"{"services": {
            "zookeeper": {"charm": "cs:zookeeper", "num_units": 3},
            "apache": {"charm": "cs:apache2", "num_units": 1},
            "mysql": {"charm": "cs:mysql", "num_units": 1}
        }}"#;

        let config: BundleConfig = serde_json::from_str(json).unwrap();
        let names: Vec<&str> = config.services.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zookeeper", "apache", "mysql"]);
        assert!(config.relations.is_empty());
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let json = r#"{"services": {
            "mysql": {"charm": "cs:mysql", "num_units": 1},
            "mysql": {"charm": "cs:mysql", "num_units": 2}
        }}"#;

        let err = serde_json::from_str::<BundleConfig>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate name `mysql`"));
    }

    #[test]
    fn test_service_spec_defaults() {
        let spec: ServiceSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, ServiceSpec::default());
        assert!(!spec.expose);
    }
}
