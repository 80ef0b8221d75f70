//! Bundle and service identifiers
//!
//! A bundle identifier is one random lowercase letter, the requesting user's
//! identifier and a millisecond timestamp. A service identifier is the bundle
//! identifier followed by the service's name in the document.

use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};

static GLOBAL: IdGenerator = IdGenerator::new();

/// Generator whose millisecond component never repeats.
///
/// When called twice within the same millisecond the timestamp is bumped
/// past the last one handed out, so it may run slightly ahead of the clock.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last_millis: AtomicI64,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
        }
    }

    pub fn generate(&self, user_id: &str) -> String {
        let millis = self.next_millis(Utc::now().timestamp_millis());
        let letter = rand::thread_rng().gen_range(b'a'..=b'z') as char;
        format!("{}{}{}", letter, user_id, millis)
    }

    fn next_millis(&self, now: i64) -> i64 {
        let previous = self
            .last_millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }
}

/// Generate a bundle identifier for `user_id` from the process-wide generator
pub fn generate_bundle_id(user_id: &str) -> String {
    GLOBAL.generate(user_id)
}

/// Identifier of a service once renamed into its bundle
pub fn service_id(bundle_id: &str, service_name: &str) -> String {
    format!("{}{}", bundle_id, service_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_bundle_id_shape() {
        let before = Utc::now().timestamp_millis();
        let id = generate_bundle_id("42");

        let first = id.chars().next().unwrap();
        assert!(first.is_ascii_lowercase());
        assert_eq!(&id[1..3], "42");

        let millis: i64 = id[3..].parse().unwrap();
        assert!(millis >= before);
    }

    #[test]
    fn test_back_to_back_ids_differ() {
        let generator = IdGenerator::new();
        let ids: HashSet<String> = (0..10_000).map(|_| generator.generate("7")).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_millis_strictly_increase() {
        let generator = IdGenerator::new();
        assert_eq!(generator.next_millis(1_000), 1_000);
        assert_eq!(generator.next_millis(1_000), 1_001);
        assert_eq!(generator.next_millis(999), 1_002);
        assert_eq!(generator.next_millis(5_000), 5_000);
    }

    #[test]
    fn test_service_id() {
        assert_eq!(service_id("a71700000000000", "mysql"), "a71700000000000mysql");
    }
}
