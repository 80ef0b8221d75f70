//! Integration tests for the bundle parser

use bundle_common::{BundleErrorKind, Error};
use bundle_parser::{generate_bundle_id, service_id, BundleParser};

#[test]
fn test_parse_wordpress_example() {
    let bundle = BundleParser::parse_file("../../docs/examples/wordpress.json")
        .expect("Failed to parse wordpress.json");

    assert_eq!(bundle.name(), "envExport");
    assert_eq!(bundle.list_services(), vec!["mysql", "wordpress"]);
    assert_eq!(bundle.relations().len(), 2);
    assert!(bundle.is_exposed("wordpress"));
    assert!(!bundle.is_exposed("mysql"));
}

#[test]
fn test_parse_mediawiki_example() {
    let bundle = BundleParser::parse_file("../../docs/examples/mediawiki-scalable.json")
        .expect("Failed to parse mediawiki-scalable.json");

    assert_eq!(
        bundle.list_services(),
        vec!["haproxy", "mediawiki", "memcached", "mysql", "mysql-slave"]
    );
    assert_eq!(bundle.number_of_units("mediawiki").unwrap(), 2);
    assert_eq!(bundle.relations().len(), 5);
    assert!(bundle.dangling_endpoints().is_empty());
}

#[test]
fn test_incomplete_example_fails_on_access() {
    let bundle = BundleParser::parse_file("../../docs/examples/incomplete.json")
        .expect("Failed to parse incomplete.json");

    assert!(matches!(
        bundle.number_of_units("mysql"),
        Err(Error::InvalidBundle {
            kind: BundleErrorKind::MissingField,
            ..
        })
    ));
    assert!(matches!(
        bundle.charm_name("wordpress"),
        Err(Error::InvalidBundle {
            kind: BundleErrorKind::MissingField,
            ..
        })
    ));
    assert_eq!(bundle.dangling_endpoints(), vec!["memcached:cache"]);
}

#[test]
fn test_missing_file() {
    let result = BundleParser::parse_file("../../docs/examples/does-not-exist.json");
    assert!(matches!(result, Err(Error::Other(_))));
}

#[test]
fn test_rename_into_bundle_namespace() {
    let mut bundle = BundleParser::parse_file("../../docs/examples/mediawiki-scalable.json")
        .expect("Failed to parse mediawiki-scalable.json");
    let originals = bundle.list_services();

    let bundle_id = generate_bundle_id("12");
    for name in bundle.list_services() {
        bundle
            .rename_service(&name, &service_id(&bundle_id, &name))
            .unwrap();
    }

    let renamed = bundle.list_services();
    assert_eq!(renamed.len(), originals.len());
    for (original, current) in originals.iter().zip(&renamed) {
        assert_eq!(*current, service_id(&bundle_id, original));
    }

    // every endpoint now points into the bundle, interfaces untouched
    for relation in bundle.relations() {
        for endpoint in relation {
            assert!(endpoint.starts_with(&bundle_id), "{} not renamed", endpoint);
        }
    }
    assert_eq!(
        bundle.relations()[2],
        vec![
            format!("{}mysql-slave:slave", bundle_id),
            format!("{}mysql:master", bundle_id)
        ]
    );
    assert!(bundle.dangling_endpoints().is_empty());
}
