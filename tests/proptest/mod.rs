// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for observability-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeMap;

use proptest::prelude::*;

use observability_operator::config::{
    IMAGE_REPOSITORY_ANNOTATION, IMAGE_TAG_SUFFIX_ANNOTATION, ImageComponent, replace_image,
};
use observability_operator::controller::reconciler::workload_ready;
use observability_operator::crd::ComponentOverrides;
use observability_operator::rendering::common::replicas;
use observability_operator::rendering::is_valid_quantity;

#[path = "../common/mod.rs"]
mod common;

use common::labels_match;

/// Strategy for generating well-formed resource quantities.
fn valid_quantity() -> impl Strategy<Value = String> {
    let suffix = prop_oneof![
        Just(""),
        Just("Ki"),
        Just("Mi"),
        Just("Gi"),
        Just("Ti"),
        Just("m"),
        Just("k"),
        Just("M"),
        Just("G"),
    ];
    (1u32..100_000, proptest::option::of(0u32..1000), suffix).prop_map(|(whole, frac, suffix)| {
        match frac {
            Some(frac) => format!("{}.{}{}", whole, frac, suffix),
            None => format!("{}{}", whole, suffix),
        }
    })
}

/// Strategy for generating random components.
fn any_component() -> impl Strategy<Value = ImageComponent> {
    proptest::sample::select(ImageComponent::ALL.to_vec())
}

/// Strategy for generating label keys and values.
fn label_token() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}"
}

proptest! {
    /// Property: Generated quantities are accepted.
    #[test]
    fn test_valid_quantities_accepted(quantity in valid_quantity()) {
        prop_assert!(is_valid_quantity(&quantity), "{} rejected", quantity);
    }

    /// Property: A quantity with embedded whitespace is rejected.
    #[test]
    fn test_quantities_with_spaces_rejected(quantity in valid_quantity()) {
        let spaced = format!("{} ", quantity);
        prop_assert!(!is_valid_quantity(&spaced));
        let prefixed = format!(" {}", quantity);
        prop_assert!(!is_valid_quantity(&prefixed));
    }

    /// Property: Alphabetic words are never quantities.
    #[test]
    fn test_words_rejected(word in "[a-zA-Z]{2,12}") {
        prop_assert!(!is_valid_quantity(&word));
    }

    /// Property: Labels match a selector built from any subset of themselves.
    #[test]
    fn test_labels_match_own_subset(
        labels in proptest::collection::btree_map(label_token(), label_token(), 1..6),
        take in 0usize..6,
    ) {
        let selector = labels
            .iter()
            .take(take)
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        prop_assert!(labels_match(Some(&labels), &selector));
    }

    /// Property: A selector naming a value the labels do not carry never matches.
    #[test]
    fn test_labels_mismatch(
        labels in proptest::collection::btree_map(label_token(), label_token(), 1..6),
    ) {
        let (key, value) = labels.iter().next().unwrap();
        let selector = format!("{}={}x", key, value);
        prop_assert!(!labels_match(Some(&labels), &selector));
    }

    /// Property: The repository annotation always wins and keeps the
    /// component image name.
    #[test]
    fn test_replace_image_shape(
        component in any_component(),
        repository in "[a-z]{3,10}\\.example\\.com/[a-z]{2,8}",
        suffix in proptest::option::of("[0-9]\\.[0-9]{1,2}\\.[0-9]"),
    ) {
        let mut annotations = BTreeMap::new();
        annotations.insert(IMAGE_REPOSITORY_ANNOTATION.to_string(), repository.clone());
        if let Some(ref suffix) = suffix {
            annotations.insert(IMAGE_TAG_SUFFIX_ANNOTATION.to_string(), suffix.clone());
        }

        let image = replace_image(&annotations, component).unwrap();
        let expected_prefix = format!("{}/{}", repository, component.image_name());
        prop_assert!(image.starts_with(&expected_prefix));
        match suffix {
            Some(suffix) => {
                let expected_suffix = format!(":{}", suffix);
                prop_assert!(image.ends_with(&expected_suffix));
            }
            None => {
                prop_assert_eq!(image, expected_prefix);
            }
        }
    }

    /// Property: Without the repository annotation nothing is replaced.
    #[test]
    fn test_replace_image_requires_repository(
        component in any_component(),
        suffix in "[0-9]\\.[0-9]{1,2}",
    ) {
        let mut annotations = BTreeMap::new();
        annotations.insert(IMAGE_TAG_SUFFIX_ANNOTATION.to_string(), suffix);
        prop_assert_eq!(replace_image(&annotations, component), None);
    }

    /// Property: A replica override replaces the default; its absence keeps it.
    #[test]
    fn test_replica_override(default in 1i32..10, wanted in proptest::option::of(0i32..20)) {
        let overrides = ComponentOverrides { replicas: wanted, resources: None };
        prop_assert_eq!(replicas(Some(&overrides), default), wanted.unwrap_or(default));
        prop_assert_eq!(replicas(None, default), default);
    }

    /// Property: A workload is ready exactly when ready replicas reach wanted.
    #[test]
    fn test_workload_ready(wanted in 0i32..10, ready in 0i32..10) {
        prop_assert_eq!(workload_ready(wanted, ready), ready >= wanted);
    }
}

#[test]
fn test_labels_match_selector_forms() {
    let mut labels = BTreeMap::new();
    labels.insert("ocm-configmap-type".to_string(), "image-manifest".to_string());
    labels.insert("ocm-release-version".to_string(), "2.10.0".to_string());

    assert!(labels_match(
        Some(&labels),
        "ocm-configmap-type=image-manifest, ocm-release-version=2.10.0"
    ));
    assert!(labels_match(Some(&labels), "ocm-release-version"));
    assert!(!labels_match(None, "ocm-configmap-type=image-manifest"));
    assert!(labels_match(None, ""));
}
