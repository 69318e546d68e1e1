//! Secrets the controller creates once and then leaves to their owners.

use k8s_openapi::api::core::v1::Secret;
use observability_operator::config::DEFAULT_NAMESPACE;
use observability_operator::controller::error::Error;
use observability_operator::rendering::alertmanager::{CONFIG_SECRET_KEY, CONFIG_SECRET_NAME};
use observability_operator::rendering::common::OAUTH_COOKIE_SECRET_NAME;
use observability_operator::rendering::ensure_seed_secrets;

use crate::common::{FakeCluster, test_observability};

const USER_CONFIG: &str = "route:\n  receiver: pagerduty\nreceivers:\n- name: pagerduty\n";

fn config_text(secret: &Secret) -> String {
    if let Some(text) = secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(CONFIG_SECRET_KEY))
    {
        return text.clone();
    }
    let bytes = &secret.data.as_ref().expect("secret has data")[CONFIG_SECRET_KEY];
    String::from_utf8(bytes.0.clone()).expect("utf-8 config")
}

#[tokio::test]
async fn test_seeds_missing_secrets() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift();

    let created = ensure_seed_secrets(&cluster, &mco, DEFAULT_NAMESPACE)
        .await
        .unwrap();
    assert_eq!(created, vec![OAUTH_COOKIE_SECRET_NAME, CONFIG_SECRET_NAME]);

    let config = cluster
        .secret(DEFAULT_NAMESPACE, CONFIG_SECRET_NAME)
        .expect("alertmanager config seeded");
    let parsed: serde_yaml::Value = serde_yaml::from_str(&config_text(&config)).unwrap();
    assert_eq!(parsed["route"]["receiver"].as_str(), Some("null"));
}

#[tokio::test]
async fn test_existing_alertmanager_config_is_left_alone() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift().with_secret(
        DEFAULT_NAMESPACE,
        CONFIG_SECRET_NAME,
        CONFIG_SECRET_KEY,
        USER_CONFIG,
    );

    let created = ensure_seed_secrets(&cluster, &mco, DEFAULT_NAMESPACE)
        .await
        .unwrap();
    assert_eq!(created, vec![OAUTH_COOKIE_SECRET_NAME]);

    let config = cluster
        .secret(DEFAULT_NAMESPACE, CONFIG_SECRET_NAME)
        .unwrap();
    assert_eq!(config_text(&config), USER_CONFIG);
}

#[tokio::test]
async fn test_second_pass_creates_nothing() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift();

    ensure_seed_secrets(&cluster, &mco, DEFAULT_NAMESPACE)
        .await
        .unwrap();
    let cookie = cluster
        .secret(DEFAULT_NAMESPACE, OAUTH_COOKIE_SECRET_NAME)
        .unwrap();

    let created = ensure_seed_secrets(&cluster, &mco, DEFAULT_NAMESPACE)
        .await
        .unwrap();
    assert!(created.is_empty());
    // The cookie value is not rotated
    assert_eq!(
        cluster
            .secret(DEFAULT_NAMESPACE, OAUTH_COOKIE_SECRET_NAME)
            .unwrap()
            .string_data,
        cookie.string_data
    );
}

#[tokio::test]
async fn test_missing_namespace_is_transient() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift().with_namespaces(&["kube-system"]);

    let err = ensure_seed_secrets(&cluster, &mco, DEFAULT_NAMESPACE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transient(_)), "{err:?}");
    assert!(!err.is_not_found());
    assert!(err.is_retryable());
    assert!(err.to_string().contains(OAUTH_COOKIE_SECRET_NAME));
}
