//! Full renders of a MultiClusterObservability against an in-memory cluster.

use std::collections::BTreeSet;

use kube::ResourceExt;
use kube::api::DynamicObject;
use observability_operator::config::{
    DEFAULT_NAMESPACE, DEFAULT_OPERATOR_NAMESPACE, IMAGE_REPOSITORY_ANNOTATION,
    IMAGE_TAG_SUFFIX_ANNOTATION, OperatorConfig,
};
use observability_operator::controller::error::Error;
use observability_operator::crd::MultiClusterObservability;
use observability_operator::rendering::{OWNER_LABEL, Renderer, alertmanager, thanos};

use crate::common::{
    CLIENT_CA, FakeCluster, MultiClusterObservabilityBuilder, OAUTH_PROXY_IMAGE,
    OBJECT_STORAGE_KEY, OBJECT_STORAGE_SECRET, test_observability,
};
use crate::{container_image, containers, find, kind_of};

const RENDERED_OBJECTS: usize = 27;

async fn render(
    mco: &MultiClusterObservability,
    cluster: &FakeCluster,
) -> Result<Vec<DynamicObject>, Error> {
    Renderer::new(mco, cluster, Some(cluster)).render().await
}

async fn render_ok(mco: &MultiClusterObservability, cluster: &FakeCluster) -> Vec<DynamicObject> {
    render(mco, cluster).await.expect("render succeeds")
}

fn pvc_template(obj: &DynamicObject) -> &serde_json::Value {
    &obj.data["spec"]["volumeClaimTemplates"][0]["spec"]
}

#[tokio::test]
async fn test_render_produces_full_stack() {
    let mco = test_observability("observability");
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    assert!(!manifests.is_empty());
    assert_eq!(manifests.len(), RENDERED_OBJECTS);

    let count = |kind: &str| manifests.iter().filter(|o| kind_of(o) == kind).count();
    assert_eq!(count("StatefulSet"), 5);
    assert_eq!(count("Deployment"), 4);
    assert_eq!(count("Service"), 10);
    assert_eq!(count("ServiceAccount"), 4);
    assert_eq!(count("ConfigMap"), 4);
    // Seeded Secrets are created by the controller, not applied
    assert_eq!(count("Secret"), 0);

    find(&manifests, "StatefulSet", thanos::RECEIVE_NAME);
    find(&manifests, "Deployment", thanos::QUERY_FRONTEND_NAME);
    find(&manifests, "Deployment", "observability-grafana");
    find(&manifests, "StatefulSet", "observability-alertmanager");
}

#[tokio::test]
async fn test_render_names_are_unique() {
    let mco = test_observability("observability");
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;
    let keys: BTreeSet<(String, String)> = manifests
        .iter()
        .map(|o| (kind_of(o).to_string(), o.name_any()))
        .collect();
    assert_eq!(keys.len(), manifests.len());
}

#[tokio::test]
async fn test_render_is_deterministic() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift();
    let first = serde_json::to_value(render_ok(&mco, &cluster).await).unwrap();
    let second = serde_json::to_value(render_ok(&mco, &cluster).await).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_every_object_is_namespaced_labelled_and_owned() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .uid("4c8c5cb4-0d5a-4d8c-9d3e-2f4b5d6e7f80")
        .build();
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    for obj in &manifests {
        let what = format!("{}/{}", kind_of(obj), obj.name_any());
        assert_eq!(obj.namespace().as_deref(), Some(DEFAULT_NAMESPACE), "{what}");
        assert_eq!(
            obj.labels().get(OWNER_LABEL).map(String::as_str),
            Some("observability"),
            "{what}"
        );
        let owners = obj.owner_references();
        assert_eq!(owners.len(), 1, "{what}");
        assert_eq!(owners[0].kind, "MultiClusterObservability");
        assert_eq!(owners[0].uid, "4c8c5cb4-0d5a-4d8c-9d3e-2f4b5d6e7f80");
        assert_eq!(owners[0].controller, Some(true));
    }
}

#[tokio::test]
async fn test_render_into_configured_namespace() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift();
    let config = OperatorConfig {
        namespace: "observability-hub".to_string(),
        ..Default::default()
    };
    let manifests = Renderer::new(&mco, &cluster, Some(&cluster))
        .with_config(config)
        .render()
        .await
        .unwrap();
    assert!(
        manifests
            .iter()
            .all(|o| o.namespace().as_deref() == Some("observability-hub"))
    );
}

#[tokio::test]
async fn test_missing_storage_config_fails() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .without_storage()
        .build();
    let err = render(&mco, &FakeCluster::openshift()).await.unwrap_err();
    assert!(matches!(err, Error::MissingField(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_invalid_storage_size_fails() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .receive_storage_size("a lot")
        .build();
    let err = render(&mco, &FakeCluster::openshift()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("receiveStorageSize"));
}

#[tokio::test]
async fn test_missing_client_ca_fails() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::empty().with_oauth_proxy_stream(&[("v4.4", OAUTH_PROXY_IMAGE)]);
    let err = render(&mco, &cluster).await.unwrap_err();
    assert!(matches!(err, Error::Transient(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_empty_client_ca_fails() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::empty().with_client_ca("");
    assert!(render(&mco, &cluster).await.is_err());
}

#[tokio::test]
async fn test_client_ca_is_copied() {
    let mco = test_observability("observability");
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;
    let ca = find(&manifests, "ConfigMap", "observability-client-ca");
    assert_eq!(ca.data["data"]["client-ca-file"], CLIENT_CA);
}

#[tokio::test]
async fn test_oauth_proxy_uses_image_stream() {
    let mco = test_observability("observability");
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    let alertmanager = find(&manifests, "StatefulSet", "observability-alertmanager");
    assert_eq!(container_image(alertmanager, "oauth-proxy"), OAUTH_PROXY_IMAGE);
    let proxy = find(&manifests, "Deployment", "observability-rbac-query-proxy");
    assert_eq!(container_image(proxy, "oauth-proxy"), OAUTH_PROXY_IMAGE);
}

#[tokio::test]
async fn test_oauth_proxy_falls_back_without_image_client() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift();
    let manifests = Renderer::new(&mco, &cluster, None::<&FakeCluster>)
        .render()
        .await
        .unwrap();

    assert_eq!(manifests.len(), RENDERED_OBJECTS);
    let proxy = find(&manifests, "Deployment", "observability-rbac-query-proxy");
    assert_eq!(
        container_image(proxy, "oauth-proxy"),
        "quay.io/stolostron/origin-oauth-proxy:4.9"
    );
}

#[tokio::test]
async fn test_oauth_proxy_lookup_failure_does_not_fail_render() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift().failing_image_streams();
    let manifests = render_ok(&mco, &cluster).await;
    let proxy = find(&manifests, "Deployment", "observability-rbac-query-proxy");
    assert_eq!(
        container_image(proxy, "oauth-proxy"),
        "quay.io/stolostron/origin-oauth-proxy:4.9"
    );
}

#[tokio::test]
async fn test_image_manifest_overrides_defaults() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift().with_image_manifest(
        DEFAULT_OPERATOR_NAMESPACE,
        "mch-image-manifest-2.10.0",
        &[
            ("thanos", "quay.io/acm/thanos@sha256:aaaa"),
            ("grafana", "quay.io/acm/grafana@sha256:bbbb"),
            ("origin_oauth_proxy", "quay.io/acm/oauth-proxy@sha256:cccc"),
        ],
    );
    let manifests = render_ok(&mco, &cluster).await;

    let receive = find(&manifests, "StatefulSet", thanos::RECEIVE_NAME);
    assert_eq!(
        container_image(receive, "thanos-receive"),
        "quay.io/acm/thanos@sha256:aaaa"
    );
    let grafana = find(&manifests, "Deployment", "observability-grafana");
    assert_eq!(
        container_image(grafana, "grafana"),
        "quay.io/acm/grafana@sha256:bbbb"
    );
    // ImageStream beats the manifest for oauth-proxy.
    let proxy = find(&manifests, "Deployment", "observability-rbac-query-proxy");
    assert_eq!(container_image(proxy, "oauth-proxy"), OAUTH_PROXY_IMAGE);
}

#[tokio::test]
async fn test_manifest_in_render_namespace_is_ignored() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift().with_image_manifest(
        DEFAULT_NAMESPACE,
        "mch-image-manifest",
        &[("thanos", "quay.io/elsewhere/thanos:1")],
    );
    let manifests = render_ok(&mco, &cluster).await;
    let store = find(&manifests, "StatefulSet", thanos::STORE_NAME);
    assert_eq!(
        container_image(store, "thanos-store"),
        "quay.io/stolostron/thanos:2.10.0"
    );
}

#[tokio::test]
async fn test_manifest_read_from_configured_operator_namespace() {
    let mco = test_observability("observability");
    let cluster = FakeCluster::openshift().with_image_manifest(
        "mco-system",
        "mch-image-manifest",
        &[("thanos", "quay.io/acm/thanos@sha256:dddd")],
    );
    let config = OperatorConfig {
        operator_namespace: "mco-system".to_string(),
        ..Default::default()
    };
    let manifests = Renderer::new(&mco, &cluster, Some(&cluster))
        .with_config(config)
        .render()
        .await
        .unwrap();

    let store = find(&manifests, "StatefulSet", thanos::STORE_NAME);
    assert_eq!(
        container_image(store, "thanos-store"),
        "quay.io/acm/thanos@sha256:dddd"
    );
    // Rendered objects still go to the render namespace
    assert_eq!(store.namespace().as_deref(), Some(DEFAULT_NAMESPACE));
}

#[tokio::test]
async fn test_statefulset_services_are_headless() {
    let mco = test_observability("observability");
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    for sts in manifests.iter().filter(|o| kind_of(o) == "StatefulSet") {
        let service_name = sts.data["spec"]["serviceName"]
            .as_str()
            .expect("statefulset has a governing service");
        let service = find(&manifests, "Service", service_name);
        assert_eq!(
            service.data["spec"]["clusterIP"], "None",
            "{} governs {}",
            service_name,
            sts.name_any()
        );
    }

    let governing = find(&manifests, "Service", alertmanager::GOVERNING_SERVICE_NAME);
    assert_eq!(governing.data["spec"]["publishNotReadyAddresses"], true);
    // Clients reach Alertmanager through the oauth-proxy Service
    let proxy = find(&manifests, "Service", alertmanager::SERVICE_NAME);
    assert!(proxy.data["spec"]["clusterIP"].is_null());
}

#[tokio::test]
async fn test_annotation_overrides_every_image() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .annotation(IMAGE_REPOSITORY_ANNOTATION, "registry.example.com/acm")
        .annotation(IMAGE_TAG_SUFFIX_ANNOTATION, "2.10.0-SNAPSHOT")
        .build();
    let cluster = FakeCluster::openshift().with_image_manifest(
        DEFAULT_OPERATOR_NAMESPACE,
        "mch-image-manifest",
        &[("thanos", "quay.io/acm/thanos@sha256:aaaa")],
    );
    let manifests = render_ok(&mco, &cluster).await;

    let query = find(&manifests, "Deployment", thanos::QUERY_NAME);
    assert_eq!(
        container_image(query, "thanos-query"),
        "registry.example.com/acm/thanos:2.10.0-SNAPSHOT"
    );
    let proxy = find(&manifests, "Deployment", "observability-rbac-query-proxy");
    assert_eq!(
        container_image(proxy, "oauth-proxy"),
        "registry.example.com/acm/origin-oauth-proxy:2.10.0-SNAPSHOT"
    );
}

#[tokio::test]
async fn test_storage_class_and_sizes() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .storage_class("fast-ssd")
        .receive_storage_size("250Gi")
        .store_storage_size("20Gi")
        .build();
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    let receive = pvc_template(find(&manifests, "StatefulSet", thanos::RECEIVE_NAME));
    assert_eq!(receive["storageClassName"], "fast-ssd");
    assert_eq!(receive["resources"]["requests"]["storage"], "250Gi");

    let store = pvc_template(find(&manifests, "StatefulSet", thanos::STORE_NAME));
    assert_eq!(store["resources"]["requests"]["storage"], "20Gi");

    let compact = pvc_template(find(&manifests, "StatefulSet", thanos::COMPACT_NAME));
    assert_eq!(compact["resources"]["requests"]["storage"], "100Gi");
}

#[tokio::test]
async fn test_object_storage_secret_reference() {
    let mco = test_observability("observability");
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    for name in [thanos::COMPACT_NAME, thanos::RECEIVE_NAME, thanos::STORE_NAME] {
        let sts = find(&manifests, "StatefulSet", name);
        let env = containers(sts)[0]["env"].as_array().unwrap();
        let objstore = env
            .iter()
            .find(|e| e["name"] == "OBJSTORE_CONFIG")
            .unwrap_or_else(|| panic!("{name} has no OBJSTORE_CONFIG"));
        assert_eq!(objstore["valueFrom"]["secretKeyRef"]["name"], OBJECT_STORAGE_SECRET);
        assert_eq!(objstore["valueFrom"]["secretKeyRef"]["key"], OBJECT_STORAGE_KEY);
    }
}

#[tokio::test]
async fn test_scheduling_and_pull_settings() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .image_pull_policy("IfNotPresent")
        .image_pull_secret("hub-pull-secret")
        .node_selector("node-role.kubernetes.io/infra", "")
        .toleration("node-role.kubernetes.io/infra", "NoSchedule")
        .build();
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;

    let workloads = manifests
        .iter()
        .filter(|o| matches!(kind_of(o), "Deployment" | "StatefulSet"));
    for obj in workloads {
        let pod = &obj.data["spec"]["template"]["spec"];
        assert_eq!(pod["imagePullSecrets"][0]["name"], "hub-pull-secret");
        assert_eq!(pod["nodeSelector"]["node-role.kubernetes.io/infra"], "");
        assert_eq!(pod["tolerations"][0]["effect"], "NoSchedule");
        for container in containers(obj) {
            assert_eq!(container["imagePullPolicy"], "IfNotPresent");
        }
    }
}

#[tokio::test]
async fn test_receive_replicas_override() {
    let mco = MultiClusterObservabilityBuilder::new("observability")
        .receive_replicas(5)
        .build();
    let manifests = render_ok(&mco, &FakeCluster::openshift()).await;
    let receive = find(&manifests, "StatefulSet", thanos::RECEIVE_NAME);
    assert_eq!(receive.data["spec"]["replicas"], 5);
}

#[tokio::test]
async fn test_downsampling_flag() {
    let disabled = MultiClusterObservabilityBuilder::new("observability")
        .enable_downsampling(false)
        .build();
    let manifests = render_ok(&disabled, &FakeCluster::openshift()).await;
    let compact = find(&manifests, "StatefulSet", thanos::COMPACT_NAME);
    let args = containers(compact)[0]["args"].as_array().unwrap();
    assert!(args.iter().any(|a| a == "--downsampling.disable"));

    let enabled = test_observability("observability");
    let manifests = render_ok(&enabled, &FakeCluster::openshift()).await;
    let compact = find(&manifests, "StatefulSet", thanos::COMPACT_NAME);
    let args = containers(compact)[0]["args"].as_array().unwrap();
    assert!(!args.iter().any(|a| a == "--downsampling.disable"));
}
