//! Full reconcile passes against in-memory fakes

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use registry_operator::controller::status::{condition_status, condition_types, reasons};
use registry_operator::crd::{Condition, DockerRegistry, DockerRegistryStatus, Served, State};
use registry_operator::installer::Verification;
use registry_operator::values::{FULLNAME_OVERRIDE, INTERNAL_ACCESS_SECRET};
use registry_operator::{Error, FINALIZER, error_policy};
use serde_json::json;

use crate::common::*;

fn stored(h: &Harness) -> DockerRegistry {
    h.cluster.registry(NAMESPACE, NAME).unwrap()
}

fn stored_status(h: &Harness) -> DockerRegistryStatus {
    stored(h).status.unwrap_or_default()
}

fn condition(status: &DockerRegistryStatus, type_: &str) -> Condition {
    status
        .conditions
        .iter()
        .find(|c| c.type_ == type_)
        .cloned()
        .unwrap_or_else(|| panic!("condition {type_} missing"))
}

fn harness_for(registry: DockerRegistry) -> Harness {
    Harness::new(FakeCluster::new().with_registry(registry))
}

fn with_cluster(cluster: FakeCluster, registry: DockerRegistry) -> Harness {
    Harness::new(cluster.with_registry(registry))
}

mod forward_path_tests {
    use super::*;

    #[tokio::test]
    async fn test_default_storage_is_filesystem() {
        let h = harness_for(create_test_registry());

        let action = h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Ready));
        assert_eq!(status.storage, "filesystem");
        assert_eq!(status.delete_enabled, "False");

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["storage"], json!("filesystem"));
        assert_eq!(
            values["configData"]["storage"]["filesystem"]["rootdirectory"],
            json!("/var/lib/registry")
        );
    }

    #[tokio::test]
    async fn test_azure_storage() {
        let cluster = FakeCluster::new().with_secret(secret(
            NAMESPACE,
            "azure-secret",
            &[("accountName", "a"), ("accountKey", "k"), ("container", "c")],
        ));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_azure("azure-secret")
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(
            values["secrets"]["azure"],
            json!({"accountName": "a", "accountKey": "k", "container": "c"})
        );
        assert_eq!(values["storage"], json!("azure"));
        assert_eq!(values["persistence"]["enabled"], json!(false));
        assert_eq!(stored_status(&h).storage, "azure");
    }

    #[tokio::test]
    async fn test_default_gateway_exposes_registry() {
        let cluster = FakeCluster::new().with_gateway(default_gateway());
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_external_access(None, None)
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Ready));
        assert_eq!(status.external_access.enabled, "True");
        assert_eq!(
            status.external_access.pull_address,
            "registry-default-kyma-system.cluster.local"
        );
        assert_eq!(status.external_access.gateway, "istio-system/istio-ingressgateway");
        assert_eq!(status.external_access.secret_name, "dockerregistry-config-external");

        let values = h.installer.last_values().unwrap();
        assert_eq!(
            values["virtualService"],
            json!({
                "enabled": true,
                "host": "registry-default-kyma-system.cluster.local",
                "gateway": "istio-system/istio-ingressgateway",
            })
        );
        // resolved once in AccessConfiguration, memoized for the status states
        assert_eq!(h.cluster.call_count("get_gateway"), 1);
    }

    #[tokio::test]
    async fn test_processing_workloads_requeue_with_fixed_delay() {
        let h = Harness::with_installer(
            FakeCluster::new().with_registry(create_test_registry()),
            FakeInstaller::new().with_verify([Verification::Processing]),
        );

        let action = h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(3)));
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Processing));
        assert_eq!(condition(&status, condition_types::INSTALLED).status, condition_status::UNKNOWN);
        assert_eq!(condition(&status, condition_types::CONFIGURED).status, condition_status::TRUE);
    }

    #[tokio::test]
    async fn test_internal_access_status() {
        let cluster = FakeCluster::new().with_service(service_with_node_port(
            NAMESPACE,
            FULLNAME_OVERRIDE,
            31_500,
        ));
        let h = with_cluster(cluster, create_test_registry());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let status = stored_status(&h);
        assert_eq!(status.internal_access.enabled, "True");
        assert_eq!(status.internal_access.pull_address, "localhost:31500");
        assert_eq!(
            status.internal_access.push_address,
            "dockerregistry.kyma-system.svc.cluster.local:5000"
        );
        assert_eq!(status.internal_access.secret_name, INTERNAL_ACCESS_SECRET);
        assert_eq!(status.external_access.enabled, "False");

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["registryNodePort"], json!(31_500));
        assert_eq!(values["fullnameOverride"], json!("dockerregistry"));
    }

    #[tokio::test]
    async fn test_existing_credentials_are_reused() {
        let cluster = FakeCluster::new()
            .with_secret(credentials_secret(NAMESPACE, INTERNAL_ACCESS_SECRET, "user", "pass"))
            .with_deployment(registry_deployment(NAMESPACE, "http-secret"));
        let h = with_cluster(cluster, create_test_registry());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["dockerRegistry"], json!({"username": "user", "password": "pass"}));
        assert_eq!(values["registryHTTPSecret"], json!("http-secret"));
    }

    #[tokio::test]
    async fn test_unlabelled_secret_is_not_reused() {
        let cluster = FakeCluster::new().with_secret(secret(
            NAMESPACE,
            INTERNAL_ACCESS_SECRET,
            &[("username", "user"), ("password", "pass")],
        ));
        let h = with_cluster(cluster, create_test_registry());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert!(values.get("dockerRegistry").is_none());
        assert!(values.get("registryHTTPSecret").is_none());
    }

    #[tokio::test]
    async fn test_install_carries_labels_and_pvc_guard() {
        let h = harness_for(create_test_registry());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(
            values["commonLabels"]["app.kubernetes.io/managed-by"],
            json!("dockerregistry-operator")
        );
        assert_eq!(h.installer.pre_action_kinds(), vec!["PersistentVolumeClaim"]);
        let release = h.installer.last_release().unwrap();
        assert_eq!(release.name, NAME);
        assert_eq!(release.namespace, NAMESPACE);
    }

    #[tokio::test]
    async fn test_console_logging_maps_to_text() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_logging("debug", "console")
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["configData"]["log"]["level"], json!("debug"));
        assert_eq!(values["configData"]["log"]["formatter"], json!("text"));
    }

    #[tokio::test]
    async fn test_default_logging() {
        let h = harness_for(create_test_registry());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["configData"]["log"]["level"], json!("info"));
        assert_eq!(values["configData"]["log"]["formatter"], json!("json"));
    }

    #[tokio::test]
    async fn test_finalizer_is_added_on_first_pass() {
        let h = harness_for(DockerRegistryBuilder::new(NAME, NAMESPACE).build());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert!(stored(&h).finalizers().iter().any(|f| f == FINALIZER));
        assert_eq!(stored_status(&h).state, Some(State::Ready));
        assert_eq!(stored_status(&h).served, Some(Served::True));
    }
}

mod storage_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_backends_fail_before_any_secret_is_read() {
        let cluster = FakeCluster::new().with_secret(secret(
            NAMESPACE,
            "azure-secret",
            &[("accountName", "a"), ("accountKey", "k"), ("container", "c")],
        ));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_azure("azure-secret")
                .with_s3("images", "eu-central-1", Some("s3-secret"))
                .build(),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(Error::ValidationError(_))));
        let calls = h.cluster.calls();
        assert!(!calls.iter().any(|c| c.contains("azure-secret") || c.contains("s3-secret")));
        assert_eq!(h.installer.install_count(), 0);

        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Error));
        let configured = condition(&status, condition_types::CONFIGURED);
        assert_eq!(configured.status, condition_status::FALSE);
        assert_eq!(configured.reason, reasons::CONFIGURATION_ERR);
        assert!(configured.message.contains("only one storage option can be used"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_a_hard_error() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_azure("azure-secret")
                .build(),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(Error::SecretNotFound { .. })));
        assert_eq!(stored_status(&h).state, Some(State::Error));
        assert_eq!(h.installer.install_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_secret_key() {
        let cluster = FakeCluster::new().with_secret(secret(
            NAMESPACE,
            "azure-secret",
            &[("accountName", "a"), ("container", "c")],
        ));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_azure("azure-secret")
                .build(),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;

        let Err(Error::MissingSecretKey { key, .. }) = result else {
            panic!("expected a missing key error");
        };
        assert_eq!(key, "accountKey");
    }

    #[tokio::test]
    async fn test_pvc_storage() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_pvc("registry-data")
                .with_delete_enabled()
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let status = stored_status(&h);
        assert_eq!(status.storage, "pvc");
        assert_eq!(status.pvc, "registry-data");
        assert_eq!(status.delete_enabled, "True");
        let values = h.installer.last_values().unwrap();
        assert_eq!(
            values["persistence"],
            json!({"enabled": true, "existingClaim": "registry-data"})
        );
        assert_eq!(values["configData"]["storage"]["delete"]["enabled"], json!(true));
    }

    #[tokio::test]
    async fn test_s3_without_secret() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_s3("images", "eu-central-1", None)
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["s3"]["bucket"], json!("images"));
        assert!(values.get("secrets").is_none());
        assert_eq!(stored_status(&h).storage, "s3");
    }

    #[tokio::test]
    async fn test_gcs_with_secret() {
        let cluster = FakeCluster::new().with_secret(secret(NAMESPACE, "gcs-secret", &[("accountkey", "{}")]));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_gcs("images", Some("gcs-secret"))
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["secrets"]["gcs"]["accountkey"], json!("{}"));
        assert_eq!(stored_status(&h).storage, "gcs");
    }

    #[tokio::test]
    async fn test_btp_object_store_on_aws() {
        let cluster = FakeCluster::new().with_secret(secret(
            NAMESPACE,
            "object-store",
            &[
                ("host", "s3.amazonaws.com"),
                ("bucket", "images"),
                ("region", "eu-central-1"),
                ("access_key_id", "ak"),
                ("secret_access_key", "sk"),
            ],
        ));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_btp_object_store("object-store")
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(values["storage"], json!("s3"));
        assert_eq!(values["s3"]["region"], json!("eu-central-1"));
        assert_eq!(values["secrets"]["s3"], json!({"accessKey": "ak", "secretKey": "sk"}));
        assert_eq!(stored_status(&h).storage, "btp-objectstore-aws");
    }

    #[tokio::test]
    async fn test_btp_object_store_on_gcp_decodes_key() {
        let encoded = STANDARD.encode(r#"{"type":"service_account"}"#);
        let cluster = FakeCluster::new().with_secret(secret(
            NAMESPACE,
            "object-store",
            &[("bucket", "images"), ("base64EncodedPrivateKeyData", encoded.as_str())],
        ));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_btp_object_store("object-store")
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let values = h.installer.last_values().unwrap();
        assert_eq!(
            values["secrets"]["gcs"]["accountkey"],
            json!(r#"{"type":"service_account"}"#)
        );
        assert_eq!(stored_status(&h).storage, "btp-objectstore-gcp");
    }

    #[tokio::test]
    async fn test_btp_object_store_unknown_provider() {
        let cluster = FakeCluster::new().with_secret(secret(NAMESPACE, "object-store", &[("bucket", "images")]));
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_btp_object_store("object-store")
                .build(),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(Error::ValidationError(_))));
    }
}

mod external_access_tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_gateway_is_a_warning() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_external_access(None, None)
                .build(),
        );

        let action = h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Warning));
        let installed = condition(&status, condition_types::INSTALLED);
        assert_eq!(installed.status, condition_status::TRUE);
        assert!(installed.message.contains("istio-ingressgateway"));
        assert!(status.external_access.enabled.is_empty());
        assert!(h.installer.last_values().unwrap().get("virtualService").is_none());
    }

    #[tokio::test]
    async fn test_gateway_appearing_later_clears_the_warning() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_external_access(Some("apps/public"), Some("registry.example.com"))
                .build(),
        );
        h.reconcile(NAMESPACE, NAME).await.unwrap();
        assert_eq!(stored_status(&h).state, Some(State::Warning));

        let h2 = Harness::new(
            FakeCluster::new()
                .with_gateway(gateway("apps", "public", &["*.example.com"]))
                .with_registry(stored(&h)),
        );
        h2.reconcile(NAMESPACE, NAME).await.unwrap();

        let status = h2.cluster.registry(NAMESPACE, NAME).unwrap().status.unwrap();
        assert_eq!(status.state, Some(State::Ready));
        assert_eq!(status.external_access.push_address, "registry.example.com");
        assert_eq!(status.external_access.gateway, "apps/public");
    }

    #[tokio::test]
    async fn test_custom_gateway_without_host_is_invalid() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_external_access(Some("apps/public"), None)
                .build(),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(Error::ValidationError(_))));
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Error));
        assert_eq!(
            condition(&status, condition_types::CONFIGURED).reason,
            reasons::CONFIGURATION_ERR
        );
    }
}

mod installation_failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_install_error() {
        let h = Harness::with_installer(
            FakeCluster::new().with_registry(create_test_registry()),
            FakeInstaller::new().with_install_error("template: missing value"),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(Error::InstallerError(_))));
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Error));
        let installed = condition(&status, condition_types::INSTALLED);
        assert_eq!(installed.status, condition_status::FALSE);
        assert_eq!(installed.reason, reasons::INSTALLATION_ERR);
    }

    #[tokio::test]
    async fn test_failed_rollout_then_recovery() {
        let h = Harness::with_installer(
            FakeCluster::new().with_registry(create_test_registry()),
            FakeInstaller::new().with_verify([Verification::Failed("replica failure".to_string())]),
        );

        let result = h.reconcile(NAMESPACE, NAME).await;
        assert!(matches!(result, Err(Error::VerificationFailed(_))));
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Error));
        let failure = condition(&status, condition_types::DEPLOYMENT_FAILURE);
        assert_eq!(failure.status, condition_status::TRUE);
        assert_eq!(failure.reason, reasons::DEPLOYMENT_REPLICA_FAILURE);

        h.reconcile(NAMESPACE, NAME).await.unwrap();
        let status = stored_status(&h);
        assert_eq!(status.state, Some(State::Ready));
        assert!(
            !status
                .conditions
                .iter()
                .any(|c| c.type_ == condition_types::DEPLOYMENT_FAILURE)
        );
    }

    #[tokio::test]
    async fn test_status_conflict_fails_pass_without_events() {
        let h = harness_for(create_test_registry());
        h.cluster.fail_status_writes(1);

        let result = h.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(h.events.events().is_empty());
    }

    #[test]
    fn test_invalid_spec_waits_for_a_fix() {
        let h = harness_for(create_test_registry());
        let error = Error::ValidationError("only one storage option can be used".to_string());

        let action = error_policy(Arc::new(create_test_registry()), &error, h.ctx.clone());

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    }
}

mod idempotence_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_pass_changes_nothing() {
        let cluster = FakeCluster::new().with_gateway(default_gateway());
        let h = with_cluster(
            cluster,
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .with_external_access(None, None)
                .with_pvc("registry-data")
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();
        let first = stored_status(&h);
        let events = h.events.events().len();
        let writes = h.cluster.call_count("replace_registry_status");
        assert!(events > 0);
        assert_eq!(writes, 1);

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert_eq!(stored_status(&h), first);
        assert_eq!(h.events.events().len(), events);
        assert_eq!(h.cluster.call_count("replace_registry_status"), writes);
        assert_eq!(h.installer.install_count(), 2);
    }

    #[tokio::test]
    async fn test_first_pass_reports_each_field_once() {
        let h = harness_for(create_test_registry());

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let notes = h.events.notes();
        assert!(notes.contains(&"Storage type set from '' to 'filesystem'".to_string()));
        assert!(notes.contains(&"Internal access enabled set from '' to 'True'".to_string()));
        let mut unique = notes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), notes.len());
        assert!(h.events.events().iter().all(|e| e.reason == "Configuration"));
    }
}

mod served_filter_tests {
    use super::*;

    fn served_elsewhere() -> DockerRegistry {
        DockerRegistryBuilder::new("first", "default")
            .with_finalizer()
            .served(true)
            .build()
    }

    #[tokio::test]
    async fn test_second_instance_is_not_served() {
        let cluster = FakeCluster::new().with_registry(served_elsewhere());
        let h = with_cluster(cluster, DockerRegistryBuilder::new(NAME, NAMESPACE).build());

        let action = h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        let registry = stored(&h);
        assert!(registry.finalizers().is_empty());
        let status = registry.status.unwrap();
        assert_eq!(status.served, Some(Served::False));
        assert_eq!(status.state, Some(State::Warning));
        let installed = condition(&status, condition_types::INSTALLED);
        assert_eq!(installed.status, condition_status::FALSE);
        assert_eq!(installed.reason, reasons::DUPLICATED);
        assert!(installed.message.contains("current served instance: default/first"));
        assert_eq!(h.installer.install_count(), 0);
    }

    #[tokio::test]
    async fn test_takes_over_once_served_instance_is_gone() {
        let cluster = FakeCluster::new().with_registry(served_elsewhere());
        let h = with_cluster(cluster, DockerRegistryBuilder::new(NAME, NAMESPACE).build());
        h.reconcile(NAMESPACE, NAME).await.unwrap();

        h.cluster.remove_registry("default", "first");
        h.reconcile(NAMESPACE, NAME).await.unwrap();

        let registry = stored(&h);
        assert!(registry.finalizers().iter().any(|f| f == FINALIZER));
        let status = registry.status.unwrap();
        assert_eq!(status.served, Some(Served::True));
        assert_eq!(status.state, Some(State::Ready));
        assert_eq!(h.installer.install_count(), 1);
    }

    #[tokio::test]
    async fn test_served_instance_skips_lookup() {
        let h = harness_for(
            DockerRegistryBuilder::new(NAME, NAMESPACE)
                .with_finalizer()
                .served(true)
                .build(),
        );

        h.reconcile(NAMESPACE, NAME).await.unwrap();

        assert_eq!(h.cluster.call_count("list_registries"), 0);
    }
}
