//! End-to-end pipeline test against a mock backend.
//!
//! A three-file source tree is encrypted, submitted, polled through
//! `spawning -> initializing`, provisioned with secrets, and polled to
//! `running`. The mock asserts the externally-observable contract: one
//! submission, one delivery, bounded polling.

use std::path::Path;
use std::time::Duration;

use deploy_core::{
    crypto, AppConf, BackendClient, DeploymentContext, DeploymentStateMachine, DeploymentStatus,
    SecretDeliveryClient, SecretPayload,
};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const POLL_PERIOD: Duration = Duration::from_millis(20);

fn write_source_tree(dir: &Path) {
    std::fs::create_dir_all(dir.join("lib")).unwrap();
    std::fs::write(dir.join("app.py"), "print('hello')").unwrap();
    std::fs::write(dir.join("lib/util.py"), "def f(): pass").unwrap();
    std::fs::write(dir.join("requirements.txt"), "flask==3.0").unwrap();
}

fn test_conf(code_path: &Path, backend_url: String) -> AppConf {
    AppConf {
        name: "demo".to_string(),
        code_path: code_path.to_path_buf(),
        entrypoint: "app.py".to_string(),
        docker: "enclave-builder:latest".to_string(),
        healthcheck_endpoint: "/health".to_string(),
        backend_url,
        pccs_url: "https://pccs.invalid".to_string(),
        signer_key_url: "https://certificates.invalid/signer.pem".to_string(),
        cleartext: Vec::new(),
        secrets_path: None,
        ssl: None,
        poll_period_secs: 3,
        spawn_timeout_secs: 600,
        ready_timeout_secs: 120,
    }
}

fn app_json(id: Uuid, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": status,
        "config_domain_name": "demo.apps.example",
        "size": 2048,
        "expires_at": "2026-09-01T00:00:00Z",
        "certificate_origin": "self",
    })
}

#[tokio::test]
async fn pipeline_deploys_a_three_file_tree_end_to_end() {
    let backend = MockServer::start().await;
    let instance = MockServer::start().await;
    let id = Uuid::new_v4();

    // Backend: exactly one submission, then spawning once, initializing
    // while secrets are pending, running afterwards.
    Mock::given(method("POST"))
        .and(url_path("/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(app_json(id, "spawning")))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(url_path(format!("/apps/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(app_json(id, "spawning")))
        .up_to_n_times(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(url_path(format!("/apps/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(app_json(id, "initializing")))
        .up_to_n_times(2)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(url_path(format!("/apps/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(app_json(id, "running")))
        .mount(&backend)
        .await;

    // Instance bootstrap endpoint: exactly one delivery, then one
    // still-bootstrapping healthcheck before the application answers.
    Mock::given(method("POST"))
        .and(url_path("/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&instance)
        .await;
    Mock::given(method("GET"))
        .and(url_path("/health"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("x-app-bootstrapping", "true"),
        )
        .up_to_n_times(1)
        .mount(&instance)
        .await;
    Mock::given(method("GET"))
        .and(url_path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&instance)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("code");
    write_source_tree(&source);
    let conf = test_conf(&source, backend.uri());
    let config_root = tmp.path().join("config");

    // Encrypt: one artifact covering the whole tree.
    let mut context =
        DeploymentContext::create(&conf, &config_root.join("workspaces")).unwrap();
    let artifact = crypto::encrypt(&source, &mut context, &[], &[]).unwrap();
    assert!(artifact.path.is_file());
    assert_eq!(artifact.nonces.len(), 3);

    // Submit: exactly one attach.
    let machine =
        DeploymentStateMachine::new(BackendClient::new(conf.backend_url.clone()).unwrap(), POLL_PERIOD);
    let info = machine.submit(&mut context, &conf, &artifact).await.unwrap();
    assert_eq!(info.id, id);
    assert!(context.instance.is_some());
    context.save(&config_root).unwrap();

    // Poll to the secret-delivery checkpoint.
    let info = machine
        .await_state(id, DeploymentStatus::Initializing, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(info.config_domain, "demo.apps.example");

    // Deliver secrets and wait for the application to take over.
    let delivery = SecretDeliveryClient::with_client(reqwest::Client::new(), instance.uri());
    delivery
        .deliver(&SecretPayload {
            instance_id: id,
            code_key: Some(hex::encode(context.code_key)),
            ssl_private_key: None,
            app_secrets: None,
        })
        .await
        .unwrap();
    delivery
        .await_ready("/health", Duration::from_secs(2), POLL_PERIOD)
        .await
        .unwrap();

    // Deployment phase ends at `running`.
    machine
        .await_state(id, DeploymentStatus::Running, Duration::from_secs(2))
        .await
        .unwrap();
    context.save(&config_root).unwrap();

    // The persisted context is reloadable with the artifact alongside.
    let reloaded = DeploymentContext::load(&config_root, id).unwrap();
    assert_eq!(reloaded.nonces, context.nonces);
    assert!(DeploymentContext::saved_artifact_path(&config_root, id).is_file());
}

#[tokio::test]
async fn pipeline_aborts_when_the_backend_sticks_at_spawning() {
    let backend = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(url_path(format!("/apps/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(app_json(id, "spawning")))
        .expect(10)
        .mount(&backend)
        .await;

    let machine =
        DeploymentStateMachine::new(BackendClient::new(backend.uri()).unwrap(), POLL_PERIOD);
    let result = machine
        .await_state(id, DeploymentStatus::Initializing, POLL_PERIOD * 10)
        .await;

    match result {
        Err(deploy_core::Error::Timeout { hint, .. }) => {
            assert!(hint.contains("resources"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}
