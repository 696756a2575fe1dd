//! Pipeline orchestration and the individual CLI commands.
//!
//! The deploy pipeline is a strict sequence: every stage blocks on the
//! previous one and any failure aborts the run. The context is saved at
//! the attach checkpoint and again after secret delivery, so an aborted
//! run always leaves a reloadable context behind for `verify`, `status`,
//! `stop` or `clean`.

use std::path::Path;

use attestation_verifier::AttestationVerifier;
use deploy_core::{
    crypto, AppConf, BackendClient, CertificateOrigin, DeploymentContext, DeploymentStateMachine,
    DeploymentStatus, InstanceInfo, SecretDeliveryClient, SecretPayload,
};
use enclave_measure::MeasurementComputer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::load_ignore_patterns;
use crate::Error;

/// TLS port the instance's configured domain serves on.
const INSTANCE_TLS_PORT: u16 = 443;

/// Run the full confidential deployment pipeline.
///
/// Returns the accepted instance id; the persisted context under
/// `config_root` is keyed by it.
pub async fn deploy(conf: &AppConf, config_root: &Path) -> Result<Uuid, Error> {
    conf.validate()?;
    let workspace_root = config_root.join("workspaces");
    let mut context = DeploymentContext::create(conf, &workspace_root)?;

    info!("encrypting code from {}", conf.code_path.display());
    let patterns = load_ignore_patterns(&conf.code_path)?;
    let artifact = crypto::encrypt(&conf.code_path, &mut context, &patterns, &conf.cleartext)?;
    info!(
        "artifact ready: {} ({} files)",
        artifact.path.display(),
        artifact.nonces.len()
    );

    // Ctrl-C stops the polling loops cleanly instead of killing the
    // process mid-poll.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let backend = BackendClient::new(conf.backend_url.clone())?;
    let machine =
        DeploymentStateMachine::new(backend, conf.poll_period()).with_cancellation(cancel.clone());

    info!("submitting '{}' to {}", conf.name, conf.backend_url);
    let instance = machine.submit(&mut context, conf, &artifact).await?;
    context.save(config_root)?;
    info!(
        "instance {} accepted, will serve on {}",
        instance.id, instance.config_domain
    );

    info!("waiting for the instance to request its secrets");
    let instance = machine
        .await_state(
            instance.id,
            DeploymentStatus::Initializing,
            conf.spawn_timeout(),
        )
        .await?;

    info!("computing expected enclave measurement with {}", conf.docker);
    let computer = MeasurementComputer::new()?;
    let log_path = context.workspace.join("measurement.log");
    let measurement = computer
        .compute(&conf.docker, &artifact.path, &[], &log_path)
        .await?;

    announce_certificate_origin(&instance);
    let verifier = AttestationVerifier::new(conf.pccs_url.clone(), conf.signer_key_url.clone())?;
    let attestation = verifier
        .verify(&instance.config_domain, INSTANCE_TLS_PORT, Some(measurement))
        .await?;
    info!("attestation verified for {}", instance.config_domain);

    let delivery =
        SecretDeliveryClient::new(&instance.config_domain, &attestation.certificate_der)?
            .with_cancellation(cancel.clone());
    delivery
        .deliver(&secret_payload(conf, &context, &instance)?)
        .await?;
    info!("secrets delivered, waiting for the application to come up");
    delivery
        .await_ready(
            &conf.healthcheck_endpoint,
            conf.ready_timeout(),
            conf.poll_period(),
        )
        .await?;

    machine
        .await_state(instance.id, DeploymentStatus::Running, conf.spawn_timeout())
        .await?;
    context.save(config_root)?;

    info!(
        "deployment complete: https://{}{}",
        instance.config_domain, conf.healthcheck_endpoint
    );
    Ok(instance.id)
}

/// Assemble the secret material owed to this instance.
fn secret_payload(
    conf: &AppConf,
    context: &DeploymentContext,
    instance: &InstanceInfo,
) -> Result<SecretPayload, Error> {
    let ssl_private_key = match (instance.cert_origin, &conf.ssl) {
        (CertificateOrigin::Owner, Some(ssl)) => {
            Some(std::fs::read_to_string(&ssl.private_key_path)?)
        }
        (CertificateOrigin::Owner, None) => {
            return Err(Error::Config(
                "instance expects an owner certificate but no [ssl] section is configured".into(),
            ))
        }
        _ => None,
    };

    let app_secrets = match &conf.secrets_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Some(serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("secrets file {} is not valid JSON: {e}", path.display()))
            })?)
        }
        None => None,
    };

    Ok(SecretPayload {
        instance_id: instance.id,
        code_key: Some(hex::encode(context.code_key)),
        ssl_private_key,
        app_secrets,
    })
}

/// Tell the operator what the presented certificate will mean, per origin.
fn announce_certificate_origin(instance: &InstanceInfo) {
    match instance.cert_origin {
        CertificateOrigin::SelfSigned => info!(
            "instance presents an enclave-generated certificate; trust in {} \
             derives entirely from the attestation that follows",
            instance.config_domain
        ),
        CertificateOrigin::Owner => info!(
            "instance serves under your own certificate for {}; the enclave \
             receives the private key only after attestation",
            instance.config_domain
        ),
        CertificateOrigin::Operator => info!(
            "instance is fronted by an operator-issued certificate for {}; \
             the operator terminates TLS outside your trust boundary",
            instance.config_domain
        ),
    }
}

/// Re-verify a deployed instance from its persisted context.
///
/// The expected measurement is recomputed from the saved artifact, never
/// trusted from memory. An endpoint without an embedded quote is reported
/// as "not verifiable" instead of failing the command.
pub async fn verify(conf: &AppConf, config_root: &Path, id: Uuid) -> Result<(), Error> {
    let context = DeploymentContext::load(config_root, id)?;
    let instance = context.instance.clone().ok_or_else(|| {
        Error::Deploy(deploy_core::Error::InvalidState(format!(
            "saved context for {id} was never bound to an instance"
        )))
    })?;

    let saved_artifact = DeploymentContext::saved_artifact_path(config_root, id);
    let expected = if saved_artifact.is_file() {
        let computer = MeasurementComputer::new()?;
        let log_path = context.workspace.join("measurement.log");
        Some(
            computer
                .compute(&conf.docker, &saved_artifact, &[], &log_path)
                .await?,
        )
    } else {
        warn!("no saved artifact for {id}; skipping code-fingerprint check");
        None
    };

    announce_certificate_origin(&instance);
    let verifier = AttestationVerifier::new(conf.pccs_url.clone(), conf.signer_key_url.clone())?;
    match verifier
        .verify(&instance.config_domain, INSTANCE_TLS_PORT, expected)
        .await
    {
        Ok(_) => {
            info!("instance {} verified", instance.id);
            Ok(())
        }
        Err(attestation_verifier::Error::QuoteNotFound) => {
            warn!(
                "{} presents no enclave quote: the endpoint is not \
                 verifiable as a TEE",
                instance.config_domain
            );
            Ok(())
        }
        Err(e) => Err(Error::Attestation(e)),
    }
}

/// Print the instance's current remote status.
pub async fn status(conf: &AppConf, config_root: &Path, id: Uuid) -> Result<(), Error> {
    let context = DeploymentContext::load(config_root, id)?;
    let instance = context.instance.ok_or_else(|| {
        Error::Deploy(deploy_core::Error::InvalidState(format!(
            "saved context for {id} was never bound to an instance"
        )))
    })?;

    let backend = BackendClient::new(conf.backend_url.clone())?;
    let response = backend.app_status(instance.id).await.map_err(Error::Deploy)?;
    info!(
        "instance {} is '{}' on {}, expires {}",
        response.id, response.status, response.config_domain_name, response.expires_at
    );
    Ok(())
}

/// Stop a deployed instance.
pub async fn stop(conf: &AppConf, config_root: &Path, id: Uuid) -> Result<(), Error> {
    let context = DeploymentContext::load(config_root, id)?;
    let instance = context.instance.ok_or_else(|| {
        Error::Deploy(deploy_core::Error::InvalidState(format!(
            "saved context for {id} was never bound to an instance"
        )))
    })?;

    let backend = BackendClient::new(conf.backend_url.clone())?;
    backend.stop_app(instance.id).await.map_err(Error::Deploy)?;
    info!("instance {} stopped", instance.id);
    Ok(())
}

/// Remove the persisted context for an instance.
pub fn clean(config_root: &Path, id: Uuid, force: bool) -> Result<(), Error> {
    DeploymentContext::clean(config_root, id, force)?;
    info!("removed persisted context for {id}");
    Ok(())
}
