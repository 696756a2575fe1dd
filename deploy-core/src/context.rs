//! Per-deployment identity and its on-disk persistence.
//!
//! A context is created unbound, gains its [`InstanceInfo`] exactly once
//! when the backend accepts the submission, and is persisted under a
//! directory keyed by the instance id so later commands (`verify`, `status`,
//! `stop`, `clean`) can reload it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConf;
use crate::error::Error;

/// File name of the persisted context descriptor.
const CONTEXT_FILE: &str = "context.json";

/// File name of the encrypted artifact, both in the workspace and in the
/// persisted instance directory.
pub const ARTIFACT_FILE: &str = "code.tar";

/// Who provides the TLS certificate the instance serves under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateOrigin {
    /// The enclave generates its own certificate; trust comes entirely
    /// from attestation.
    #[serde(rename = "self")]
    SelfSigned,
    /// The application owner supplied certificate and key for their domain.
    Owner,
    /// The hosting operator terminates TLS with its own CA-issued
    /// certificate.
    Operator,
}

impl fmt::Display for CertificateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateOrigin::SelfSigned => write!(f, "self"),
            CertificateOrigin::Owner => write!(f, "owner"),
            CertificateOrigin::Operator => write!(f, "operator"),
        }
    }
}

/// Identity of the remote instance, known once the backend accepts a
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: Uuid,
    pub config_domain: String,
    pub size: u32,
    pub expires_at: DateTime<Utc>,
    pub cert_origin: CertificateOrigin,
}

/// The per-deployment root aggregate: workspace, code key, nonce map and,
/// once bound, the remote instance identity.
#[derive(Debug)]
pub struct DeploymentContext {
    pub workspace: PathBuf,
    pub code_key: [u8; 32],
    /// Nonce per relative path, stable across re-encryptions of the same
    /// tree. `BTreeMap` keeps serialization order deterministic.
    pub nonces: BTreeMap<String, [u8; 24]>,
    pub instance: Option<InstanceInfo>,
}

/// Serialized form: key and nonces hex-encoded for auditability.
#[derive(Serialize, Deserialize)]
struct ContextDescriptor {
    workspace: PathBuf,
    code_key: String,
    nonces: BTreeMap<String, String>,
    instance: Option<InstanceInfo>,
}

impl DeploymentContext {
    /// Allocate a fresh workspace and code key for a new deployment.
    pub fn create(conf: &AppConf, workspace_root: &Path) -> Result<Self, Error> {
        let entrypoint = conf.code_path.join(&conf.entrypoint);
        if !entrypoint.is_file() {
            return Err(Error::Config(format!(
                "entrypoint {} not found under {}",
                conf.entrypoint,
                conf.code_path.display()
            )));
        }

        let workspace = workspace_root.join(format!("{}-{}", conf.name, Uuid::new_v4()));
        std::fs::create_dir_all(&workspace)?;

        let mut code_key = [0u8; 32];
        OsRng.fill_bytes(&mut code_key);

        debug!("created deployment workspace {}", workspace.display());
        Ok(Self {
            workspace,
            code_key,
            nonces: BTreeMap::new(),
            instance: None,
        })
    }

    /// Bind the context to the accepted instance. Calling this twice is a
    /// bug on the caller's side.
    pub fn attach(&mut self, instance: InstanceInfo) -> Result<(), Error> {
        if let Some(existing) = &self.instance {
            return Err(Error::InvalidState(format!(
                "context is already bound to instance {}",
                existing.id
            )));
        }
        self.instance = Some(instance);
        Ok(())
    }

    fn instance_dir(config_root: &Path, id: Uuid) -> PathBuf {
        config_root.join(id.to_string())
    }

    /// Persist the context under `config_root`, keyed by instance id. The
    /// encrypted artifact is copied alongside so the deployment's audit
    /// trail is complete without the backend.
    pub fn save(&self, config_root: &Path) -> Result<(), Error> {
        let instance = self.instance.as_ref().ok_or_else(|| {
            Error::InvalidState("cannot save a context that is not bound to an instance".into())
        })?;

        let dir = Self::instance_dir(config_root, instance.id);
        std::fs::create_dir_all(&dir)?;

        let descriptor = ContextDescriptor {
            workspace: self.workspace.clone(),
            code_key: hex::encode(self.code_key),
            nonces: self
                .nonces
                .iter()
                .map(|(path, nonce)| (path.clone(), hex::encode(nonce)))
                .collect(),
            instance: self.instance.clone(),
        };
        let json = serde_json::to_string_pretty(&descriptor)?;
        std::fs::write(dir.join(CONTEXT_FILE), json)?;

        let artifact = self.workspace.join(ARTIFACT_FILE);
        if artifact.is_file() {
            std::fs::copy(&artifact, dir.join(ARTIFACT_FILE))?;
        }

        debug!("saved context for instance {} to {}", instance.id, dir.display());
        Ok(())
    }

    /// Reload a previously saved context.
    pub fn load(config_root: &Path, id: Uuid) -> Result<Self, Error> {
        let path = Self::instance_dir(config_root, id).join(CONTEXT_FILE);
        let json = std::fs::read_to_string(&path)
            .map_err(|_| Error::NotFound(format!("no saved context for instance {id}")))?;
        let descriptor: ContextDescriptor = serde_json::from_str(&json)?;

        let mut code_key = [0u8; 32];
        hex::decode_to_slice(&descriptor.code_key, &mut code_key)
            .map_err(|e| Error::Config(format!("corrupt code key in saved context: {e}")))?;

        let mut nonces = BTreeMap::new();
        for (path, nonce_hex) in descriptor.nonces {
            let mut nonce = [0u8; 24];
            hex::decode_to_slice(&nonce_hex, &mut nonce)
                .map_err(|e| Error::Config(format!("corrupt nonce for {path}: {e}")))?;
            nonces.insert(path, nonce);
        }

        Ok(Self {
            workspace: descriptor.workspace,
            code_key,
            nonces,
            instance: descriptor.instance,
        })
    }

    /// Path of the artifact copy stored next to the saved context.
    pub fn saved_artifact_path(config_root: &Path, id: Uuid) -> PathBuf {
        Self::instance_dir(config_root, id).join(ARTIFACT_FILE)
    }

    /// Remove the persisted directory for `id`. With `ignore_missing`, a
    /// non-existent id is not an error (idempotent delete).
    pub fn clean(config_root: &Path, id: Uuid, ignore_missing: bool) -> Result<(), Error> {
        let dir = Self::instance_dir(config_root, id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if ignore_missing {
                    Ok(())
                } else {
                    Err(Error::NotFound(format!("no saved context for instance {id}")))
                }
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}
