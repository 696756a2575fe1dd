//! Validated application configuration.
//!
//! The pipeline never sees raw TOML tables: the CLI parses the operator's
//! file into this struct and calls [`AppConf::validate`] before anything
//! else runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

fn default_backend_url() -> String {
    "https://backend.enclave-deploy.io".to_string()
}

fn default_pccs_url() -> String {
    "https://pccs.enclave-deploy.io".to_string()
}

fn default_signer_key_url() -> String {
    "https://certificates.enclave-deploy.io/enclave-signer.pem".to_string()
}

fn default_healthcheck() -> String {
    "/health".to_string()
}

fn default_poll_period_secs() -> u64 {
    3
}

fn default_spawn_timeout_secs() -> u64 {
    600
}

fn default_ready_timeout_secs() -> u64 {
    120
}

/// TLS material supplied by the application owner, used when the instance
/// serves under the owner's own domain instead of an enclave self-signed
/// certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslConf {
    pub domain: String,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConf {
    /// Application name, unique per account on the backend.
    pub name: String,

    /// Directory containing the application code to deploy.
    pub code_path: PathBuf,

    /// Entry module, relative to `code_path`. Must exist.
    pub entrypoint: String,

    /// Packaging image used both to build the enclave and to dry-run the
    /// measurement computation locally.
    pub docker: String,

    #[serde(default = "default_healthcheck")]
    pub healthcheck_endpoint: String,

    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    #[serde(default = "default_pccs_url")]
    pub pccs_url: String,

    #[serde(default = "default_signer_key_url")]
    pub signer_key_url: String,

    /// Relative paths inside `code_path` that are shipped in cleartext and
    /// therefore excluded from encryption.
    #[serde(default)]
    pub cleartext: Vec<String>,

    /// JSON file with application secrets delivered after attestation.
    #[serde(default)]
    pub secrets_path: Option<PathBuf>,

    #[serde(default)]
    pub ssl: Option<SslConf>,

    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,

    #[serde(default = "default_spawn_timeout_secs")]
    pub spawn_timeout_secs: u64,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl AppConf {
    /// Check everything that can be checked without talking to the backend.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::Config("application name must not be empty".into()));
        }
        if !self.code_path.is_dir() {
            return Err(Error::Config(format!(
                "code path {} is not a directory",
                self.code_path.display()
            )));
        }
        if !self.code_path.join(&self.entrypoint).is_file() {
            return Err(Error::Config(format!(
                "entrypoint {} not found under {}",
                self.entrypoint,
                self.code_path.display()
            )));
        }
        if let Some(ssl) = &self.ssl {
            if !ssl.certificate_path.is_file() {
                return Err(Error::Config(format!(
                    "ssl certificate {} not found",
                    ssl.certificate_path.display()
                )));
            }
            if !ssl.private_key_path.is_file() {
                return Err(Error::Config(format!(
                    "ssl private key {} not found",
                    ssl.private_key_path.display()
                )));
            }
        }
        if let Some(secrets) = &self.secrets_path {
            if !secrets.is_file() {
                return Err(Error::Config(format!(
                    "secrets file {} not found",
                    secrets.display()
                )));
            }
        }
        if self.poll_period_secs == 0 {
            return Err(Error::Config("poll period must be at least 1s".into()));
        }
        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}
