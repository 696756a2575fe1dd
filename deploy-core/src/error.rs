use std::time::Duration;

use thiserror::Error;

use crate::state::DeploymentStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid deployment state: {0}")]
    InvalidState(String),

    #[error("no deployment found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("unexpected backend response: {status_code} - {body}")]
    UnexpectedResponse { status_code: u16, body: String },

    #[error("an application named '{name}' already exists, stop it first: {body}")]
    Conflict { name: String, body: String },

    #[error("timed out after {waited:?}: {hint}")]
    Timeout { waited: Duration, hint: String },

    #[error("deployment failed, instance reported status '{status}'")]
    DeploymentFailed { status: DeploymentStatus },

    #[error(
        "protocol violation: expected status '{expected}' but the instance \
         already reached '{observed}'"
    )]
    ProtocolViolation {
        expected: DeploymentStatus,
        observed: DeploymentStatus,
    },

    #[error("operation cancelled by the operator")]
    Cancelled,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Attestation(#[from] attestation_verifier::Error),
}
