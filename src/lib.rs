//! CLI front end for the confidential deployment pipeline.
//!
//! Commands load the operator's TOML configuration into a validated
//! [`deploy_core::AppConf`], then drive the pipeline stages in
//! [`pipeline`]. All protocol logic lives in the member crates; this crate
//! only wires them together and talks to the operator.

pub mod config;
pub mod pipeline;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Deploy(#[from] deploy_core::Error),

    #[error(transparent)]
    Measure(#[from] enclave_measure::Error),

    #[error(transparent)]
    Attestation(#[from] attestation_verifier::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
