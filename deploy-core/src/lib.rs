//! # Deploy Core
//!
//! The confidential-deployment pipeline: deterministic code encryption,
//! backend submission, state polling, and post-attestation secret
//! delivery.
//!
//! ## Pipeline
//!
//! 1. [`DeploymentContext::create`] allocates a workspace and code key.
//! 2. [`crypto::encrypt`] produces a reproducible encrypted tar; nonces
//!    are reused per path so rebuilds of an unchanged tree are
//!    byte-identical.
//! 3. [`DeploymentStateMachine::submit`] posts the artifact and binds the
//!    accepted instance to the context.
//! 4. [`DeploymentStateMachine::await_state`] polls until the instance is
//!    waiting for secrets; skipping past that state is treated as a
//!    protocol violation, never as a benign race.
//! 5. After attestation verification (the `attestation-verifier` crate),
//!    [`SecretDeliveryClient`] pushes the code key and application
//!    secrets over a connection pinned to the verified certificate and
//!    waits for the application to take over from the bootstrap stub.
//!
//! Every stage failure aborts the pipeline. The context is persisted at
//! well-defined checkpoints so a crashed run can still be inspected,
//! verified or cleaned up later.

pub mod backend;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod secrets;
pub mod state;

pub use backend::{AppResponse, BackendClient};
pub use config::{AppConf, SslConf};
pub use context::{CertificateOrigin, DeploymentContext, InstanceInfo};
pub use crypto::EncryptedArtifact;
pub use error::Error;
pub use secrets::{SecretDeliveryClient, SecretPayload};
pub use state::{DeploymentStateMachine, DeploymentStatus};

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, Error>;
