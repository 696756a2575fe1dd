//! Enclave measurement tooling.
//!
//! Derives the code measurement a deployed enclave should report by
//! dry-running the packaging container over the encrypted artifact. The
//! container engine sits behind [`ContainerRuntime`] so the parsing logic
//! is testable without a daemon.

mod error;
mod measure;
mod runner;

pub use error::Error;
pub use measure::MeasurementComputer;
pub use runner::{ContainerRuntime, DockerRuntime, RunOutput, RunSpec};

/// Result type for measurement operations.
pub type Result<T> = std::result::Result<T, Error>;
