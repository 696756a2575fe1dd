use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("container runtime error: {0}")]
    Docker(String),

    #[error("no measurement found in container output, see {log_path}")]
    MeasurementNotFound { log_path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
