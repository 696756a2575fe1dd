use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no enclave quote embedded in the endpoint certificate")]
    QuoteNotFound,

    #[error("malformed quote: {0}")]
    QuoteParse(String),

    #[error("collateral validation rejected the quote: {0}")]
    CollateralValidation(String),

    #[error("signer measurement mismatch: expected {expected}, got {actual}")]
    WrongSigner { expected: String, actual: String },

    #[error("code measurement mismatch: expected {expected}, got {actual}")]
    WrongCodeMeasurement { expected: String, actual: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
