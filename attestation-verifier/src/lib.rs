//! # Attestation Verifier
//!
//! Verifies that a live TLS endpoint terminates inside a genuine enclave
//! running expected code, then hands back the certificate for pinning.
//!
//! ## Verification gates
//!
//! 1. Fetch the certificate the endpoint presents (no trust yet).
//! 2. Extract the hardware quote embedded in the certificate; a
//!    certificate without one means the endpoint is not enclave-backed.
//! 3. Fetch the enclave signer's published key and derive the expected
//!    signer measurement from it.
//! 4. Validate the quote against collateral (PCCS-backed, behind the
//!    [`CollateralService`] seam).
//! 5. Compare the quote's signer measurement to the derived one.
//! 6. Compare the quote's code measurement to the expected one, when the
//!    caller supplies it; omitting it is an explicit, logged downgrade.
//!
//! Any mismatch is fatal and logged before being returned. On success the
//! verified certificate bytes are returned so the next stage can pin its
//! TLS connection to that exact certificate.

pub mod error;
pub mod quote;
pub mod tls;
pub mod verify;

pub use error::Error;
pub use quote::Quote;
pub use verify::{AttestationResult, AttestationVerifier, CollateralService};

/// Result type for attestation operations.
pub type Result<T> = std::result::Result<T, Error>;
