use murmur_crypto::CryptoError;
use murmur_types::AddressError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MurmurError>;

#[derive(Debug, Error)]
pub enum MurmurError {
    /// Tampered or mismatched-key ciphertext. Shown as "cannot read this message".
    #[error("cannot read this message")]
    AuthenticationFailure,

    /// Malformed or off-curve identity string, caught before any send.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Backward or unknown-id status change. A defect, never user-facing.
    #[error("invalid status transition for message {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Ledger lookup failed; the check is inconclusive.
    #[error("activity oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("no local profile saved")]
    ProfileNotFound,

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("session closed")]
    SessionClosed,
}

impl From<CryptoError> for MurmurError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AuthenticationFailure => Self::AuthenticationFailure,
            other => Self::Crypto(other),
        }
    }
}

impl MurmurError {
    /// Errors the user caused and should see inline.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure | Self::InvalidAddress(_) | Self::ProfileNotFound
        )
    }
}
