/// Murmur Crypto Library
///
/// Authenticated public-key encryption of message bodies. Each call seals
/// to the recipient's X25519 key with a fresh ephemeral key pair and a
/// random 24-byte nonce (XChaCha20-Poly1305). The sender's static secret is
/// derived from the wallet's signature over a fixed challenge, so no raw
/// private key material is ever stored.
pub mod encrypt;
pub mod keys;

pub use encrypt::{Sealed, decrypt, encrypt, open, seal};
pub use keys::{BoxPublicKey, BoxSecret, SIGNING_CHALLENGE};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Tampered ciphertext or nonce, or the wrong key pair.
    #[error("authentication failed: message cannot be read")]
    AuthenticationFailure,

    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    #[error("encryption failed")]
    Encryption,
}
