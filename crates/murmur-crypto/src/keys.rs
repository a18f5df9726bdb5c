use std::fmt;

use chacha20poly1305::aead::OsRng;
use curve25519_dalek::edwards::CompressedEdwardsY;
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Bytes the wallet signs to produce the sender's auth secret.
pub const SIGNING_CHALLENGE: &[u8] = b"Sign to encrypt message";

const AUTH_SECRET_SALT: &[u8] = b"murmur/box-secret/v1";

/// X25519 public key used to seal messages to its owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxPublicKey([u8; 32]);

impl BoxPublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Montgomery form of an Ed25519 public key (a wallet address).
    ///
    /// Matches the public half of [`BoxSecret::from_ed25519_seed`] for the
    /// same identity.
    pub fn from_ed25519(public_key: &[u8; 32]) -> Result<Self, CryptoError> {
        let point = CompressedEdwardsY(*public_key)
            .decompress()
            .ok_or(CryptoError::InvalidKey("not an ed25519 point"))?;
        Ok(Self(point.to_montgomery().to_bytes()))
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_base58(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| CryptoError::InvalidKey("not base58"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("invalid key length"))?;
        Ok(Self(key))
    }

    pub(crate) fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for BoxPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxPublicKey({})", self.to_base58())
    }
}

impl fmt::Display for BoxPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// X25519 secret. Zeroized on drop by `x25519-dalek`; neither `Clone` nor
/// `Debug`.
pub struct BoxSecret(StaticSecret);

impl BoxSecret {
    /// Fresh random secret from OS entropy.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Derive a secret from an auth secret (the identity's signature over
    /// [`SIGNING_CHALLENGE`]). Same signature, same key pair.
    pub fn from_auth_secret(auth_secret: &[u8]) -> Result<Self, CryptoError> {
        if auth_secret.is_empty() {
            return Err(CryptoError::InvalidKey("empty auth secret"));
        }

        let hk = Hkdf::<Sha256>::new(Some(AUTH_SECRET_SALT), auth_secret);
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(b"x25519", &mut okm[..])
            .map_err(|_| CryptoError::InvalidKey("key derivation failed"))?;

        Ok(Self(StaticSecret::from(*okm)))
    }

    /// Convert an Ed25519 seed to its X25519 secret: SHA-512(seed)[..32].
    /// Clamping happens inside `x25519-dalek`.
    pub fn from_ed25519_seed(seed: &[u8; 32]) -> Self {
        let mut hash = Zeroizing::new([0u8; 64]);
        hash.copy_from_slice(&Sha512::digest(seed));
        let mut scalar = Zeroizing::new([0u8; 32]);
        scalar.copy_from_slice(&hash[..32]);
        Self(StaticSecret::from(*scalar))
    }

    pub fn public_key(&self) -> BoxPublicKey {
        BoxPublicKey(PublicKey::from(&self.0).to_bytes())
    }

    pub(crate) fn diffie_hellman(&self, their_public: &BoxPublicKey) -> SharedSecret {
        self.0.diffie_hellman(&their_public.to_dalek())
    }
}
