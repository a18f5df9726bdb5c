use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use murmur_crypto::BoxSecret;
use murmur_types::Address;

use crate::error::{MurmurError, Result};

/// The connected wallet, as far as the core cares: an address and the
/// ability to sign a challenge.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` while no wallet is connected.
    fn current_public_address(&self) -> Option<Address>;

    async fn sign_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// Local Ed25519 keypair. Used by the daemon for development and by tests.
pub struct KeypairIdentity {
    signing_key: SigningKey,
    address: Address,
}

impl KeypairIdentity {
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(&seed);
        let address = Address::from_public_key(signing_key.verifying_key().to_bytes())?;
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Seed as 64 hex characters.
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| MurmurError::Identity(format!("seed is not hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MurmurError::Identity("seed must be 32 bytes".into()))?;
        Self::from_seed(seed)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Box secret matching the Montgomery form of this identity's address;
    /// opens messages other identities sent here.
    pub fn box_secret(&self) -> BoxSecret {
        BoxSecret::from_ed25519_seed(&self.signing_key.to_bytes())
    }
}

#[async_trait]
impl IdentityProvider for KeypairIdentity {
    fn current_public_address(&self) -> Option<Address> {
        Some(self.address.clone())
    }

    async fn sign_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(challenge).to_bytes().to_vec())
    }
}

/// Address without a key. Enough to reconcile delivery state, not to send.
pub struct WatchOnlyIdentity {
    address: Address,
}

impl WatchOnlyIdentity {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl IdentityProvider for WatchOnlyIdentity {
    fn current_public_address(&self) -> Option<Address> {
        Some(self.address.clone())
    }

    async fn sign_challenge(&self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(MurmurError::Identity("watch-only identity cannot sign".into()))
    }
}
