use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::Zeroizing;

use crate::CryptoError;
use crate::keys::{BoxPublicKey, BoxSecret};

pub const NONCE_LEN: usize = 24;
const EPHEMERAL_KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"murmur/box/v1";

/// Output of one encryption. `ciphertext` is `ephemeral_pub || aead(body)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    /// Public half of the sender's derived secret; the recipient needs it
    /// to open the message.
    pub sender_key: BoxPublicKey,
}

/// Encrypt `plaintext` for `recipient` using a secret derived from the
/// sender's auth secret. Never deterministic: every call draws a new
/// ephemeral key pair and nonce.
pub fn encrypt(
    plaintext: &[u8],
    sender_auth_secret: &[u8],
    recipient: &BoxPublicKey,
) -> Result<Sealed, CryptoError> {
    let sender = BoxSecret::from_auth_secret(sender_auth_secret)?;
    seal(plaintext, &sender, recipient)
}

/// Decrypt with the recipient's auth secret.
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8],
    sender: &BoxPublicKey,
    recipient_auth_secret: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let recipient = BoxSecret::from_auth_secret(recipient_auth_secret)
        .map_err(|_| CryptoError::AuthenticationFailure)?;
    open(ciphertext, nonce, sender, &recipient)
}

pub fn seal(
    plaintext: &[u8],
    sender: &BoxSecret,
    recipient: &BoxPublicKey,
) -> Result<Sealed, CryptoError> {
    let ephemeral = BoxSecret::generate();
    let ephemeral_public = ephemeral.public_key();

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ephemeral_shared = ephemeral.diffie_hellman(recipient);
    let static_shared = sender.diffie_hellman(recipient);
    if !ephemeral_shared.was_contributory() || !static_shared.was_contributory() {
        return Err(CryptoError::InvalidKey("low-order recipient key"));
    }

    let sender_key = sender.public_key();
    let key = derive_message_key(
        &nonce,
        &ephemeral_shared,
        &static_shared,
        &ephemeral_public,
        &sender_key,
        recipient,
    )
    .ok_or(CryptoError::Encryption)?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let body = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut ciphertext = Vec::with_capacity(EPHEMERAL_KEY_LEN + body.len());
    ciphertext.extend_from_slice(ephemeral_public.as_bytes());
    ciphertext.extend_from_slice(&body);

    Ok(Sealed {
        ciphertext,
        nonce,
        sender_key,
    })
}

/// Open a sealed message. Any tampering, wrong key or wrong nonce yields
/// [`CryptoError::AuthenticationFailure`]; malformed input fails the same way.
pub fn open(
    ciphertext: &[u8],
    nonce: &[u8],
    sender: &BoxPublicKey,
    recipient: &BoxSecret,
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < EPHEMERAL_KEY_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailure);
    }

    let mut ephemeral_bytes = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral_bytes.copy_from_slice(&ciphertext[..EPHEMERAL_KEY_LEN]);
    let ephemeral_public = BoxPublicKey::from_bytes(ephemeral_bytes);

    let ephemeral_shared = recipient.diffie_hellman(&ephemeral_public);
    let static_shared = recipient.diffie_hellman(sender);
    if !ephemeral_shared.was_contributory() || !static_shared.was_contributory() {
        return Err(CryptoError::AuthenticationFailure);
    }

    let key = derive_message_key(
        nonce,
        &ephemeral_shared,
        &static_shared,
        &ephemeral_public,
        sender,
        &recipient.public_key(),
    )
    .ok_or(CryptoError::AuthenticationFailure)?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    cipher
        .decrypt(XNonce::from_slice(nonce), &ciphertext[EPHEMERAL_KEY_LEN..])
        .map_err(|_| CryptoError::AuthenticationFailure)
}

/// HKDF-SHA256 over both shared secrets, salted with the nonce and bound to
/// every public key involved.
fn derive_message_key(
    nonce: &[u8],
    ephemeral_shared: &SharedSecret,
    static_shared: &SharedSecret,
    ephemeral_public: &BoxPublicKey,
    sender: &BoxPublicKey,
    recipient: &BoxPublicKey,
) -> Option<Zeroizing<[u8; 32]>> {
    let mut ikm = Zeroizing::new([0u8; 64]);
    ikm[..32].copy_from_slice(ephemeral_shared.as_bytes());
    ikm[32..].copy_from_slice(static_shared.as_bytes());

    let mut info = Vec::with_capacity(KEY_INFO.len() + 96);
    info.extend_from_slice(KEY_INFO);
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(sender.as_bytes());
    info.extend_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(nonce), &ikm[..]);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, &mut key[..]).ok()?;
    Some(key)
}
