use chrono::Utc;
use ed25519_dalek::SigningKey;
use murmur_types::{Address, DeliveryStatus, Message, new_message_id};

/// Deterministic on-curve address for seed byte `n`.
pub fn address(n: u8) -> Address {
    let public = SigningKey::from_bytes(&[n; 32]).verifying_key().to_bytes();
    Address::from_public_key(public).expect("verifying key is on the curve")
}

/// A `Sent` message with placeholder crypto fields.
pub fn message(from: &Address, to: &Address, body: &str) -> Message {
    Message {
        id: new_message_id(),
        sender: from.clone(),
        recipient: to.clone(),
        sender_display_name: None,
        body: body.to_string(),
        ciphertext: vec![0; 48],
        nonce: vec![0; 24],
        sender_key: String::new(),
        created_at: Utc::now(),
        attachment: None,
        status: DeliveryStatus::Sent,
    }
}
