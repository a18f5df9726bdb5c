use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::status::DeliveryStatus;

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a message id: `<millis base36>-<sequence>-<9 random chars>`.
///
/// The per-process sequence keeps ids unique even when the clock does not
/// advance between two sends.
pub fn new_message_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", to_base36(millis), to_base36(seq), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Opaque reference to a blob held by an external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub reference: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Address,
    pub recipient: Address,
    /// Resolved once at send time and never rewritten afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    /// Plaintext as composed. Empty for messages received from others.
    #[serde(default)]
    pub body: String,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Base58 box public key the ciphertext was sealed with.
    pub sender_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
    pub status: DeliveryStatus,
}

impl Message {
    pub fn is_from(&self, address: &Address) -> bool {
        &self.sender == address
    }

    pub fn involves(&self, address: &Address) -> bool {
        &self.sender == address || &self.recipient == address
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub address: Address,
    /// Last interaction initiated locally, not ledger activity.
    pub last_seen_at: DateTime<Utc>,
    pub interaction_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_alias: Option<String>,
    /// Username learned from the peer's published profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Peer {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            last_seen_at: Utc::now(),
            interaction_count: 0,
            display_alias: None,
            username: None,
        }
    }
}

/// The local installation's profile. One per install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub identity: Address,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub alias_map: BTreeMap<Address, String>,
}

impl Profile {
    pub fn new(identity: Address, display_name: impl Into<String>) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            updated_at: Utc::now(),
            alias_map: BTreeMap::new(),
        }
    }
}

mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        B64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn message_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_message_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    fn basepoint() -> Address {
        let mut key = [0x66u8; 32];
        key[0] = 0x58;
        Address::from_public_key(key).unwrap()
    }

    #[test]
    fn message_json_shape() {
        let address = basepoint();
        let message = Message {
            id: new_message_id(),
            sender: address.clone(),
            recipient: address,
            sender_display_name: Some("alice".into()),
            body: "hi".into(),
            ciphertext: vec![1, 2, 3],
            nonce: vec![9; 24],
            sender_key: "key".into(),
            created_at: Utc::now(),
            attachment: None,
            status: DeliveryStatus::Sent,
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["ciphertext"], "AQID");
        assert_eq!(json["status"]["state"], "sent");
        assert!(json.get("attachment").is_none());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn alias_map_uses_address_keys() {
        let me = basepoint();
        let mut profile = Profile::new(me.clone(), "alice");
        profile.alias_map.insert(me.clone(), "me".into());

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["alias_map"][me.as_str()], "me");

        let back: Profile = serde_json::from_value(json).unwrap();
        assert_eq!(back.alias_map.get(&me).map(String::as_str), Some("me"));
    }
}
