use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::KvStore;

/// Format version written with every record.
pub const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a, T> {
    version: u32,
    items: &'a T,
}

/// Accepts the versioned envelope and the bare documents written before
/// versioning existed.
#[derive(Deserialize)]
#[serde(untagged)]
enum Stored<T> {
    Versioned { version: u32, items: T },
    Legacy(T),
}

/// Read and decode the record under `key`. `Ok(None)` when absent.
pub fn read_record<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    let Some(bytes) = store.get(key)? else {
        return Ok(None);
    };

    let stored: Stored<T> = serde_json::from_slice(&bytes)
        .with_context(|| format!("stored '{}' is not a readable record", key))?;

    match stored {
        Stored::Versioned { version, items } => {
            if version > RECORD_VERSION {
                bail!(
                    "stored '{}' has format version {}, newest supported is {}",
                    key,
                    version,
                    RECORD_VERSION
                );
            }
            Ok(Some(items))
        }
        Stored::Legacy(items) => Ok(Some(items)),
    }
}

/// Encode `items` and overwrite the record under `key`.
pub fn write_record<T: Serialize>(store: &dyn KvStore, key: &str, items: &T) -> Result<()> {
    let bytes = serde_json::to_vec(&Envelope {
        version: RECORD_VERSION,
        items,
    })
    .with_context(|| format!("failed to encode '{}'", key))?;
    store.put(key, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn writes_versioned_envelope() {
        let store = MemoryStore::new();
        write_record(&store, "peers", &vec!["a", "b"]).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&store.get("peers").unwrap().unwrap()).unwrap();
        assert_eq!(raw["version"], RECORD_VERSION);
        assert_eq!(raw["items"], serde_json::json!(["a", "b"]));

        let back: Option<Vec<String>> = read_record(&store, "peers").unwrap();
        assert_eq!(back, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn reads_unversioned_legacy_value() {
        let store = MemoryStore::new();
        store.put("peers", br#"["a"]"#).unwrap();

        let back: Option<Vec<String>> = read_record(&store, "peers").unwrap();
        assert_eq!(back, Some(vec!["a".to_string()]));
    }

    #[test]
    fn rejects_newer_version() {
        let store = MemoryStore::new();
        store.put("peers", br#"{"version": 99, "items": []}"#).unwrap();

        let result: Result<Option<Vec<String>>> = read_record(&store, "peers");
        assert!(result.is_err());
    }

    #[test]
    fn missing_key_is_none() {
        let store = MemoryStore::new();
        let back: Option<Vec<String>> = read_record(&store, "messages").unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn garbage_is_an_error() {
        let store = MemoryStore::new();
        store.put("messages", b"not json").unwrap();
        let result: Result<Option<Vec<String>>> = read_record(&store, "messages");
        assert!(result.is_err());
    }
}
