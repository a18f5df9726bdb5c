use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use murmur_db::{KvStore, keys, read_record, write_record};
use murmur_types::{Address, Profile};
use tracing::{info, warn};

use crate::error::{MurmurError, Result};

/// Holder of the single local profile.
///
/// Saves overwrite every field except `alias_map`, which is merged key-wise
/// with what is already stored.
pub struct ProfileStore {
    kv: Arc<dyn KvStore>,
    current: RwLock<Option<Profile>>,
}

impl ProfileStore {
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
        let current: Option<Profile> = read_record(kv.as_ref(), keys::PROFILE)?;
        Ok(Self {
            kv,
            current: RwLock::new(current),
        })
    }

    pub fn current(&self) -> Option<Profile> {
        self.read().ok().and_then(|guard| guard.clone())
    }

    /// Profile published by `address`. Only the local profile is known.
    pub fn fetch(&self, address: &Address) -> Option<Profile> {
        self.current().filter(|p| &p.identity == address)
    }

    pub fn alias_for(&self, address: &Address) -> Option<String> {
        self.read()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(|p| p.alias_map.get(address).cloned()))
    }

    pub fn aliases(&self) -> BTreeMap<Address, String> {
        self.current().map(|p| p.alias_map).unwrap_or_default()
    }

    /// Save `profile`, stamping `updated_at`. Returns the stored result.
    ///
    /// The in-memory profile is updated even when the write fails.
    pub fn save(&self, mut profile: Profile) -> Result<Profile> {
        let mut guard = self.write()?;

        if let Some(existing) = guard.as_ref() {
            let mut merged = existing.alias_map.clone();
            merged.extend(std::mem::take(&mut profile.alias_map));
            profile.alias_map = merged;
        }
        profile.updated_at = Utc::now();

        *guard = Some(profile.clone());
        self.persist(&profile)?;

        info!("Saved profile for {}", profile.identity);
        Ok(profile)
    }

    /// Set or clear (empty alias) the local label for `address`.
    pub fn set_alias(&self, address: &Address, alias: &str) -> Result<()> {
        let mut guard = self.write()?;
        let profile = guard.as_mut().ok_or(MurmurError::ProfileNotFound)?;

        let alias = alias.trim();
        if alias.is_empty() {
            profile.alias_map.remove(address);
        } else {
            profile.alias_map.insert(address.clone(), alias.to_string());
        }

        let snapshot = profile.clone();
        self.persist(&snapshot)
    }

    fn persist(&self, profile: &Profile) -> Result<()> {
        write_record(self.kv.as_ref(), keys::PROFILE, profile).map_err(|e| {
            warn!("Failed to persist profile: {:#}", e);
            MurmurError::Persistence(e)
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Option<Profile>>> {
        self.current
            .read()
            .map_err(|e| MurmurError::Persistence(anyhow::anyhow!("profile lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Option<Profile>>> {
        self.current
            .write()
            .map_err(|e| MurmurError::Persistence(anyhow::anyhow!("profile lock poisoned: {}", e)))
    }
}
