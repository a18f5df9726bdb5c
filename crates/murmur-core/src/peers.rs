use std::sync::Arc;

use chrono::Utc;
use murmur_db::{KvStore, keys, read_record, write_record};
use murmur_types::{Address, Peer};
use tracing::{debug, warn};

use crate::error::{MurmurError, Result};
use crate::profile::ProfileStore;

/// Known correspondents, most recently touched first, bounded by `cap`.
///
/// Aliases are not stored on the peers themselves; they are overlaid from
/// the profile's alias map on every read.
pub struct PeerRegistry {
    kv: Arc<dyn KvStore>,
    profile: Arc<ProfileStore>,
    cap: usize,
    peers: Vec<Peer>,
}

impl PeerRegistry {
    pub fn open(kv: Arc<dyn KvStore>, profile: Arc<ProfileStore>, cap: usize) -> Result<Self> {
        let mut peers: Vec<Peer> = read_record(kv.as_ref(), keys::PEERS)?.unwrap_or_default();
        // Stable sort keeps the stored order among equal timestamps.
        peers.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        peers.truncate(cap.max(1));
        for peer in &mut peers {
            peer.display_alias = None;
        }

        debug!("Loaded {} peers", peers.len());
        Ok(Self {
            kv,
            profile,
            cap: cap.max(1),
            peers,
        })
    }

    /// Record a local send to `address`: bump the count, stamp now, move to
    /// the front and evict whatever falls past the cap.
    ///
    /// On a persistence error the in-memory update stands and the error is
    /// returned.
    pub fn touch(&mut self, address: &Address) -> Result<Peer> {
        let mut peer = match self.peers.iter().position(|p| &p.address == address) {
            Some(pos) => self.peers.remove(pos),
            None => Peer::new(address.clone()),
        };
        peer.interaction_count += 1;
        peer.last_seen_at = Utc::now();
        self.peers.insert(0, peer);

        if self.peers.len() > self.cap {
            for evicted in self.peers.drain(self.cap..) {
                debug!("Evicted peer {}", evicted.address.short());
            }
        }

        self.persist()?;
        Ok(self.overlay(self.peers[0].clone()))
    }

    /// Peers by recency, never more than the cap.
    pub fn list(&self) -> Vec<Peer> {
        self.peers.iter().cloned().map(|p| self.overlay(p)).collect()
    }

    pub fn get(&self, address: &Address) -> Option<Peer> {
        self.peers
            .iter()
            .find(|p| &p.address == address)
            .cloned()
            .map(|p| self.overlay(p))
    }

    /// Case-insensitive substring match on address, username and alias.
    /// An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<Peer> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.list();
        }

        self.list()
            .into_iter()
            .filter(|p| {
                p.address.as_str().to_lowercase().contains(&needle)
                    || p.username.as_deref().is_some_and(|u| u.to_lowercase().contains(&needle))
                    || p.display_alias.as_deref().is_some_and(|a| a.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Write a local alias into the profile. Visible on the next `list()`.
    pub fn set_alias(&self, address: &Address, alias: &str) -> Result<()> {
        self.profile.set_alias(address, alias)
    }

    /// Remember the username a peer published. Unknown peers are ignored and
    /// recency is left alone. Returns whether anything changed.
    pub fn record_username(&mut self, address: &Address, username: &str) -> Result<bool> {
        let username = username.trim();
        let Some(peer) = self.peers.iter_mut().find(|p| &p.address == address) else {
            return Ok(false);
        };
        if username.is_empty() || peer.username.as_deref() == Some(username) {
            return Ok(false);
        }

        peer.username = Some(username.to_string());
        self.persist()?;
        Ok(true)
    }

    /// Alias, then username, then the truncated address.
    pub fn resolve_display_label(&self, peer: &Peer) -> String {
        self.profile
            .alias_for(&peer.address)
            .or_else(|| peer.display_alias.clone())
            .filter(|a| !a.trim().is_empty())
            .or_else(|| peer.username.clone().filter(|u| !u.trim().is_empty()))
            .unwrap_or_else(|| peer.address.short())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn overlay(&self, mut peer: Peer) -> Peer {
        peer.display_alias = self.profile.alias_for(&peer.address);
        peer
    }

    fn persist(&self) -> Result<()> {
        write_record(self.kv.as_ref(), keys::PEERS, &self.peers).map_err(|e| {
            warn!("Failed to persist peers: {:#}", e);
            MurmurError::Persistence(e)
        })
    }
}
