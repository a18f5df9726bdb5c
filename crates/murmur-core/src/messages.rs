use std::collections::HashMap;
use std::sync::Arc;

use murmur_db::{KvStore, keys, read_record, write_record};
use murmur_types::{Address, DeliveryStatus, Message};
use tracing::{debug, warn};

use crate::error::{MurmurError, Result};

/// Which slice of the log to read.
#[derive(Debug, Clone, Copy)]
pub enum MessageFilter<'a> {
    All,
    BySender(&'a Address),
    ByRecipient(&'a Address),
    /// Sender or recipient is the address.
    Involving(&'a Address),
}

impl MessageFilter<'_> {
    fn matches(&self, message: &Message) -> bool {
        match self {
            Self::All => true,
            Self::BySender(address) => &message.sender == *address,
            Self::ByRecipient(address) => &message.recipient == *address,
            Self::Involving(address) => message.involves(address),
        }
    }
}

/// Insertion-ordered message log with unique ids.
///
/// The in-memory log is the source of truth for the session; the backing
/// store is a whole-log copy that may lag behind after a failed write
/// (`is_dirty`).
pub struct MessageStore {
    kv: Arc<dyn KvStore>,
    log: Vec<Message>,
    index: HashMap<String, usize>,
    dirty: bool,
}

impl MessageStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            log: Vec::new(),
            index: HashMap::new(),
            dirty: false,
        }
    }

    /// Open the store and load whatever log the backing store holds.
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
        let mut store = Self::new(kv);
        store.load()?;
        Ok(store)
    }

    /// Replace the in-memory log with the persisted one.
    pub fn load(&mut self) -> Result<()> {
        let stored: Vec<Message> = read_record(self.kv.as_ref(), keys::MESSAGES)?.unwrap_or_default();

        self.log.clear();
        self.index.clear();
        for message in stored {
            self.insert(message);
        }
        self.dirty = false;

        debug!("Loaded {} messages", self.log.len());
        Ok(())
    }

    /// Overwrite the persisted log with the full in-memory log.
    pub fn persist(&mut self) -> Result<()> {
        match write_record(self.kv.as_ref(), keys::MESSAGES, &self.log) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                warn!("Failed to persist message log: {:#}", e);
                Err(MurmurError::Persistence(e))
            }
        }
    }

    /// Add a message and persist the log.
    ///
    /// A duplicate id replaces the stored entry in place rather than adding
    /// a second one. On a persistence error the message stays in memory and
    /// the error is returned.
    pub fn append(&mut self, message: Message) -> Result<()> {
        self.insert(message);
        self.dirty = true;
        self.persist()
    }

    fn insert(&mut self, mut message: Message) {
        match self.index.get(&message.id) {
            Some(&pos) => {
                // Replacing must not walk the status backwards.
                let existing = &self.log[pos];
                if message.status.precedes(&existing.status) {
                    message.status = existing.status.clone();
                }
                self.log[pos] = message;
            }
            None => {
                self.index.insert(message.id.clone(), self.log.len());
                self.log.push(message);
            }
        }
    }

    pub fn all(&self, filter: MessageFilter<'_>) -> Vec<Message> {
        self.log.iter().filter(|m| filter.matches(m)).cloned().collect()
    }

    /// Messages this identity sent or received.
    pub fn for_identity(&self, identity: &Address) -> Vec<Message> {
        self.all(MessageFilter::Involving(identity))
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.log[pos])
    }

    /// `(id, recipient)` of every message `local` sent that is still `Sent`.
    pub fn pending_sent(&self, local: &Address) -> Vec<(String, Address)> {
        self.log
            .iter()
            .filter(|m| m.is_from(local) && m.status.is_sent())
            .map(|m| (m.id.clone(), m.recipient.clone()))
            .collect()
    }

    /// Move a message forward. Returns whether anything changed.
    ///
    /// Moving to the current state is a no-op; moving backwards or naming
    /// an unknown id is an `InvalidTransition` and leaves the log untouched.
    /// Does not persist; callers batch changes and call [`persist`](Self::persist).
    pub fn advance_status(&mut self, id: &str, new_status: DeliveryStatus) -> Result<bool> {
        let Some(&pos) = self.index.get(id) else {
            return Err(MurmurError::InvalidTransition {
                id: id.to_string(),
                from: "unknown",
                to: new_status.name(),
            });
        };

        let message = &mut self.log[pos];
        if new_status.precedes(&message.status) {
            return Err(MurmurError::InvalidTransition {
                id: id.to_string(),
                from: message.status.name(),
                to: new_status.name(),
            });
        }
        if new_status.rank() == message.status.rank() {
            return Ok(false);
        }

        message.status = new_status;
        self.dirty = true;
        Ok(true)
    }

    /// True when the backing store is behind the in-memory log.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
