//! Client-side messaging core: the message log and its delivery state
//! machine, known peers, the local profile and the background loop that
//! moves sent messages to delivered.

pub mod blobs;
pub mod config;
pub mod error;
pub mod identity;
pub mod messages;
pub mod oracle;
pub mod peers;
pub mod profile;
pub mod reconciler;
pub mod session;
pub mod timer;

#[cfg(test)]
pub(crate) mod test_support;

pub use blobs::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::Config;
pub use error::{MurmurError, Result};
pub use identity::{IdentityProvider, KeypairIdentity, WatchOnlyIdentity};
pub use messages::{MessageFilter, MessageStore};
pub use oracle::{ActivityOracle, RpcActivityOracle, ScriptedActivity, ScriptedOracle};
pub use peers::PeerRegistry;
pub use profile::ProfileStore;
pub use reconciler::{DeliveryReconciler, ReconcilerHandle, TickReport};
pub use session::{Attachment, Session};
pub use timer::{Debouncer, RecipientValidator};
