/// Murmur shared types.
///
/// Identity strings, the message/peer/profile data model and the delivery
/// state machine. Used by every other murmur crate; no I/O lives here.

pub mod address;
pub mod events;
pub mod models;
pub mod status;

pub use address::{Address, AddressError};
pub use events::SessionEvent;
pub use models::{AttachmentRef, Message, Peer, Profile, new_message_id};
pub use status::{ActivitySample, DeliveryStatus};
