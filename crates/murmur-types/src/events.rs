use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::models::Message;
use crate::status::DeliveryStatus;

/// Events published by a session to snapshot readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// A message was added to the local log
    MessageAppended { message: Message },

    /// A message moved forward in the delivery state machine
    StatusChanged { id: String, status: DeliveryStatus },

    /// A peer was touched, aliased or evicted
    PeersChanged,

    /// The local profile was saved
    ProfileChanged { identity: Address },

    /// The session was torn down (identity disconnected)
    Closed,
}
