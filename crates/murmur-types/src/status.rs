use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation of an address on the ledger.
///
/// This is a liveness proxy, not an acknowledgment: `active` only says the
/// address has some recent ledger activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub active: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

impl ActivitySample {
    pub fn active(last_active_at: Option<DateTime<Utc>>) -> Self {
        Self {
            active: true,
            last_active_at,
            checked_at: Utc::now(),
        }
    }

    pub fn inactive() -> Self {
        Self {
            active: false,
            last_active_at: None,
            checked_at: Utc::now(),
        }
    }
}

/// Delivery state of a sent message. Only ever moves forward:
/// `Sent` -> `Delivered` -> `Read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    /// Recipient showed ledger activity after the send. Carries the sample
    /// so readers know how weak the signal is.
    Delivered { evidence: ActivitySample },
    Read,
}

impl DeliveryStatus {
    /// Position in the forward-only ordering.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered { .. } => 1,
            Self::Read => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered { .. } => "delivered",
            Self::Read => "read",
        }
    }

    pub fn precedes(&self, other: &DeliveryStatus) -> bool {
        self.rank() < other.rank()
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}
