//! Transfer wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, TransferError};
use crate::crypto::PinBackupFile;

/// Number of digits in a transfer code.
pub const CODE_LENGTH: usize = 6;

/// Server-side status of a transfer.
///
/// Transitions only move forward:
///
/// ```text
/// pending ─▶ claimed ─▶ approved ─▶ completed
///    │          │           │
///    └──────────┴─▶ cancelled   (any non-terminal) ─▶ expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Code issued, waiting for a target device.
    Pending,
    /// Target device claimed the code.
    Claimed,
    /// Source attached the encrypted identity.
    Approved,
    /// Target received the encrypted identity.
    Completed,
    /// Cancelled by either device.
    Cancelled,
    /// Code TTL elapsed.
    Expired,
}

impl TransferStatus {
    /// Returns the status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Returns whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Returns whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Completed | Self::Cancelled | Self::Expired, _) => false,
            (_, Self::Expired)
            | (Self::Pending | Self::Claimed, Self::Cancelled)
            | (Self::Pending, Self::Claimed)
            | (Self::Claimed, Self::Approved)
            | (Self::Approved, Self::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The device that claimed a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDevice {
    /// User-visible device name.
    pub name: String,

    /// Platform string, e.g. "ios" or "web".
    pub platform: String,
}

/// Response to creating a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTransfer {
    /// Transfer id used for polling.
    pub id: String,

    /// Six-digit code shown to the user.
    pub code: String,

    /// When the code stops working.
    pub expires_at: DateTime<Utc>,
}

/// Response to a source-side status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatusResponse {
    /// Current status.
    pub status: TransferStatus,

    /// Claiming device, once claimed.
    #[serde(default)]
    pub target_device: Option<TargetDevice>,
}

/// Response to claiming a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    /// Transfer id used for polling.
    pub transfer_id: String,

    /// Account the identity belongs to.
    #[serde(default)]
    pub source_user: Option<String>,

    /// Device that created the transfer.
    #[serde(default)]
    pub source_device: Option<String>,
}

/// Response to a target-side receive poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResponse {
    /// Current status.
    pub status: TransferStatus,

    /// The PIN-encrypted identity, once approved.
    #[serde(default)]
    pub encrypted_identity: Option<PinBackupFile>,
}

/// Checks that `code` is exactly six ASCII digits.
///
/// # Errors
///
/// Returns [`TransferError::InvalidCode`] otherwise.
pub fn validate_code(code: &str) -> Result<()> {
    if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(TransferError::InvalidCode)
    }
}
