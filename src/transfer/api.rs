//! Transfer broker service seam.

use async_trait::async_trait;

use super::error::Result;
use super::types::{ClaimResponse, CreatedTransfer, ReceiveResponse, TransferStatusResponse};
use crate::crypto::PinBackupFile;

/// Server endpoints brokering a transfer between two devices.
///
/// Implementations report an elapsed code TTL as
/// [`TransferError::Expired`](super::TransferError::Expired) from any call.
#[async_trait]
pub trait TransferApi: Send + Sync {
    /// Opens a transfer for `device_id` and issues a code.
    async fn create_transfer(&self, device_id: &str) -> Result<CreatedTransfer>;

    /// Source-side status poll.
    async fn transfer_status(&self, transfer_id: &str) -> Result<TransferStatusResponse>;

    /// Claims the transfer identified by `code` for this device.
    async fn claim_transfer(
        &self,
        code: &str,
        device_name: &str,
        platform: &str,
    ) -> Result<ClaimResponse>;

    /// Attaches the PIN-encrypted identity to a claimed transfer.
    async fn approve_transfer(&self, transfer_id: &str, file: &PinBackupFile) -> Result<()>;

    /// Target-side poll; returns the encrypted identity once approved.
    async fn receive_transfer(&self, transfer_id: &str) -> Result<ReceiveResponse>;

    /// Cancels an open transfer.
    async fn cancel_transfer(&self, transfer_id: &str) -> Result<()>;
}
