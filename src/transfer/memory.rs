//! In-memory transfer broker for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;

use super::api::TransferApi;
use super::error::{Result, TransferError};
use super::types::{
    ClaimResponse, CreatedTransfer, ReceiveResponse, TargetDevice, TransferStatus,
    TransferStatusResponse,
};
use crate::crypto::PinBackupFile;

/// Default code lifetime.
pub const DEFAULT_TTL_MINUTES: i64 = 10;

#[derive(Debug)]
struct Record {
    code: String,
    source_device_id: String,
    status: TransferStatus,
    target_device: Option<TargetDevice>,
    encrypted_identity: Option<PinBackupFile>,
    expires_at: chrono::DateTime<Utc>,
}

impl Record {
    fn refresh_expiry(&mut self) {
        if !self.status.is_terminal() && Utc::now() >= self.expires_at {
            self.status = TransferStatus::Expired;
        }
    }

    fn advance(&mut self, next: TransferStatus, operation: &'static str) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TransferError::InvalidState {
                operation,
                state: self.status.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A single broker shared by the source and target devices of a test.
///
/// This implementation is NOT secure and should only be used in tests.
#[derive(Debug)]
pub struct MemoryTransferBroker {
    transfers: Mutex<HashMap<String, Record>>,
    next_id: AtomicU64,
    ttl: Duration,
}

impl Default for MemoryTransferBroker {
    fn default() -> Self {
        Self::with_ttl(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}

impl MemoryTransferBroker {
    /// Creates an empty broker with the default code lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty broker whose codes live for `ttl`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            ttl,
        }
    }

    /// Forces a transfer into the expired state.
    pub fn expire(&self, transfer_id: &str) {
        if let Some(record) = self.lock().get_mut(transfer_id) {
            record.status = TransferStatus::Expired;
        }
    }

    /// Returns a transfer's current status.
    #[must_use]
    pub fn status_of(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.lock().get_mut(transfer_id).map(|record| {
            record.refresh_expiry();
            record.status
        })
    }

    /// Returns the code issued for a transfer.
    #[must_use]
    pub fn code_of(&self, transfer_id: &str) -> Option<String> {
        self.lock().get(transfer_id).map(|record| record.code.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_record<T>(
        &self,
        transfer_id: &str,
        f: impl FnOnce(&mut Record) -> Result<T>,
    ) -> Result<T> {
        let mut transfers = self.lock();
        let record = transfers
            .get_mut(transfer_id)
            .ok_or_else(|| TransferError::api(format!("unknown transfer {transfer_id}")))?;
        record.refresh_expiry();
        if record.status == TransferStatus::Expired {
            return Err(TransferError::Expired);
        }
        f(record)
    }
}

#[async_trait]
impl TransferApi for MemoryTransferBroker {
    async fn create_transfer(&self, device_id: &str) -> Result<CreatedTransfer> {
        let id = format!("transfer-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let expires_at = Utc::now() + self.ttl;

        self.lock().insert(
            id.clone(),
            Record {
                code: code.clone(),
                source_device_id: device_id.to_string(),
                status: TransferStatus::Pending,
                target_device: None,
                encrypted_identity: None,
                expires_at,
            },
        );
        Ok(CreatedTransfer {
            id,
            code,
            expires_at,
        })
    }

    async fn transfer_status(&self, transfer_id: &str) -> Result<TransferStatusResponse> {
        self.with_record(transfer_id, |record| {
            Ok(TransferStatusResponse {
                status: record.status,
                target_device: record.target_device.clone(),
            })
        })
    }

    async fn claim_transfer(
        &self,
        code: &str,
        device_name: &str,
        platform: &str,
    ) -> Result<ClaimResponse> {
        let mut transfers = self.lock();
        let (id, record) = transfers
            .iter_mut()
            .find(|(_, record)| record.code == code && record.status == TransferStatus::Pending)
            .ok_or(TransferError::InvalidCode)?;

        record.refresh_expiry();
        if record.status == TransferStatus::Expired {
            return Err(TransferError::Expired);
        }
        record.advance(TransferStatus::Claimed, "claim")?;
        record.target_device = Some(TargetDevice {
            name: device_name.to_string(),
            platform: platform.to_string(),
        });

        Ok(ClaimResponse {
            transfer_id: id.clone(),
            source_user: None,
            source_device: Some(record.source_device_id.clone()),
        })
    }

    async fn approve_transfer(&self, transfer_id: &str, file: &PinBackupFile) -> Result<()> {
        self.with_record(transfer_id, |record| {
            record.advance(TransferStatus::Approved, "approve")?;
            record.encrypted_identity = Some(file.clone());
            Ok(())
        })
    }

    async fn receive_transfer(&self, transfer_id: &str) -> Result<ReceiveResponse> {
        self.with_record(transfer_id, |record| {
            let encrypted_identity = if record.status == TransferStatus::Approved {
                record.advance(TransferStatus::Completed, "receive")?;
                record.encrypted_identity.take()
            } else {
                None
            };
            Ok(ReceiveResponse {
                status: record.status,
                encrypted_identity,
            })
        })
    }

    async fn cancel_transfer(&self, transfer_id: &str) -> Result<()> {
        self.with_record(transfer_id, |record| {
            record.advance(TransferStatus::Cancelled, "cancel")
        })
    }
}
