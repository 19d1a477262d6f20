//! Source side of a transfer: the device that already holds the identity.
//!
//! ```text
//! Idle ─start─▶ Pending ─(poll: claimed)─▶ Claimed ─approve(pin)─▶ Approved ─(poll)─▶ Completed
//!                  │                           │
//!                  └────────cancel─────────────┴──▶ Cancelled
//!
//! any non-terminal ─(code TTL elapsed)─▶ Expired
//! ```

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::api::TransferApi;
use super::error::{Result, TransferError};
use super::poll::PollHandle;
use super::types::{CreatedTransfer, TargetDevice, TransferStatus};
use crate::config::CoreConfig;
use crate::crypto::AccountMeta;
use crate::identity::{Identity, KeyStore};

/// Observable state of the source device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    /// No transfer in progress.
    Idle,
    /// Code issued; polling for a claim.
    Pending {
        /// Transfer id.
        transfer_id: String,
        /// Code to show the user.
        code: String,
        /// When the code stops working.
        expires_at: DateTime<Utc>,
    },
    /// A target claimed the code; waiting for the user's PIN.
    Claimed {
        /// Transfer id.
        transfer_id: String,
        /// Claiming device, if reported.
        target_device: Option<TargetDevice>,
    },
    /// Encrypted identity sent; polling for delivery.
    Approved {
        /// Transfer id.
        transfer_id: String,
    },
    /// Target received the encrypted identity.
    Completed,
    /// Cancelled by either device.
    Cancelled,
    /// The code expired.
    Expired,
}

impl SourceState {
    /// Returns the state name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending { .. } => "pending",
            Self::Claimed { .. } => "claimed",
            Self::Approved { .. } => "approved",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Returns whether the flow has ended.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Returns the active transfer id, if any.
    #[must_use]
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::Pending { transfer_id, .. }
            | Self::Claimed { transfer_id, .. }
            | Self::Approved { transfer_id } => Some(transfer_id),
            Self::Idle | Self::Completed | Self::Cancelled | Self::Expired => None,
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Pending { .. } => 1,
            Self::Claimed { .. } => 2,
            Self::Approved { .. } => 3,
            Self::Completed | Self::Cancelled | Self::Expired => 4,
        }
    }
}

struct Shared {
    api: Arc<dyn TransferApi>,
    state: watch::Sender<SourceState>,
}

impl Shared {
    /// Moves forward to `next` unless the flow already ended or is further
    /// along. Returns whether the state changed.
    fn advance(&self, next: SourceState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || next.rank() <= current.rank() {
                return false;
            }
            debug!(from = current.name(), to = next.name(), "source transfer state");
            *current = next;
            true
        })
    }

    async fn poll_once(&self, transfer_id: &str) -> ControlFlow<()> {
        let active = self.state.borrow().transfer_id() == Some(transfer_id);
        if !active {
            return ControlFlow::Break(());
        }

        match self.api.transfer_status(transfer_id).await {
            Ok(response) => match response.status {
                TransferStatus::Pending => ControlFlow::Continue(()),
                TransferStatus::Claimed => {
                    // Stays claimed until the user enters their PIN.
                    let moved = self.advance(SourceState::Claimed {
                        transfer_id: transfer_id.to_string(),
                        target_device: response.target_device,
                    });
                    if moved {
                        info!(transfer_id, "transfer claimed by target device");
                    }
                    ControlFlow::Break(())
                }
                TransferStatus::Approved => ControlFlow::Continue(()),
                TransferStatus::Completed => {
                    if self.advance(SourceState::Completed) {
                        info!(transfer_id, "transfer completed");
                    }
                    ControlFlow::Break(())
                }
                TransferStatus::Cancelled => {
                    self.advance(SourceState::Cancelled);
                    ControlFlow::Break(())
                }
                TransferStatus::Expired => {
                    self.advance(SourceState::Expired);
                    ControlFlow::Break(())
                }
            },
            Err(TransferError::Expired) => {
                info!(transfer_id, "transfer code expired");
                self.advance(SourceState::Expired);
                ControlFlow::Break(())
            }
            Err(TransferError::Cancelled) => {
                self.advance(SourceState::Cancelled);
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!(transfer_id, error = %e, "transfer status poll failed");
                ControlFlow::Continue(())
            }
        }
    }
}

/// Drives the source side of a transfer.
///
/// Holds at most one poll task; dropping the coordinator stops it.
pub struct SourceTransfer {
    shared: Arc<Shared>,
    keys: Arc<KeyStore>,
    interval: Duration,
    poll: Mutex<Option<PollHandle>>,
}

impl SourceTransfer {
    /// Creates an idle coordinator.
    #[must_use]
    pub fn new(api: Arc<dyn TransferApi>, keys: Arc<KeyStore>, config: &CoreConfig) -> Self {
        let (state, _) = watch::channel(SourceState::Idle);
        Self {
            shared: Arc::new(Shared { api, state }),
            keys,
            interval: config.poll_interval(),
            poll: Mutex::new(None),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SourceState {
        self.shared.state.borrow().clone()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SourceState> {
        self.shared.state.subscribe()
    }

    /// Returns whether a poll task is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.lock_poll()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Opens a new transfer and starts polling for a claim.
    ///
    /// Allowed from `Idle` or any terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoIdentity`](crate::identity::IdentityError::NoIdentity)
    /// if there is nothing to transfer, `InvalidState` while another transfer
    /// is active, or the service error.
    pub async fn start(&self, device_id: &str) -> Result<CreatedTransfer> {
        self.keys.require()?;
        let current = self.state();
        if !matches!(current, SourceState::Idle) && !current.is_terminal() {
            return Err(TransferError::InvalidState {
                operation: "start",
                state: current.name(),
            });
        }

        let created = self.shared.api.create_transfer(device_id).await?;
        self.shared.state.send_replace(SourceState::Pending {
            transfer_id: created.id.clone(),
            code: created.code.clone(),
            expires_at: created.expires_at,
        });
        info!(transfer_id = %created.id, "transfer started");

        self.start_polling(created.id.clone());
        Ok(created)
    }

    /// Encrypts the identity under `pin` and attaches it to the claimed
    /// transfer, then polls for delivery.
    ///
    /// If the service rejects the approval the transfer is cancelled and a
    /// fresh one must be started.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless claimed, [`TransferError::Expired`] if
    /// the code expired, or the service error.
    pub async fn approve(&self, account: AccountMeta, pin: Zeroizing<String>) -> Result<()> {
        let transfer_id = match self.state() {
            SourceState::Claimed { transfer_id, .. } => transfer_id,
            other => {
                return Err(TransferError::InvalidState {
                    operation: "approve",
                    state: other.name(),
                })
            }
        };

        let identity = self.keys.require()?;
        let file = self
            .keys
            .cipher()
            .encrypt_identity_async(Identity::clone(&identity), account, pin)
            .await?;

        // A cancel or expiry may have landed while the key was being derived.
        let still_claimed = matches!(
            &*self.shared.state.borrow(),
            SourceState::Claimed { transfer_id: id, .. } if *id == transfer_id
        );
        if !still_claimed {
            return Err(TransferError::InvalidState {
                operation: "approve",
                state: self.state().name(),
            });
        }

        match self.shared.api.approve_transfer(&transfer_id, &file).await {
            Ok(()) => {
                self.shared.advance(SourceState::Approved {
                    transfer_id: transfer_id.clone(),
                });
                info!(%transfer_id, "transfer approved");
                self.start_polling(transfer_id);
                Ok(())
            }
            Err(TransferError::Expired) => {
                self.shared.advance(SourceState::Expired);
                Err(TransferError::Expired)
            }
            Err(e) => {
                warn!(%transfer_id, error = %e, "approval failed, cancelling transfer");
                if let Err(cancel_err) = self.shared.api.cancel_transfer(&transfer_id).await {
                    debug!(%transfer_id, error = %cancel_err, "server-side cancel failed");
                }
                self.shared.advance(SourceState::Cancelled);
                Err(e)
            }
        }
    }

    /// Cancels a pending or claimed transfer.
    ///
    /// The local state moves to `Cancelled` even if the service call fails.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in other states, or the service error.
    pub async fn cancel(&self) -> Result<()> {
        let transfer_id = match self.state() {
            SourceState::Pending { transfer_id, .. } | SourceState::Claimed { transfer_id, .. } => {
                transfer_id
            }
            other => {
                return Err(TransferError::InvalidState {
                    operation: "cancel",
                    state: other.name(),
                })
            }
        };

        self.stop_polling();
        self.shared.advance(SourceState::Cancelled);
        info!(%transfer_id, "transfer cancelled");
        self.shared.api.cancel_transfer(&transfer_id).await
    }

    /// Stops polling without changing the state, e.g. when the view closes.
    pub fn dismiss(&self) {
        self.stop_polling();
    }

    fn start_polling(&self, transfer_id: String) {
        let shared = Arc::clone(&self.shared);
        let handle = PollHandle::spawn(self.interval, move || {
            let shared = Arc::clone(&shared);
            let transfer_id = transfer_id.clone();
            async move { shared.poll_once(&transfer_id).await }
        });
        // Replacing the handle aborts the previous task.
        *self.lock_poll() = Some(handle);
    }

    fn stop_polling(&self) {
        self.lock_poll().take();
    }

    fn lock_poll(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.poll.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SourceTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceTransfer")
            .field("state", &self.state().name())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
