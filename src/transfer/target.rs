//! Target side of a transfer: the new device receiving the identity.
//!
//! ```text
//! Idle ─claim(code)─▶ CodeEntered ─▶ Waiting ─(poll: approved)─▶ PinRequired ─import(pin)─▶ Imported
//!                                       │                             │  ▲
//!                                       │                             └──┘ wrong PIN
//!                                       └──▶ Cancelled | Expired
//! ```
//!
//! The PIN is the secret shared out of band by the user; the code only
//! routes to the transfer record.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::api::TransferApi;
use super::error::{Result, TransferError};
use super::poll::PollHandle;
use super::types::{validate_code, ClaimResponse, TransferStatus};
use crate::config::CoreConfig;
use crate::crypto::{PinBackupFile, PinCipher};
use crate::identity::{Identity, KeyStore};

/// Observable state of the target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    /// No transfer in progress.
    Idle,
    /// Code accepted locally; claim in flight.
    CodeEntered,
    /// Claimed; polling for the source's approval.
    Waiting {
        /// Transfer id.
        transfer_id: String,
        /// Device that created the transfer, if reported.
        source_device: Option<String>,
    },
    /// Encrypted identity received; waiting for the user's PIN.
    PinRequired {
        /// Transfer id.
        transfer_id: String,
    },
    /// Identity decrypted and installed.
    Imported {
        /// Hex public key of the installed identity.
        public_key: String,
    },
    /// Cancelled by either device.
    Cancelled,
    /// The code expired.
    Expired,
}

impl TargetState {
    /// Returns the state name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CodeEntered => "code_entered",
            Self::Waiting { .. } => "waiting",
            Self::PinRequired { .. } => "pin_required",
            Self::Imported { .. } => "imported",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Returns whether the flow has ended.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Imported { .. } | Self::Cancelled | Self::Expired)
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::CodeEntered => 1,
            Self::Waiting { .. } => 2,
            Self::PinRequired { .. } => 3,
            Self::Imported { .. } | Self::Cancelled | Self::Expired => 4,
        }
    }
}

struct Shared {
    api: Arc<dyn TransferApi>,
    state: watch::Sender<TargetState>,
    received: Mutex<Option<PinBackupFile>>,
}

impl Shared {
    fn advance(&self, next: TargetState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || next.rank() <= current.rank() {
                return false;
            }
            debug!(from = current.name(), to = next.name(), "target transfer state");
            *current = next;
            true
        })
    }

    fn lock_received(&self) -> MutexGuard<'_, Option<PinBackupFile>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_once(&self, transfer_id: &str) -> ControlFlow<()> {
        let waiting = matches!(
            &*self.state.borrow(),
            TargetState::Waiting { transfer_id: id, .. } if id == transfer_id
        );
        if !waiting {
            return ControlFlow::Break(());
        }

        match self.api.receive_transfer(transfer_id).await {
            Ok(response) => match (response.status, response.encrypted_identity) {
                (_, Some(file)) => {
                    *self.lock_received() = Some(file);
                    self.advance(TargetState::PinRequired {
                        transfer_id: transfer_id.to_string(),
                    });
                    info!(transfer_id, "encrypted identity received");
                    ControlFlow::Break(())
                }
                (TransferStatus::Cancelled, None) => {
                    self.advance(TargetState::Cancelled);
                    ControlFlow::Break(())
                }
                (TransferStatus::Expired, None) => {
                    self.advance(TargetState::Expired);
                    ControlFlow::Break(())
                }
                (TransferStatus::Completed, None) => {
                    // Delivered to some other poll; this device cannot get it again.
                    warn!(transfer_id, "transfer completed without delivery");
                    self.advance(TargetState::Cancelled);
                    ControlFlow::Break(())
                }
                (TransferStatus::Pending | TransferStatus::Claimed | TransferStatus::Approved, None) => {
                    ControlFlow::Continue(())
                }
            },
            Err(TransferError::Expired) => {
                info!(transfer_id, "transfer code expired");
                self.advance(TargetState::Expired);
                ControlFlow::Break(())
            }
            Err(TransferError::Cancelled) => {
                self.advance(TargetState::Cancelled);
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!(transfer_id, error = %e, "transfer receive poll failed");
                ControlFlow::Continue(())
            }
        }
    }
}

/// Drives the target side of a transfer.
///
/// Holds at most one poll task; dropping the coordinator stops it.
pub struct TargetTransfer {
    shared: Arc<Shared>,
    keys: Arc<KeyStore>,
    interval: Duration,
    poll: Mutex<Option<PollHandle>>,
}

impl TargetTransfer {
    /// Creates an idle coordinator.
    #[must_use]
    pub fn new(api: Arc<dyn TransferApi>, keys: Arc<KeyStore>, config: &CoreConfig) -> Self {
        let (state, _) = watch::channel(TargetState::Idle);
        Self {
            shared: Arc::new(Shared {
                api,
                state,
                received: Mutex::new(None),
            }),
            keys,
            interval: config.poll_interval(),
            poll: Mutex::new(None),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TargetState {
        self.shared.state.borrow().clone()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TargetState> {
        self.shared.state.subscribe()
    }

    /// Returns whether a poll task is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.lock_poll()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Claims the transfer identified by `code` and starts polling for the
    /// source's approval.
    ///
    /// Malformed codes are rejected without contacting the service. A
    /// rejected claim returns to `Idle` so the user can re-enter the code.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidCode`], [`TransferError::Expired`],
    /// `InvalidState` while another transfer is active, or the service error.
    pub async fn claim(
        &self,
        code: &str,
        device_name: &str,
        platform: &str,
    ) -> Result<ClaimResponse> {
        let code = code.trim();
        validate_code(code)?;

        let current = self.state();
        if !matches!(current, TargetState::Idle) && !current.is_terminal() {
            return Err(TransferError::InvalidState {
                operation: "claim",
                state: current.name(),
            });
        }

        self.shared.lock_received().take();
        self.shared.state.send_replace(TargetState::CodeEntered);

        match self.shared.api.claim_transfer(code, device_name, platform).await {
            Ok(claim) => {
                self.shared.advance(TargetState::Waiting {
                    transfer_id: claim.transfer_id.clone(),
                    source_device: claim.source_device.clone(),
                });
                info!(transfer_id = %claim.transfer_id, "transfer claimed");
                self.start_polling(claim.transfer_id.clone());
                Ok(claim)
            }
            Err(TransferError::Expired) => {
                self.shared.advance(TargetState::Expired);
                Err(TransferError::Expired)
            }
            Err(e) => {
                debug!(error = %e, "claim rejected");
                self.shared.state.send_replace(TargetState::Idle);
                Err(e)
            }
        }
    }

    /// Decrypts the received identity with `pin`, installs it and stores a
    /// fresh PIN check.
    ///
    /// A wrong PIN leaves the coordinator in `PinRequired` with nothing
    /// installed, so the user can retry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless an identity was received,
    /// `WrongPinOrCorrupted` for a wrong PIN, or a storage error.
    pub async fn import(&self, pin: Zeroizing<String>) -> Result<Arc<Identity>> {
        let transfer_id = match self.state() {
            TargetState::PinRequired { transfer_id } => transfer_id,
            other => {
                return Err(TransferError::InvalidState {
                    operation: "import",
                    state: other.name(),
                })
            }
        };

        let file = self
            .shared
            .lock_received()
            .clone()
            .ok_or(TransferError::InvalidState {
                operation: "import",
                state: "pin_required",
            })?;

        let recovered = match PinCipher::decrypt_identity_async(file, pin.clone()).await {
            Ok(recovered) => recovered,
            Err(e) => {
                debug!(%transfer_id, "could not open received identity");
                return Err(e.into());
            }
        };

        // A cancel may have landed while the key was being derived.
        let still_required = matches!(
            &*self.shared.state.borrow(),
            TargetState::PinRequired { transfer_id: id } if *id == transfer_id
        );
        if !still_required {
            return Err(TransferError::InvalidState {
                operation: "import",
                state: self.state().name(),
            });
        }

        let identity = self.keys.install(recovered.identity)?;
        self.keys.set_pin_async(pin).await?;
        self.shared.lock_received().take();
        self.shared.advance(TargetState::Imported {
            public_key: identity.public_key_hex(),
        });
        info!(%transfer_id, public_key = %identity.public_key_hex(), "identity imported");
        Ok(identity)
    }

    /// Cancels a waiting transfer, or abandons a received one.
    ///
    /// The local state moves to `Cancelled` even if the service call fails.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in other states, or the service error.
    pub async fn cancel(&self) -> Result<()> {
        let (transfer_id, was_waiting) = match self.state() {
            TargetState::Waiting { transfer_id, .. } => (transfer_id, true),
            TargetState::PinRequired { transfer_id } => (transfer_id, false),
            other => {
                return Err(TransferError::InvalidState {
                    operation: "cancel",
                    state: other.name(),
                })
            }
        };

        self.stop_polling();
        self.shared.lock_received().take();
        self.shared.advance(TargetState::Cancelled);
        info!(%transfer_id, "transfer cancelled");

        // Once delivered there is nothing left to cancel server-side.
        if was_waiting {
            self.shared.api.cancel_transfer(&transfer_id).await?;
        }
        Ok(())
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
        *self.lock_poll() = Some(handle);
    }

    fn stop_polling(&self) {
        self.lock_poll().take();
    }

    fn lock_poll(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.poll.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TargetTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetTransfer")
            .field("state", &self.state().name())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
