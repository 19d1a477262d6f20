//! Runtime configuration for the core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{MAX_PBKDF2_ITERATIONS, PBKDF2_ITERATIONS};

/// Default interval between transfer status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default interval between periodic PIN recall checks (days).
pub const DEFAULT_PIN_CHECK_DAYS: u32 = 30;

/// Tunables shared by the coordinators.
///
/// Security parameters cannot be weakened through configuration: the KDF
/// iteration count only ever applies to newly written files, and values below
/// [`PBKDF2_ITERATIONS`] are raised to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Transfer poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// PBKDF2 iterations for newly written backups.
    pub kdf_iterations: u32,

    /// Days between periodic PIN recall checks.
    pub pin_check_interval_days: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            kdf_iterations: PBKDF2_ITERATIONS,
            pin_check_interval_days: DEFAULT_PIN_CHECK_DAYS,
        }
    }
}

impl CoreConfig {
    /// Parses configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns the poll interval, never shorter than 100ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    /// Returns the effective KDF iteration count for new files.
    ///
    /// Clamped to the range this build can read back.
    #[must_use]
    pub fn kdf_iterations(&self) -> u32 {
        self.kdf_iterations
            .clamp(PBKDF2_ITERATIONS, MAX_PBKDF2_ITERATIONS)
    }

    /// Returns the PIN check interval.
    #[must_use]
    pub fn pin_check_interval(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.pin_check_interval_days))
    }
}
