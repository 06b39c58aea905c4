//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [sync]
//! fetch_timeout_secs = 10
//! recurrence_horizon_days = 365
//! import_past_days = 365
//! import_future_days = 1825
//!
//! [booking]
//! lock_wait_ms = 5000
//! cancellation_policy = "owner_or_guest"
//!
//! [pricing]
//! weekend_days = ["Sat", "Sun"]
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub booking: BookingConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on fetching one feed.
    pub fetch_timeout_secs: u64,
    /// How far ahead recurring feed events are expanded.
    pub recurrence_horizon_days: u32,
    /// Feed blocks are only written for dates from this many days before
    /// the sync date up to `import_future_days` after it.
    pub import_past_days: u32,
    pub import_future_days: u32,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            recurrence_horizon_days: 365,
            import_past_days: 365,
            import_future_days: 1825,
            user_agent: concat!("stay-engine/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Who may cancel a confirmed booking. Pending bookings can always be
/// withdrawn by their guest and rejected by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    #[default]
    OwnerOrGuest,
    OwnerOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// How long a request waits for another request on the same property.
    pub lock_wait_ms: u64,
    pub cancellation_policy: CancellationPolicy,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 5000,
            cancellation_policy: CancellationPolicy::default(),
        }
    }
}

impl BookingConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Nights starting on these days are charged the weekend price.
    #[serde(with = "weekday_list")]
    pub weekend_days: Vec<Weekday>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            weekend_days: vec![Weekday::Sat, Weekday::Sun],
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sync.fetch_timeout_secs == 0 {
            return Err(EngineError::Config(
                "sync.fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.sync.recurrence_horizon_days == 0 {
            return Err(EngineError::Config(
                "sync.recurrence_horizon_days must be positive".to_string(),
            ));
        }
        if self.sync.import_future_days == 0 {
            return Err(EngineError::Config(
                "sync.import_future_days must be positive".to_string(),
            ));
        }
        if self.booking.lock_wait_ms == 0 {
            return Err(EngineError::Config(
                "booking.lock_wait_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Weekdays as their three-letter English names.
mod weekday_list {
    use chrono::Weekday;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(days: &[Weekday], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(days.iter().map(|d| d.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Weekday>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| s.parse::<Weekday>().map_err(|_| D::Error::custom(format!("invalid weekday: {}", s))))
            .collect()
    }
}
