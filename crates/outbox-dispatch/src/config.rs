//! Dispatcher configuration and local account state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RecipientId;
use crate::{DispatchError, DispatchResult};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Outbox database file. `None` keeps everything in memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Timer applied to the first message of a conversation that owes one.
    /// Zero disables it.
    #[serde(default)]
    pub universal_expire_timer_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_path: None,
            universal_expire_timer_secs: 0,
        }
    }
}

impl DispatchConfig {
    /// Create a new config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from a file if it exists, falling back to defaults.
    pub fn load(path: &Path) -> DispatchResult<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> DispatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DispatchConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> DispatchResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("OUTBOX_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(secs) = std::env::var("OUTBOX_UNIVERSAL_EXPIRE_TIMER_SECS") {
            match secs.trim().parse() {
                Ok(secs) => self.universal_expire_timer_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "Ignoring invalid universal expire timer"),
            }
        }
    }

    /// Universal expire timer, if enabled.
    pub fn universal_expire_timer(&self) -> Option<Duration> {
        (self.universal_expire_timer_secs > 0)
            .then(|| Duration::from_secs(self.universal_expire_timer_secs))
    }

    /// Rejects values that would make the dispatcher misbehave.
    pub fn validate(&self) -> DispatchResult<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(DispatchError::Config(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        Ok(())
    }
}

/// The local account as the classifier sees it.
///
/// Registration and linked-device state change at runtime, so both flags are
/// atomics shared by every dispatch.
#[derive(Debug)]
pub struct AccountState {
    self_id: RecipientId,
    registered: AtomicBool,
    multi_device: AtomicBool,
}

impl AccountState {
    pub fn new(self_id: RecipientId, registered: bool, multi_device: bool) -> Self {
        Self {
            self_id,
            registered: AtomicBool::new(registered),
            multi_device: AtomicBool::new(multi_device),
        }
    }

    /// A registered account with a single device.
    pub fn registered(self_id: RecipientId) -> Self {
        Self::new(self_id, true, false)
    }

    pub fn self_id(&self) -> RecipientId {
        self.self_id
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn is_multi_device(&self) -> bool {
        self.multi_device.load(Ordering::SeqCst)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn set_multi_device(&self, multi_device: bool) {
        self.multi_device.store(multi_device, Ordering::SeqCst);
    }
}
