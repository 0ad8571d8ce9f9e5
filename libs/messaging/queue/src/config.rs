//! Mailbox configuration
//!
//! TOML-based configuration with built-in defaults and per-mailbox overrides:
//!
//! ```toml
//! [defaults]
//! dedicated_worker = true
//! queue_depth_warning = 5000
//!
//! [mailboxes.simulator]
//! dedicated_worker = false
//! ```

use crate::error::BusError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Settings for a single mailbox
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Spawn a worker thread that drains the mailbox until shutdown
    pub dedicated_worker: bool,

    /// Worker thread name is `{prefix}{identity}`
    pub worker_name_prefix: String,

    /// Warn once the inbound queue grows past this depth (0 disables)
    pub queue_depth_warning: usize,

    /// Contain callback panics instead of unwinding through the drain loop
    pub catch_callback_panics: bool,

    /// Warn about acks and bounces that reach no handler and no callback
    pub log_dropped_acks: bool,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            dedicated_worker: false,
            worker_name_prefix: "mq:".to_string(),
            queue_depth_warning: 10_000,
            catch_callback_panics: true,
            log_dropped_acks: true,
        }
    }
}

impl MailboxConfig {
    /// Default settings with a dedicated worker
    pub fn threaded() -> Self {
        Self {
            dedicated_worker: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dedicated_worker && self.worker_name_prefix.contains('\0') {
            return Err(BusError::invalid_config(
                "worker_name_prefix must not contain NUL bytes",
            ));
        }
        Ok(())
    }
}

/// Per-mailbox overrides in TOML form; unset fields fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MailboxConfigToml {
    pub dedicated_worker: Option<bool>,
    pub worker_name_prefix: Option<String>,
    pub queue_depth_warning: Option<usize>,
    pub catch_callback_panics: Option<bool>,
    pub log_dropped_acks: Option<bool>,
}

impl MailboxConfigToml {
    /// Overlay these overrides on `base`
    pub fn apply(&self, base: &MailboxConfig) -> MailboxConfig {
        MailboxConfig {
            dedicated_worker: self.dedicated_worker.unwrap_or(base.dedicated_worker),
            worker_name_prefix: self
                .worker_name_prefix
                .clone()
                .unwrap_or_else(|| base.worker_name_prefix.clone()),
            queue_depth_warning: self.queue_depth_warning.unwrap_or(base.queue_depth_warning),
            catch_callback_panics: self
                .catch_callback_panics
                .unwrap_or(base.catch_callback_panics),
            log_dropped_acks: self.log_dropped_acks.unwrap_or(base.log_dropped_acks),
        }
    }
}

/// Top-level bus configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default)]
    pub defaults: MailboxConfig,

    /// Overrides keyed by mailbox identity
    #[serde(default)]
    pub mailboxes: HashMap<String, MailboxConfigToml>,
}

impl BusConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: BusConfig = toml::from_str(toml_str)
            .map_err(|e| BusError::invalid_config(format!("Failed to parse bus config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loading bus configuration");
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.defaults.validate()?;
        for (name, overrides) in &self.mailboxes {
            overrides.apply(&self.defaults).validate().map_err(|e| {
                BusError::invalid_config(format!("mailbox '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Effective configuration for the mailbox named `identity`
    pub fn for_mailbox(&self, identity: &str) -> MailboxConfig {
        self.mailboxes
            .get(identity)
            .map(|overrides| overrides.apply(&self.defaults))
            .unwrap_or_else(|| self.defaults.clone())
    }
}
