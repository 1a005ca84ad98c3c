//! Registry of notification backends known to this process.
//!
//! The registry is built once at startup and handed to the snapshot builder
//! by reference; nothing registers itself implicitly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EscalationError, Result};
use crate::types::BackendSettings;

/// Description of one notification backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Machine name used as the key in route settings.
    pub name: String,
    /// Human-readable label.
    pub label: String,
    /// Whether routes may pin a backend-specific channel.
    pub supports_channels: bool,
}

impl BackendDescriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>, supports_channels: bool) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            supports_channels,
        }
    }
}

/// Explicit set of notification backends.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, BackendDescriptor>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the stock chat and mail backends.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for descriptor in [
            BackendDescriptor::new("slack", "Slack", true),
            BackendDescriptor::new("telegram", "Telegram", true),
            BackendDescriptor::new("msteams", "Microsoft Teams", true),
            BackendDescriptor::new("email", "Email", false),
        ] {
            registry.backends.insert(descriptor.name.clone(), descriptor);
        }
        registry
    }

    /// Registers a backend.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::InvalidConfig` if the name is empty or taken.
    pub fn register(&mut self, descriptor: BackendDescriptor) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(EscalationError::InvalidConfig {
                reason: "backend name cannot be empty".to_string(),
            });
        }
        if self.backends.contains_key(&descriptor.name) {
            return Err(EscalationError::InvalidConfig {
                reason: format!("backend '{}' already registered", descriptor.name),
            });
        }
        self.backends.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Returns the number of registered backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if no backend is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Keeps only the settings of registered backends.
    ///
    /// Channel pins are dropped for backends that do not support them.
    #[must_use]
    pub fn filter_settings(
        &self,
        settings: &BTreeMap<String, BackendSettings>,
    ) -> BTreeMap<String, BackendSettings> {
        settings
            .iter()
            .filter_map(|(name, value)| {
                let Some(descriptor) = self.backends.get(name) else {
                    debug!(backend = %name, "dropping settings for unregistered backend");
                    return None;
                };
                let mut value = value.clone();
                if !descriptor.supports_channels {
                    value.channel = None;
                }
                Some((name.clone(), value))
            })
            .collect()
    }
}
