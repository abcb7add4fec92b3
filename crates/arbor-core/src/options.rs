//! Per-model configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many live parents a model may be registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentPolicy {
    /// At most one live parent; a second registration fails
    #[default]
    Single,
    /// Any number of parents, each forwarding independently
    Shared,
}

/// Options fixed when a model is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Initial value of the notification switch
    #[serde(default = "default_notify_enabled")]
    pub notify_enabled: bool,

    /// Policy applied when this model is registered as a child
    #[serde(default)]
    pub parent_policy: ParentPolicy,

    /// Upper bound on field lock acquisition (None = block indefinitely)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout: Option<Duration>,
}

fn default_notify_enabled() -> bool {
    true
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            notify_enabled: default_notify_enabled(),
            parent_policy: ParentPolicy::default(),
            lock_timeout: None,
        }
    }
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with notifications switched off
    pub fn silent(mut self) -> Self {
        self.notify_enabled = false;
        self
    }

    pub fn with_parent_policy(mut self, policy: ParentPolicy) -> Self {
        self.parent_policy = policy;
        self
    }

    /// Fail field access with `Error::LockTimeout` instead of blocking forever
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ModelOptions::default();
        assert!(options.notify_enabled);
        assert_eq!(options.parent_policy, ParentPolicy::Single);
        assert!(options.lock_timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let options = ModelOptions::new()
            .silent()
            .with_parent_policy(ParentPolicy::Shared)
            .with_lock_timeout(Duration::from_millis(50));

        assert!(!options.notify_enabled);
        assert_eq!(options.parent_policy, ParentPolicy::Shared);
        assert_eq!(options.lock_timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let options: ModelOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ModelOptions::default());

        let options: ModelOptions =
            serde_json::from_str(r#"{"parent_policy":"shared","lock_timeout":{"secs":1,"nanos":0}}"#)
                .unwrap();
        assert_eq!(options.parent_policy, ParentPolicy::Shared);
        assert_eq!(options.lock_timeout, Some(Duration::from_secs(1)));
        assert!(options.notify_enabled);
    }
}
