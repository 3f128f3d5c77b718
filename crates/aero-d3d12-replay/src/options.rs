use std::time::Duration;

use serde::Deserialize;

/// Default bound for every CPU-side blocking wait issued by the replay engine.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Finished replay options.
///
/// Loading (CLI flags, environment, JSON files) happens outside the engine; the engine only
/// consumes the resulting structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayOptions {
    /// Request the driver debug layer when creating devices.
    pub enable_validation_layer: bool,
    /// Block the replay thread after each `ExecuteCommandLists` until the queue drains.
    pub sync_queue_submissions: bool,
    /// Bound for CPU-side waits on fences and events, in milliseconds.
    pub wait_timeout_ms: u64,
    /// Invoke the fatal-error sink when replay observes a device-loss result that capture did not.
    pub fatal_on_device_removed: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            enable_validation_layer: false,
            sync_queue_submissions: false,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            fatal_on_device_removed: true,
        }
    }
}

impl ReplayOptions {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
