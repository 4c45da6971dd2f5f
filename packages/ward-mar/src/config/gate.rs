use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct GateConfig {
    /// Progress note lookups slower than this are treated as unavailable and deny administration
    #[serde(default = "GateConfig::default_timeout")]
    pub timeout: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            timeout: GateConfig::default_timeout(),
        }
    }
}

impl GateConfig {
    pub const fn default_timeout() -> u64 {
        2000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}
