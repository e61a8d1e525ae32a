use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Multiplier applied to every streamed position.
///
/// Assumed to convert the server's meters to centimeters. The unit has not
/// been measured against a live server yet, so it is configurable.
pub const DEFAULT_POSITION_SCALE: f64 = 100.0;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Topics {
    pub description: String,
    pub frame: String,
    pub command: String,
    pub command_reply: String,
    pub model_request: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            description: "motive/description".to_owned(),
            frame: "motive/frame".to_owned(),
            command: "motive/command".to_owned(),
            command_reply: "motive/command/reply".to_owned(),
            model_request: "motive/request/modeldef".to_owned(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub client_id: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub topics: Topics,
    pub position_scale: f64,
    pub command_timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub settle_delay_ms: u64,
    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            client_id: "motive_link".to_owned(),
            broker_host: "mqtt.local".to_owned(),
            broker_port: 1883,
            topics: Topics::default(),
            position_scale: DEFAULT_POSITION_SCALE,
            command_timeout_ms: 1000,
            connect_attempts: 5,
            connect_backoff_ms: 500,
            settle_delay_ms: 1000,
            log_level: "info".to_owned(),
        }
    }
}

impl LinkConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice::<LinkConfig>(&data)?)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Delay before retry number `attempt` (starting at 1), doubling each time
    pub fn connect_backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.connect_backoff_ms.saturating_mul(factor))
    }

    /// Unknown level names fall back to `Info`
    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
