use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIN_HEARTBEAT_SECONDS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,

    pub heartbeat_seconds: u32,

    pub max_connections: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_seconds: 30,
            max_connections: 1000,
        }
    }
}

impl StreamConfig {
    /// Clamps values that would make the stream misbehave.
    pub fn normalized(mut self) -> Self {
        if self.heartbeat_seconds < MIN_HEARTBEAT_SECONDS {
            warn!(
                "Stream heartbeat interval {} is too low, setting to minimum of {} seconds",
                self.heartbeat_seconds, MIN_HEARTBEAT_SECONDS
            );
            self.heartbeat_seconds = MIN_HEARTBEAT_SECONDS;
        }
        if self.max_connections < 1 {
            warn!("Stream max connections must be at least 1, setting to 1");
            self.max_connections = 1;
        }
        self
    }

    pub fn heartbeat_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat_seconds.max(MIN_HEARTBEAT_SECONDS)))
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections.max(1) as usize
    }
}
