//! Tunables of the action layer.
//!
//! Every field has a default matching the classic action protocol. Values
//! come from, in increasing priority: the defaults, a JSON5 file named by
//! `ROSZ_ACTION_CONFIG_FILE`, and `ROSZ_ACTION_CONFIG_OVERRIDE`:
//!
//! ```text
//! export ROSZ_ACTION_CONFIG_OVERRIDE='server/status_frequency=10;client/server_poll_period=0.05'
//! ```
//!
//! Durations are written as floating point seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zenoh::Result;

use crate::context::parse_overrides;

mod float_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionServerConfig {
    /// Rate of the periodic status broadcast, in Hz.
    pub status_frequency: f64,
    /// How long a finished goal stays in the status list.
    #[serde(with = "float_secs")]
    pub status_list_timeout: Duration,
}

impl Default for ActionServerConfig {
    fn default() -> Self {
        Self {
            status_frequency: 5.0,
            status_list_timeout: Duration::from_secs(60),
        }
    }
}

impl ActionServerConfig {
    /// Broadcast period derived from `status_frequency`; non-positive rates fall back to 5 Hz.
    pub fn status_period(&self) -> Duration {
        if self.status_frequency > 0.0 && self.status_frequency.is_finite() {
            Duration::from_secs_f64(1.0 / self.status_frequency)
        } else {
            Duration::from_millis(200)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionClientConfig {
    #[serde(with = "float_secs")]
    pub server_poll_period: Duration,
    /// Upper bound on how long a blocking wait sleeps between checks.
    #[serde(with = "float_secs")]
    pub result_poll_period: Duration,
}

impl Default for ActionClientConfig {
    fn default() -> Self {
        Self {
            server_poll_period: Duration::from_millis(10),
            result_poll_period: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleActionServerConfig {
    /// Fallback tick of the executor loop when no wake-up arrives.
    #[serde(with = "float_secs")]
    pub executor_period: Duration,
    pub wake_queue: usize,
}

impl Default for SimpleActionServerConfig {
    fn default() -> Self {
        Self {
            executor_period: Duration::from_secs(1),
            wake_queue: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub server: ActionServerConfig,
    pub client: ActionClientConfig,
    pub simple_server: SimpleActionServerConfig,
}

impl ActionConfig {
    /// Defaults, then `ROSZ_ACTION_CONFIG_FILE`, then `ROSZ_ACTION_CONFIG_OVERRIDE`.
    pub fn from_env() -> Result<Self> {
        let mut value = serde_json::to_value(Self::default())?;
        if let Ok(path) = std::env::var("ROSZ_ACTION_CONFIG_FILE") {
            tracing::debug!("Loading action config from {}", path);
            merge(&mut value, read_json5(Path::new(&path))?);
        }
        if let Ok(overrides) = std::env::var("ROSZ_ACTION_CONFIG_OVERRIDE") {
            value = apply_overrides(value, &overrides)?;
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json5(text: &str) -> Result<Self> {
        json5::from_str(text).map_err(|e| format!("Invalid action config: {}", e).into())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut value = serde_json::to_value(Self::default())?;
        merge(&mut value, read_json5(path.as_ref())?);
        Ok(serde_json::from_value(value)?)
    }

    /// Applies `section/key=json5;...` on top of this configuration.
    pub fn with_overrides(self, overrides: &str) -> Result<Self> {
        let value = apply_overrides(serde_json::to_value(self)?, overrides)?;
        Ok(serde_json::from_value(value)?)
    }
}

fn read_json5(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read action config {}: {}", path.display(), e))?;
    json5::from_str(&text)
        .map_err(|e| format!("Invalid action config {}: {}", path.display(), e).into())
}

fn merge(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (k, v) in patch {
                merge(base.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (base, patch) => *base = patch,
    }
}

fn apply_overrides(mut value: serde_json::Value, overrides: &str) -> Result<serde_json::Value> {
    for (key, v) in parse_overrides("ROSZ_ACTION_CONFIG_OVERRIDE", overrides)? {
        let pointer = format!("/{}", key.trim_matches('/'));
        match value.pointer_mut(&pointer) {
            Some(slot) => *slot = v,
            None => return Err(format!("Unknown action config key '{}'", key).into()),
        }
    }
    Ok(value)
}
