//! ebb.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest scratch buffer the serializer accepts. Anything below this would
/// split even a short status line into many pushes.
pub const MIN_SCRATCH_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EbbConfig {
    pub event_loops: EventLoopConfig,
    pub serializer: SerializerConfig,
    #[serde(rename = "await")]
    pub await_: AwaitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Number of serial queues in a group.
    pub threads: usize,
    /// Thread name prefix; loops are named `{prefix}-{index}`.
    pub name_prefix: String,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            name_prefix: "ebb-loop".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Size of the reusable buffer the message head is written through.
    pub scratch_capacity: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            scratch_capacity: 4096,
        }
    }
}

impl SerializerConfig {
    /// Scratch capacity clamped to [`MIN_SCRATCH_CAPACITY`].
    pub fn effective_scratch_capacity(&self) -> usize {
        self.scratch_capacity.max(MIN_SCRATCH_CAPACITY)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwaitConfig {
    /// Timeout used by callers that block on a future without an explicit one.
    pub default_timeout: String,
}

impl Default for AwaitConfig {
    fn default() -> Self {
        Self {
            default_timeout: "30s".to_string(),
        }
    }
}

impl AwaitConfig {
    /// Parsed `default_timeout`. Loaded configs are validated; a hand-built
    /// malformed value falls back to 30 seconds.
    pub fn default_timeout(&self) -> Duration {
        parse_duration(&self.default_timeout).unwrap_or(Duration::from_secs(30))
    }
}

impl EbbConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EbbConfig = toml::from_str(content)?;
        if config.event_loops.threads == 0 {
            anyhow::bail!("event_loops.threads must be at least 1");
        }
        if parse_duration(&config.await_.default_timeout).is_none() {
            anyhow::bail!(
                "await.default_timeout: invalid duration {:?}",
                config.await_.default_timeout
            );
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "5s", "500ms", "2m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
