//! runstat.toml configuration parser.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigResult, ConfigurationError};
use crate::types::is_valid_metric_name;

/// Top-level configuration. Every section is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunstatConfig {
    pub sampler: SamplerConfig,
    pub recorder: RecorderConfig,
    pub exporter: ExporterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Time between two sampler ticks.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Whether ticks read live object counts by type.
    pub enable_object_sampling: bool,
    /// Prefix of every sampler metric name (`<prefix>_gc_time_total`, ...).
    pub prefix: String,
    /// Worker identity used to label the sampler duration histogram.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Consecutive failed ticks after which a sampler stops itself.
    pub max_consecutive_failures: u32,
    /// How long `stop` waits for an in-flight tick before aborting it.
    #[serde(with = "duration_str")]
    pub stop_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            enable_object_sampling: true,
            prefix: "runtime".to_string(),
            worker: None,
            max_consecutive_failures: 10,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Total real time above which a recorded call is reported.
    #[serde(with = "duration_str")]
    pub threshold: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Address the scrape endpoint listens on.
    pub listen: SocketAddr,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9394)),
        }
    }
}

impl RunstatConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Read(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: RunstatConfig =
            toml::from_str(content).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Reject values the sampler and recorder cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.sampler.validate()
    }
}

impl SamplerConfig {
    /// Reject values a sampler cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval.is_zero() {
            return Err(invalid("sampler.interval", "must be greater than zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(invalid("sampler.stop_timeout", "must be greater than zero"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(invalid(
                "sampler.max_consecutive_failures",
                "must be at least 1",
            ));
        }
        if !is_valid_metric_name(&self.prefix) {
            return Err(invalid(
                "sampler.prefix",
                &format!("{:?} is not a valid metric name prefix", self.prefix),
            ));
        }
        if matches!(self.worker.as_deref(), Some(w) if w.trim().is_empty()) {
            return Err(invalid("sampler.worker", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a duration written as `500ms`, `15s`, `0.5s` or `2m`. `us` and
/// `ns` are accepted for sub-millisecond values.
pub fn parse_duration(raw: &str) -> ConfigResult<Duration> {
    let s = raw.trim();
    let bad = || invalid("duration", &format!("{raw:?} is not a duration (use ms, s or m)"));
    let whole = |n: &str| n.trim().parse::<u64>().map_err(|_| bad());

    if let Some(ms) = s.strip_suffix("ms") {
        whole(ms).map(Duration::from_millis)
    } else if let Some(us) = s.strip_suffix("us") {
        whole(us).map(Duration::from_micros)
    } else if let Some(ns) = s.strip_suffix("ns") {
        whole(ns).map(Duration::from_nanos)
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: f64 = secs.trim().parse().map_err(|_| bad())?;
        Duration::try_from_secs_f64(secs).map_err(|_| bad())
    } else if let Some(mins) = s.strip_suffix('m') {
        whole(mins)?
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(bad)
    } else {
        Err(bad())
    }
}

/// Render a duration the way [`parse_duration`] reads it back, in the
/// coarsest unit that keeps it exact.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        format!("{}s", d.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
