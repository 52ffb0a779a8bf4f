use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Node configuration, read from a TOML file.
///
/// Every section has a default, so an absent file yields a fully usable
/// configuration; unknown keys are rejected. Durations are humantime strings
/// (`"60s"`, `"500ms"`).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct NsdbConfig {
    pub sharding: ShardingConfig,
    pub write: WriteConfig,
    pub read_coordinator: TimeoutConfig,
    pub http_endpoint: TimeoutConfig,
    pub storage: StorageConfig,
    pub cluster: ClusterConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ShardingConfig {
    /// Shard interval used for metrics without a `MetricInfo` override.
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub interval: Duration,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct WriteConfig {
    pub scheduler: SchedulerConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Period of the indexers' batched-write flush.
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub interval: Duration,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutConfig {
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub timeout: Duration,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct StorageConfig {
    /// Root of all persisted state: shards under `base-path/db/ns/metric/`,
    /// schemas under `base-path/db/ns/`.
    pub base_path: PathBuf,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct ClusterConfig {
    /// Whether `AddLocation` keeps exact replica duplicates.
    pub accept_duplicate_locations: bool,
}

impl Default for NsdbConfig {
    fn default() -> Self {
        NsdbConfig {
            sharding: ShardingConfig::default(),
            write: WriteConfig::default(),
            read_coordinator: TimeoutConfig::default(),
            http_endpoint: TimeoutConfig::default(),
            storage: StorageConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        ShardingConfig {
            interval: Duration::from_secs(60),
        }
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        WriteConfig {
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval: Duration::from_secs(1),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            base_path: PathBuf::from("data"),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            accept_duplicate_locations: true,
        }
    }
}

impl NsdbConfig {
    /// Reads the configuration at `path`, falling back to the defaults when
    /// the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<NsdbConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(NsdbConfig::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("could not parse config file {}", path.display()))
    }

    pub fn shard_interval_ms(&self) -> i64 {
        self.sharding.interval.as_millis() as i64
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
