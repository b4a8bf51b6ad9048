use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::Map;
use crate::common::error::DirectorError;
use crate::director::catalog::QueueFilters;
use crate::director::metrics::SiteMetrics;
use crate::director::scoring::{ScoringFailurePolicy, ScoringWeights};

/// Environment variable holding the community used when none is configured.
pub const COMMUNITY_ENV: &str = "GREEN_DIRECTOR_COMMUNITY";

pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

/// Load factor assigned to queues whose CE could not be probed.
/// An unreachable CE is treated as if it was full.
pub const DEFAULT_PROBE_FALLBACK_LOAD: f64 = 1.0;

/// Maximum duration of a single CE probe.
pub fn get_probe_timeout() -> Duration {
    get_duration_from_env("GREEN_DIRECTOR_PROBE_TIMEOUT_MS")
        .unwrap_or_else(|| Duration::from_secs(30))
}

/// Delay between the starts of two successive ranking cycles.
pub fn get_cycle_interval() -> Duration {
    get_duration_from_env("GREEN_DIRECTOR_CYCLE_INTERVAL_MS")
        .unwrap_or_else(|| Duration::from_secs(5 * 60))
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Weighted sum of carbon intensity, queue CPU time and CE load.
    #[default]
    Weighted,
    /// Lexicographic order by PUE, then by carbon intensity.
    PueCi,
}

/// Options passed to the CE factory when queues are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverOptions {
    /// Grid middleware environment that the CEs are contacted through.
    pub grid_env: String,
    pub working_directory: PathBuf,
    /// Drop queues that do not declare a `Platform`.
    pub check_platform: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            grid_env: String::new(),
            working_directory: PathBuf::from("/tmp"),
            check_platform: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisConfig {
    /// Seed of the generator used for synthesized site metrics.
    /// Synthesis is not reproducible when it is missing.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectorConfig {
    pub community: Option<String>,
    pub strategy: StrategyKind,
    pub weights: ScoringWeights,
    pub scoring_failure: ScoringFailurePolicy,
    #[serde(deserialize_with = "deserialize_duration")]
    pub probe_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub cycle_interval: Duration,
    pub probe_concurrency: usize,
    pub probe_fallback_load: f64,
    /// Forget all instantiated CE handles at the start of every cycle.
    pub reset_ce_cache: bool,
    pub filters: QueueFilters,
    pub resolver: ResolverOptions,
    pub synthesis: SynthesisConfig,
    /// Statically published site metrics, keyed by site name.
    pub metrics: Map<String, SiteMetrics>,
    /// Maximum number of queues that receive pilots in a single cycle.
    pub max_pilot_queues: Option<usize>,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            community: None,
            strategy: StrategyKind::default(),
            weights: ScoringWeights::default(),
            scoring_failure: ScoringFailurePolicy::default(),
            probe_timeout: get_probe_timeout(),
            cycle_interval: get_cycle_interval(),
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            probe_fallback_load: DEFAULT_PROBE_FALLBACK_LOAD,
            reset_ce_cache: false,
            filters: QueueFilters::default(),
            resolver: ResolverOptions::default(),
            synthesis: SynthesisConfig::default(),
            metrics: Map::default(),
            max_pilot_queues: None,
        }
    }
}

impl DirectorConfig {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            DirectorError::ConfigError(format!(
                "Cannot read configuration file {}: {error}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: DirectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.probe_concurrency == 0 {
            return config_error("probe_concurrency must be at least 1");
        }
        if self.probe_timeout.is_zero() {
            return config_error("probe_timeout must be positive");
        }
        if self.cycle_interval.is_zero() {
            return config_error("cycle_interval must be positive");
        }
        if !self.probe_fallback_load.is_finite() || self.probe_fallback_load < 0.0 {
            return config_error(format!(
                "probe_fallback_load must be a non-negative number, got {}",
                self.probe_fallback_load
            ));
        }
        self.weights.validate().map_err(DirectorError::ConfigError)?;
        if self.max_pilot_queues == Some(0) {
            return config_error("max_pilot_queues must be at least 1");
        }
        if let Some(community) = &self.community {
            if community.trim().is_empty() {
                return config_error("community must not be empty");
            }
        }
        for (site, metrics) in &self.metrics {
            metrics
                .validate()
                .map_err(|error| DirectorError::ConfigError(format!("metrics of {site}: {error}")))?;
        }
        Ok(())
    }
}

fn config_error<T, S: Into<String>>(message: S) -> crate::Result<T> {
    Err(DirectorError::ConfigError(message.into()))
}

/// Supplies the community (VO) to use when the configuration does not name one.
pub trait CommunityResolver {
    fn default_community(&self) -> Option<String>;
}

/// Reads the default community from [`COMMUNITY_ENV`].
pub struct EnvCommunityResolver;

impl CommunityResolver for EnvCommunityResolver {
    fn default_community(&self) -> Option<String> {
        std::env::var(COMMUNITY_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub fn resolve_community(
    configured: Option<&str>,
    resolver: &dyn CommunityResolver,
) -> crate::Result<String> {
    match configured {
        Some(community) => Ok(community.to_string()),
        None => resolver
            .default_community()
            .ok_or(DirectorError::MissingCommunity),
    }
}
