//! Computing elements without a real endpoint, used when no grid middleware is available.
//!
//! The load of a simulated CE can be pinned with the CE parameters `RunningJobs`, `WaitingJobs`
//! and `MaxTotalJobs`, otherwise it is random. `ProbeError` makes every probe fail with the given
//! message and `ProbeDelay` (milliseconds, or a duration such as `"2s"`) delays every probe.
//! Errors of a CE created in a grid environment (`resolver.grid_env`) name that environment.
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;

use crate::director::DirectorResult;
use crate::director::ce::{CeFactory, CeHandle, CeSpec, LoadSnapshot, ProbeFuture};
use crate::director::descriptor::{MAX_TOTAL_JOBS, ParameterMap, ParameterValue};

pub const RUNNING_JOBS: &str = "RunningJobs";
pub const WAITING_JOBS: &str = "WaitingJobs";
pub const PROBE_ERROR: &str = "ProbeError";
pub const PROBE_DELAY: &str = "ProbeDelay";

const RUNNING_RANGE: RangeInclusive<u64> = 10..=200;
const WAITING_RANGE: RangeInclusive<u64> = 0..=50;
const DEFAULT_MAX_TOTAL: u64 = 300;

/// Creates [`SimulatedCe`]s for the configured CE types. An empty list accepts every type.
#[derive(Debug, Default)]
pub struct SimulatedCeFactory {
    supported_types: Vec<String>,
}

impl SimulatedCeFactory {
    pub fn new(supported_types: Vec<String>) -> Self {
        Self { supported_types }
    }
}

impl CeFactory for SimulatedCeFactory {
    fn create(&self, spec: &CeSpec) -> DirectorResult<Rc<dyn CeHandle>> {
        if !self.supported_types.is_empty()
            && !self.supported_types.iter().any(|t| t == spec.ce_type)
        {
            anyhow::bail!("Unsupported CE type {}", spec.ce_type);
        }
        let ce = SimulatedCe::from_spec(spec)
            .with_context(|| format!("Invalid parameters of CE {}", spec.ce_name))?;
        log::debug!(
            "Simulating CE {} at {} (grid environment {:?}, working directory {})",
            spec.ce_name,
            spec.site,
            spec.options.grid_env,
            spec.options.working_directory.display()
        );
        Ok(Rc::new(ce))
    }
}

fn count_parameter(parameters: &ParameterMap, key: &str) -> anyhow::Result<Option<u64>> {
    let Some(value) = parameters.get(key) else {
        return Ok(None);
    };
    match value.as_f64() {
        Some(count) if count >= 0.0 && count.fract() == 0.0 => Ok(Some(count as u64)),
        _ => anyhow::bail!("{key} has to be a non-negative integer, got {value}"),
    }
}

fn delay_parameter(parameters: &ParameterMap) -> anyhow::Result<Duration> {
    match parameters.get(PROBE_DELAY) {
        None => Ok(Duration::ZERO),
        Some(ParameterValue::Text(value)) => humantime::parse_duration(value)
            .with_context(|| format!("Invalid {PROBE_DELAY} {value}")),
        Some(_) => Ok(Duration::from_millis(
            count_parameter(parameters, PROBE_DELAY)?.unwrap_or(0),
        )),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCe {
    running: Option<u64>,
    waiting: Option<u64>,
    max_total: Option<u64>,
    error: Option<String>,
    delay: Duration,
    grid_env: Option<String>,
}

impl SimulatedCe {
    pub fn from_parameters(parameters: &ParameterMap) -> anyhow::Result<Self> {
        Ok(Self {
            running: count_parameter(parameters, RUNNING_JOBS)?,
            waiting: count_parameter(parameters, WAITING_JOBS)?,
            max_total: count_parameter(parameters, MAX_TOTAL_JOBS)?,
            error: parameters.get(PROBE_ERROR).map(|value| value.to_string()),
            delay: delay_parameter(parameters)?,
            grid_env: None,
        })
    }

    /// CE of a catalog entry, attached to the configured grid environment.
    pub fn from_spec(spec: &CeSpec) -> anyhow::Result<Self> {
        let mut ce = Self::from_parameters(spec.parameters)?;
        let grid_env = spec.options.grid_env.trim();
        if !grid_env.is_empty() {
            ce.grid_env = Some(grid_env.to_string());
        }
        Ok(ce)
    }

    fn snapshot(&self) -> LoadSnapshot {
        let mut rng = rand::rng();
        LoadSnapshot::new(
            self.running
                .unwrap_or_else(|| rng.random_range(RUNNING_RANGE)),
            self.waiting
                .unwrap_or_else(|| rng.random_range(WAITING_RANGE)),
            self.max_total.unwrap_or(DEFAULT_MAX_TOTAL),
        )
    }
}

impl CeHandle for SimulatedCe {
    fn probe(&self) -> ProbeFuture {
        let result = match (&self.error, &self.grid_env) {
            (Some(error), Some(grid_env)) => {
                Err(anyhow::anyhow!("{error} (grid environment {grid_env})"))
            }
            (Some(error), None) => Err(anyhow::anyhow!("{error}")),
            (None, _) => Ok(self.snapshot()),
        };
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}
