use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::director::ce::{CeHandle, CeKey};

pub const CPU_TIME: &str = "CPUTime";
pub const MAX_TOTAL_JOBS: &str = "MaxTotalJobs";
pub const MAX_WAITING_JOBS: &str = "MaxWaitingJobs";
pub const PLATFORM: &str = "Platform";
pub const PUE: &str = "PUE";
pub const CI: &str = "CI";
pub const EFFICIENCY: &str = "Efficiency";
pub const COMPOSITE_SCORE: &str = "CompositeScore";
pub const LOAD_FACTOR: &str = "LoadFactor";

/// Value of a single queue or CE parameter, as published by the site catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParameterValue {
    /// Numeric view of the value. Textual values are parsed, non-finite numbers are rejected.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            ParameterValue::Integer(value) => *value as f64,
            ParameterValue::Float(value) => *value,
            ParameterValue::Text(value) => value.trim().parse::<f64>().ok()?,
            ParameterValue::Bool(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Integer(value) => write!(f, "{value}"),
            ParameterValue::Float(value) => write!(f, "{value}"),
            ParameterValue::Bool(value) => write!(f, "{value}"),
            ParameterValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Integer(value.into())
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

pub type ParameterMap = BTreeMap<String, ParameterValue>;

/// A resolved execution queue of a single cycle.
///
/// The descriptor is created by the resolver, enriched with site metrics by the metrics provider
/// and with scoring results by the ranking engine. It is dropped at the end of the cycle.
pub struct QueueDescriptor {
    name: String,
    queue: String,
    site: String,
    ce_name: String,
    ce_type: String,
    parameters: ParameterMap,
    handle: Rc<dyn CeHandle>,
}

impl QueueDescriptor {
    pub fn new(
        site: String,
        ce_name: String,
        ce_type: String,
        queue: String,
        parameters: ParameterMap,
        handle: Rc<dyn CeHandle>,
    ) -> Self {
        Self {
            name: queue_name(&ce_name, &queue),
            queue,
            site,
            ce_name,
            ce_type,
            parameters,
            handle,
        }
    }

    /// Unique name of the queue within a cycle.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the queue inside its CE.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn ce_name(&self) -> &str {
        &self.ce_name
    }

    pub fn ce_type(&self) -> &str {
        &self.ce_type
    }

    pub fn ce_key(&self) -> CeKey {
        CeKey::new(&self.ce_name, &self.ce_type)
    }

    pub fn handle(&self) -> &Rc<dyn CeHandle> {
        &self.handle
    }

    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key)
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn set_parameter<V: Into<ParameterValue>>(&mut self, key: &str, value: V) {
        self.parameters.insert(key.to_string(), value.into());
    }

    fn numeric(&self, key: &str) -> Option<f64> {
        self.parameter(key).and_then(ParameterValue::as_f64)
    }

    /// Maximum CPU time of a job in the queue, in seconds.
    pub fn cpu_time(&self) -> Option<f64> {
        self.numeric(CPU_TIME)
    }

    pub fn pue(&self) -> Option<f64> {
        self.numeric(PUE)
    }

    /// Carbon intensity of the site (gCO2/kWh).
    pub fn carbon_intensity(&self) -> Option<f64> {
        self.numeric(CI)
    }

    pub fn efficiency(&self) -> Option<f64> {
        self.numeric(EFFICIENCY)
    }
}

impl fmt::Debug for QueueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDescriptor")
            .field("name", &self.name)
            .field("site", &self.site)
            .field("ce_name", &self.ce_name)
            .field("ce_type", &self.ce_type)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

pub fn queue_name(ce_name: &str, queue: &str) -> String {
    format!("{ce_name}_{queue}")
}
