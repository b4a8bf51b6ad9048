use std::rc::Rc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;

use crate::common::config::{DEFAULT_PROBE_CONCURRENCY, DEFAULT_PROBE_FALLBACK_LOAD};
use crate::director::DirectorResult;
use crate::director::ce::{CeHandle, CeKey, LoadSnapshot};
use crate::director::descriptor::QueueDescriptor;
use crate::{Map, OrderedMap};

/// Load of a queue as seen by the ranking engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ProbeOutcome {
    /// The CE answered the probe.
    Live {
        snapshot: LoadSnapshot,
        load_factor: f64,
    },
    /// The CE could not be probed, a configured fallback load is used instead.
    Fallback { load_factor: f64, error: String },
}

impl ProbeOutcome {
    pub fn live(snapshot: LoadSnapshot) -> DirectorResult<Self> {
        let load_factor = snapshot.load_factor().ok_or_else(|| {
            anyhow::anyhow!(
                "CE reports no capacity (running: {}, waiting: {})",
                snapshot.running,
                snapshot.waiting
            )
        })?;
        Ok(ProbeOutcome::Live {
            snapshot,
            load_factor,
        })
    }

    pub fn fallback(load_factor: f64, error: String) -> Self {
        ProbeOutcome::Fallback { load_factor, error }
    }

    pub fn load_factor(&self) -> f64 {
        match self {
            ProbeOutcome::Live { load_factor, .. } | ProbeOutcome::Fallback { load_factor, .. } => {
                *load_factor
            }
        }
    }

    pub fn snapshot(&self) -> Option<&LoadSnapshot> {
        match self {
            ProbeOutcome::Live { snapshot, .. } => Some(snapshot),
            ProbeOutcome::Fallback { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Live { .. } => None,
            ProbeOutcome::Fallback { error, .. } => Some(error),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ProbeOutcome::Live { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Upper bound on the duration of a single probe.
    pub timeout: Duration,
    /// Maximum number of CEs probed at the same time.
    pub concurrency: usize,
    /// Load factor assumed for CEs that cannot be probed.
    pub fallback_load: f64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: crate::common::config::get_probe_timeout(),
            concurrency: DEFAULT_PROBE_CONCURRENCY,
            fallback_load: DEFAULT_PROBE_FALLBACK_LOAD,
        }
    }
}

/// Probe a single CE, bounded by `timeout`.
pub async fn probe_handle(
    handle: &dyn CeHandle,
    timeout: Duration,
) -> DirectorResult<ProbeOutcome> {
    let snapshot = match tokio::time::timeout(timeout, handle.probe()).await {
        Ok(result) => result?,
        Err(_) => anyhow::bail!(
            "probe timed out after {}",
            humantime::format_duration(timeout)
        ),
    };
    ProbeOutcome::live(snapshot)
}

/// Probe the CEs of all `queues` and return the outcome for every queue name.
///
/// Every distinct CE is probed once, even if it serves several queues, and at most
/// `settings.concurrency` probes run at the same time. A CE that fails or times out gets a
/// fallback outcome, it never affects the outcome of other CEs.
pub async fn probe_queues(
    queues: &OrderedMap<String, QueueDescriptor>,
    settings: &ProbeSettings,
) -> Map<String, ProbeOutcome> {
    let mut handles: OrderedMap<CeKey, Rc<dyn CeHandle>> = OrderedMap::default();
    for queue in queues.values() {
        handles
            .entry(queue.ce_key())
            .or_insert_with(|| queue.handle().clone());
    }
    log::debug!(
        "Probing {} CE(s) of {} queue(s)",
        handles.len(),
        queues.len()
    );

    let timeout = settings.timeout;
    let outcomes: Map<CeKey, ProbeOutcome> = futures::stream::iter(handles)
        .map(|(key, handle)| async move {
            let outcome = match probe_handle(handle.as_ref(), timeout).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    log::warn!(
                        "CE {} ({}) could not be probed: {error:#}; assuming load {}",
                        key.ce_name,
                        key.ce_type,
                        settings.fallback_load
                    );
                    ProbeOutcome::fallback(settings.fallback_load, format!("{error:#}"))
                }
            };
            (key, outcome)
        })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await;

    queues
        .iter()
        .map(|(name, queue)| {
            let outcome = outcomes.get(&queue.ce_key()).cloned().unwrap_or_else(|| {
                ProbeOutcome::fallback(settings.fallback_load, "CE was not probed".to_string())
            });
            (name.clone(), outcome)
        })
        .collect()
}
