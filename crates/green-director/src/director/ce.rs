use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::Map;
use crate::common::config::ResolverOptions;
use crate::director::DirectorResult;
use crate::director::descriptor::ParameterMap;

/// Occupancy of a computing element at the time it was probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub running: u64,
    pub waiting: u64,
    pub max_total: u64,
}

impl LoadSnapshot {
    pub fn new(running: u64, waiting: u64, max_total: u64) -> Self {
        Self {
            running,
            waiting,
            max_total,
        }
    }

    /// `(running + waiting) / max_total`.
    ///
    /// Overcommitted CEs produce values above `1.0`, they are not clamped.
    /// Returns `None` if the CE does not report any capacity.
    pub fn load_factor(&self) -> Option<f64> {
        if self.max_total == 0 {
            return None;
        }
        // Reported counts may not fit into u64 when summed
        Some((self.running as f64 + self.waiting as f64) / self.max_total as f64)
    }
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = DirectorResult<LoadSnapshot>>>>;

/// Handle that can communicate with a computing element (e.g. an HTCondorCE or ARC endpoint).
pub trait CeHandle {
    /// Ask the CE how many jobs it currently runs and holds in its queues.
    ///
    /// The caller bounds the duration of the returned future.
    fn probe(&self) -> ProbeFuture;
}

/// Identity of an instantiated CE handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CeKey {
    pub ce_name: String,
    pub ce_type: String,
}

impl CeKey {
    pub fn new(ce_name: &str, ce_type: &str) -> Self {
        Self {
            ce_name: ce_name.to_string(),
            ce_type: ce_type.to_string(),
        }
    }
}

/// Everything a factory needs to know to create a CE handle.
pub struct CeSpec<'a> {
    pub site: &'a str,
    pub ce_name: &'a str,
    pub ce_type: &'a str,
    /// CE level parameters from the site catalog.
    pub parameters: &'a ParameterMap,
    pub options: &'a ResolverOptions,
}

impl CeSpec<'_> {
    pub fn key(&self) -> CeKey {
        CeKey::new(self.ce_name, self.ce_type)
    }
}

/// Creates CE handles for CE types that it understands.
pub trait CeFactory {
    fn create(&self, spec: &CeSpec) -> DirectorResult<Rc<dyn CeHandle>>;
}

/// Instantiated CE handles, reused across cycles to avoid repeated construction.
///
/// Entries are only removed by [`CeCache::clear`]. The cache is owned by a single resolver and
/// mutated through `&mut self`, so at most one handle exists for every [`CeKey`].
#[derive(Default)]
pub struct CeCache {
    handles: Map<CeKey, Rc<dyn CeHandle>>,
}

impl CeCache {
    pub fn get_or_create(
        &mut self,
        spec: &CeSpec,
        factory: &dyn CeFactory,
    ) -> DirectorResult<Rc<dyn CeHandle>> {
        let key = spec.key();
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle.clone());
        }
        let handle = factory.create(spec)?;
        log::debug!("Instantiated CE {} ({})", key.ce_name, key.ce_type);
        self.handles.insert(key, handle.clone());
        Ok(handle)
    }

    pub fn contains(&self, key: &CeKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }
}
