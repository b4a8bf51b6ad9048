use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use derive_builder::Builder;

use crate::Map;
use crate::director::DirectorResult;
use crate::director::catalog::{
    CatalogCe, CatalogFuture, CatalogQueue, CatalogSite, QueueFilters, SiteCatalog, filter_sites,
};
use crate::director::ce::{CeFactory, CeHandle, CeSpec, LoadSnapshot, ProbeFuture};
use crate::director::cycle::{CycleReport, ReportSink, SubmissionConsumer};
use crate::director::descriptor::{
    CI, CPU_TIME, EFFICIENCY, PUE, ParameterMap, ParameterValue, QueueDescriptor,
};
use crate::director::scoring::RankedQueueList;

/// Behavior of a test CE when it is probed.
#[derive(Debug, Clone)]
pub enum CeBehavior {
    Load(LoadSnapshot),
    Fail(String),
    /// The probe never finishes.
    Hang,
    Delay(Duration, LoadSnapshot),
}

impl Default for CeBehavior {
    fn default() -> Self {
        CeBehavior::Load(LoadSnapshot::new(100, 50, 300))
    }
}

pub struct TestCeHandle {
    behavior: CeBehavior,
    probes: Rc<Cell<usize>>,
}

impl TestCeHandle {
    pub fn new(behavior: CeBehavior) -> Self {
        Self {
            behavior,
            probes: Default::default(),
        }
    }

    pub fn with_counter(behavior: CeBehavior, probes: Rc<Cell<usize>>) -> Self {
        Self { behavior, probes }
    }
}

impl CeHandle for TestCeHandle {
    fn probe(&self) -> ProbeFuture {
        self.probes.set(self.probes.get() + 1);
        let behavior = self.behavior.clone();
        Box::pin(async move {
            match behavior {
                CeBehavior::Load(snapshot) => Ok(snapshot),
                CeBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
                CeBehavior::Hang => futures::future::pending().await,
                CeBehavior::Delay(delay, snapshot) => {
                    tokio::time::sleep(delay).await;
                    Ok(snapshot)
                }
            }
        })
    }
}

pub fn handle(behavior: CeBehavior) -> Rc<dyn CeHandle> {
    Rc::new(TestCeHandle::new(behavior))
}

/// CE factory that counts created handles and probes.
#[derive(Default)]
pub struct CountingFactory {
    created: Rc<Cell<usize>>,
    probes: Rc<Cell<usize>>,
    failing_types: Vec<String>,
    behaviors: Map<String, CeBehavior>,
}

impl CountingFactory {
    pub fn failing_types(types: &[&str]) -> Self {
        Self {
            failing_types: types.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Set the probe behavior of the CE with the given name.
    pub fn behavior(mut self, ce_name: &str, behavior: CeBehavior) -> Self {
        self.behaviors.insert(ce_name.to_string(), behavior);
        self
    }

    pub fn created(&self) -> usize {
        self.created.get()
    }

    pub fn counter(&self) -> Rc<Cell<usize>> {
        self.created.clone()
    }

    pub fn probe_counter(&self) -> Rc<Cell<usize>> {
        self.probes.clone()
    }
}

impl CeFactory for CountingFactory {
    fn create(&self, spec: &CeSpec) -> DirectorResult<Rc<dyn CeHandle>> {
        if self.failing_types.iter().any(|t| t == spec.ce_type) {
            anyhow::bail!("Unsupported CE type {}", spec.ce_type);
        }
        self.created.set(self.created.get() + 1);
        let behavior = self
            .behaviors
            .get(spec.ce_name)
            .cloned()
            .unwrap_or_default();
        Ok(Rc::new(TestCeHandle::with_counter(
            behavior,
            self.probes.clone(),
        )))
    }
}

pub struct TestCe {
    ce: CatalogCe,
}

impl TestCe {
    pub fn parameter<V: Into<ParameterValue>>(mut self, key: &str, value: V) -> Self {
        self.ce.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.ce.tags.push(tag.to_string());
        self
    }

    pub fn queue(mut self, queue: TestCatalogQueue) -> Self {
        self.ce.queues.push(queue.queue);
        self
    }
}

pub fn ce(name: &str, ce_type: &str) -> TestCe {
    TestCe {
        ce: CatalogCe {
            name: name.to_string(),
            ce_type: ce_type.to_string(),
            tags: vec![],
            parameters: Default::default(),
            queues: vec![],
        },
    }
}

pub struct TestCatalogQueue {
    queue: CatalogQueue,
}

impl TestCatalogQueue {
    pub fn parameter<V: Into<ParameterValue>>(mut self, key: &str, value: V) -> Self {
        self.queue.parameters.insert(key.to_string(), value.into());
        self
    }
}

pub fn queue(name: &str) -> TestCatalogQueue {
    TestCatalogQueue {
        queue: CatalogQueue {
            name: name.to_string(),
            tags: vec![],
            parameters: Default::default(),
        },
    }
}

#[derive(Default)]
pub struct CatalogBuilder {
    sites: Vec<CatalogSite>,
}

impl CatalogBuilder {
    pub fn site(mut self, name: &str, ces: Vec<TestCe>) -> Self {
        self.sites.push(CatalogSite {
            name: name.to_string(),
            communities: vec![],
            ces: ces.into_iter().map(|ce| ce.ce).collect(),
        });
        self
    }

    pub fn finish(self) -> Vec<CatalogSite> {
        self.sites
    }
}

/// Catalog that always returns the same sites.
pub struct StaticCatalog {
    sites: Vec<CatalogSite>,
    requests: Rc<Cell<usize>>,
}

impl StaticCatalog {
    pub fn new(sites: Vec<CatalogSite>) -> Self {
        Self {
            sites,
            requests: Default::default(),
        }
    }

    pub fn request_counter(&self) -> Rc<Cell<usize>> {
        self.requests.clone()
    }
}

impl SiteCatalog for StaticCatalog {
    fn get_queues(
        &self,
        community: &str,
        filters: &QueueFilters,
    ) -> CatalogFuture<Vec<CatalogSite>> {
        self.requests.set(self.requests.get() + 1);
        let sites = filter_sites(self.sites.clone(), community, filters);
        Box::pin(async move { Ok(sites) })
    }
}

pub struct FailingCatalog {
    message: String,
}

impl FailingCatalog {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl SiteCatalog for FailingCatalog {
    fn get_queues(
        &self,
        _community: &str,
        _filters: &QueueFilters,
    ) -> CatalogFuture<Vec<CatalogSite>> {
        let message = self.message.clone();
        Box::pin(async move { Err(anyhow::anyhow!(message)) })
    }
}

/// Consumer that stores every ranking it receives.
#[derive(Default)]
pub struct RecordingConsumer {
    rankings: Rc<RefCell<Vec<RankedQueueList>>>,
    fail: bool,
}

impl RecordingConsumer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn rankings(&self) -> Rc<RefCell<Vec<RankedQueueList>>> {
        self.rankings.clone()
    }
}

impl SubmissionConsumer for RecordingConsumer {
    fn consume(&mut self, ranking: &RankedQueueList) -> DirectorResult<()> {
        self.rankings.borrow_mut().push(ranking.clone());
        if self.fail {
            anyhow::bail!("submission backend is down");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    reports: Rc<RefCell<Vec<CycleReport>>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Rc<RefCell<Vec<CycleReport>>> {
        self.reports.clone()
    }
}

impl ReportSink for RecordingSink {
    fn publish(&mut self, report: &CycleReport) {
        self.reports.borrow_mut().push(report.clone());
    }
}

#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct TestQueue {
    #[builder(default = "\"CERN.ch\".to_string()", setter(into))]
    site: String,
    #[builder(default = "\"ce1.cern\".to_string()", setter(into))]
    ce_name: String,
    #[builder(default = "\"HTCondorCE\".to_string()", setter(into))]
    ce_type: String,
    #[builder(default = "\"short\".to_string()", setter(into))]
    queue: String,
    #[builder(default = "Some(1.2)")]
    pue: Option<f64>,
    #[builder(default = "Some(100.0)")]
    ci: Option<f64>,
    #[builder(default)]
    efficiency: Option<f64>,
    #[builder(default = "Some(3600.0)")]
    cpu_time: Option<f64>,
    #[builder(default)]
    behavior: CeBehavior,
}

impl TestQueueBuilder {
    pub fn finish(self) -> QueueDescriptor {
        let TestQueue {
            site,
            ce_name,
            ce_type,
            queue,
            pue,
            ci,
            efficiency,
            cpu_time,
            behavior,
        } = self.build().unwrap();
        let mut parameters = ParameterMap::new();
        for (key, value) in [
            (PUE, pue),
            (CI, ci),
            (EFFICIENCY, efficiency),
            (CPU_TIME, cpu_time),
        ] {
            if let Some(value) = value {
                parameters.insert(key.to_string(), value.into());
            }
        }
        QueueDescriptor::new(site, ce_name, ce_type, queue, parameters, handle(behavior))
    }
}
