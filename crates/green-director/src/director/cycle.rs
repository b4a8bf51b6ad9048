use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::common::config::{CommunityResolver, DirectorConfig, resolve_community};
use crate::director::DirectorResult;
use crate::director::catalog::{QueueFilters, SiteCatalog};
use crate::director::ce::{CeFactory, LoadSnapshot};
use crate::director::descriptor::{
    CPU_TIME, MAX_TOTAL_JOBS, MAX_WAITING_JOBS, ParameterValue, QueueDescriptor,
};
use crate::director::error::QueueError;
use crate::director::metrics::{MetricsProvider, MetricsSource, MetricsSynthesizer};
use crate::director::probe::{ProbeOutcome, ProbeSettings, probe_queues};
use crate::director::report::format_report_line;
use crate::director::resolver::{QueueResolver, Resolution};
use crate::director::scoring::{
    RankedQueueList, RankingResult, ScoringFailurePolicy, ScoringStrategy, create_strategy,
    rank_queues,
};

/// Stages of a single ranking cycle, in the order in which they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStage {
    Resolve,
    Annotate,
    Probe,
    Score,
    Publish,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Resolve => "resolve",
            CycleStage::Annotate => "annotate",
            CycleStage::Probe => "probe",
            CycleStage::Score => "score",
            CycleStage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// Result of a successful cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub community: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub strategy: String,
    pub ranking: RankedQueueList,
    /// Per-queue errors of all stages.
    pub errors: Vec<QueueError>,
    /// Number of site metric values that had to be synthesized.
    pub synthesized_metrics: usize,
    /// Whether the ranking was handed over to the submission consumer.
    pub submitted: bool,
    pub submission_error: Option<String>,
}

/// Receives the ranking of every cycle and places pilots accordingly.
pub trait SubmissionConsumer {
    fn consume(&mut self, ranking: &RankedQueueList) -> DirectorResult<()>;
}

/// Observability output of finished cycles.
pub trait ReportSink {
    fn publish(&mut self, report: &CycleReport);
}

/// Writes the report of every cycle into the log, one line per ranked queue.
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn publish(&mut self, report: &CycleReport) {
        log::info!(
            "Queue ranking of cycle {} ({} strategy, community {})",
            report.cycle,
            report.strategy,
            report.community
        );
        for (index, queue) in report.ranking.iter().enumerate() {
            log::info!("{}", format_report_line(index + 1, queue));
        }
    }
}

/// External systems used by the director.
pub struct Collaborators {
    pub catalog: Box<dyn SiteCatalog>,
    pub ce_factory: Box<dyn CeFactory>,
    pub metrics_source: Box<dyn MetricsSource>,
    pub consumer: Box<dyn SubmissionConsumer>,
    pub community_resolver: Box<dyn CommunityResolver>,
}

/// Live state of a CE, as shown by the queue listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum CeStatus {
    Live(LoadSnapshot),
    Unavailable { error: String },
}

/// Resolved queue with its parameters and the live state of its CE.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub queue_name: String,
    pub site: String,
    pub ce_name: String,
    pub ce_type: String,
    pub cpu_time: Option<ParameterValue>,
    pub max_total_jobs: Option<ParameterValue>,
    pub max_waiting_jobs: Option<ParameterValue>,
    pub status: CeStatus,
}

impl QueueStatus {
    fn new(queue: &QueueDescriptor, outcome: Option<ProbeOutcome>) -> Self {
        let status = match outcome {
            Some(ProbeOutcome::Live { snapshot, .. }) => CeStatus::Live(snapshot),
            Some(ProbeOutcome::Fallback { error, .. }) => CeStatus::Unavailable { error },
            None => CeStatus::Unavailable {
                error: "CE was not probed".to_string(),
            },
        };
        Self {
            queue_name: queue.name().to_string(),
            site: queue.site().to_string(),
            ce_name: queue.ce_name().to_string(),
            ce_type: queue.ce_type().to_string(),
            cpu_time: queue.parameter(CPU_TIME).cloned(),
            max_total_jobs: queue.parameter(MAX_TOTAL_JOBS).cloned(),
            max_waiting_jobs: queue.parameter(MAX_WAITING_JOBS).cloned(),
            status,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct QueueListing {
    pub queues: Vec<QueueStatus>,
    /// Queues without a usable CE handle.
    pub unresolved: Vec<QueueError>,
}

/// Runs ranking cycles: `resolve -> annotate -> probe -> score -> publish`.
///
/// Only a failure of the site catalog aborts a cycle. Every other problem is confined to the
/// affected queue and recorded in the [`CycleReport`].
pub struct Director {
    community: String,
    filters: QueueFilters,
    reset_ce_cache: bool,
    cycle_interval: Duration,
    failure_policy: ScoringFailurePolicy,
    probe: ProbeSettings,
    resolver: QueueResolver,
    metrics: MetricsProvider,
    strategy: Box<dyn ScoringStrategy>,
    consumer: Box<dyn SubmissionConsumer>,
    sink: Box<dyn ReportSink>,
    cycles: u64,
}

impl Director {
    pub fn new(
        config: DirectorConfig,
        collaborators: Collaborators,
        strategy: Box<dyn ScoringStrategy>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let Collaborators {
            catalog,
            ce_factory,
            metrics_source,
            consumer,
            community_resolver,
        } = collaborators;
        let community =
            resolve_community(config.community.as_deref(), community_resolver.as_ref())?;
        log::debug!(
            "Director for community {community} uses {} strategy",
            strategy.name()
        );

        Ok(Self {
            community,
            filters: config.filters,
            reset_ce_cache: config.reset_ce_cache,
            cycle_interval: config.cycle_interval,
            failure_policy: config.scoring_failure,
            probe: ProbeSettings {
                timeout: config.probe_timeout,
                concurrency: config.probe_concurrency,
                fallback_load: config.probe_fallback_load,
            },
            resolver: QueueResolver::new(catalog, ce_factory, config.resolver),
            metrics: MetricsProvider::new(
                metrics_source,
                MetricsSynthesizer::new(config.synthesis.seed),
            ),
            strategy,
            consumer,
            sink: Box::new(LogReportSink),
            cycles: 0,
        })
    }

    /// Create a director with the strategy selected in `config`.
    pub fn from_config(
        config: DirectorConfig,
        collaborators: Collaborators,
    ) -> crate::Result<Self> {
        let strategy = create_strategy(config.strategy, config.weights);
        Self::new(config, collaborators, strategy)
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn community(&self) -> &str {
        &self.community
    }

    async fn resolve(&mut self) -> crate::Result<Resolution> {
        if self.reset_ce_cache {
            self.resolver.clear_cache();
        }
        self.resolver.resolve(&self.filters, &self.community).await
    }

    /// Run a single cycle.
    ///
    /// Returns an error only when the site catalog fails. In that case, nothing is submitted and
    /// no report is published.
    pub async fn run_cycle(&mut self) -> crate::Result<CycleReport> {
        self.cycles += 1;
        let cycle = self.cycles;
        let started_at = Utc::now();
        let start = Instant::now();

        log::debug!("Cycle {cycle}: {}", CycleStage::Resolve);
        let Resolution {
            mut queues,
            dropped,
        } = match self.resolve().await {
            Ok(resolution) => resolution,
            Err(error) => {
                log::error!("Cycle {cycle} failed: {error}");
                return Err(error);
            }
        };
        let mut errors = dropped;
        if queues.is_empty() {
            log::warn!(
                "No queues were resolved for community {}, skipping submission cycle",
                self.community
            );
        }

        log::debug!("Cycle {cycle}: {}", CycleStage::Annotate);
        let synthesized_metrics = self.metrics.annotate(queues.values_mut());

        log::debug!("Cycle {cycle}: {}", CycleStage::Probe);
        let mut outcomes = probe_queues(&queues, &self.probe).await;

        log::debug!("Cycle {cycle}: {}", CycleStage::Score);
        let fallback_load = self.probe.fallback_load;
        let RankingResult {
            ranking,
            errors: ranking_errors,
        } = rank_queues(
            self.strategy.as_ref(),
            self.failure_policy,
            queues.iter_mut().map(|(name, queue)| {
                let outcome = outcomes.remove(name).unwrap_or_else(|| {
                    ProbeOutcome::fallback(fallback_load, "CE was not probed".to_string())
                });
                (queue, outcome)
            }),
        );
        errors.extend(ranking_errors);

        log::debug!("Cycle {cycle}: {}", CycleStage::Publish);
        let (submitted, submission_error) = if ranking.is_empty() {
            (false, None)
        } else {
            match self.consumer.consume(&ranking) {
                Ok(()) => (true, None),
                Err(error) => {
                    log::error!("Ranking of cycle {cycle} could not be submitted: {error:#}");
                    (false, Some(format!("{error:#}")))
                }
            }
        };

        let report = CycleReport {
            cycle,
            community: self.community.clone(),
            started_at,
            duration: start.elapsed(),
            strategy: self.strategy.name().to_string(),
            ranking,
            errors,
            synthesized_metrics,
            submitted,
            submission_error,
        };
        self.sink.publish(&report);
        log::info!(
            "Cycle {cycle} ranked {} queue(s) in {}, {} queue error(s)",
            report.ranking.len(),
            humantime::format_duration(truncate_millis(report.duration)),
            report.errors.len()
        );
        Ok(report)
    }

    /// Run cycles every `cycle_interval`, until `cycles` cycles finish or the process is
    /// interrupted. A failed cycle is logged and the next one runs as planned.
    pub async fn run(&mut self, cycles: Option<u64>) {
        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut finished = 0;
        while cycles.is_none_or(|cycles| finished < cycles) {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted, stopping the director");
                    break;
                }
            }
            if let Err(error) = self.run_cycle().await {
                log::debug!("Continuing after failed cycle: {error}");
            }
            finished += 1;
        }
        log::debug!("Director finished after {finished} cycle(s)");
    }

    /// Resolve and probe all queues without scoring them.
    pub async fn list_queues(&mut self) -> crate::Result<QueueListing> {
        let Resolution { queues, dropped } = self.resolve().await?;
        let mut outcomes = probe_queues(&queues, &self.probe).await;
        Ok(QueueListing {
            queues: queues
                .iter()
                .map(|(name, queue)| QueueStatus::new(queue, outcomes.remove(name)))
                .collect(),
            unresolved: dropped,
        })
    }
}

fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
