use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::config::StrategyKind;
use crate::director::descriptor::{COMPOSITE_SCORE, LOAD_FACTOR, ParameterMap, QueueDescriptor};
use crate::director::error::QueueError;
use crate::director::probe::ProbeOutcome;

/// Weights of the composite score. They are expected to sum to 1.0, but it is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringWeights {
    pub co2: f64,
    pub time: f64,
    pub load: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            co2: 0.5,
            time: 0.3,
            load: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), String> {
        for (name, weight) in [("co2", self.co2), ("time", self.time), ("load", self.load)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!(
                    "weight {name} must be a non-negative number, got {weight}"
                ));
            }
        }
        Ok(())
    }
}

/// What happens with a queue that cannot be scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringFailurePolicy {
    /// The queue is kept at the end of the ranking.
    #[default]
    WorstRank,
    /// The queue is left out of the ranking.
    Exclude,
}

/// Score of a queue, lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum QueueScore {
    /// Ordered lexicographically, there is no single scalar.
    PueCi { pue: f64, ci: f64 },
    Composite { value: f64 },
}

impl QueueScore {
    pub fn is_worst(&self) -> bool {
        match self {
            QueueScore::PueCi { pue, ci } => pue.is_infinite() && ci.is_infinite(),
            QueueScore::Composite { value } => value.is_infinite(),
        }
    }
}

impl fmt::Display for QueueScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_worst() {
            return f.write_str("worst");
        }
        match self {
            QueueScore::PueCi { pue, ci } => write!(f, "PUE {pue:.2} / CI {ci:.1}"),
            QueueScore::Composite { value } => write!(f, "{value:.2}"),
        }
    }
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Rounding used for values stored in queue parameters and shown to operators.
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// A queue of the ranking, as handed over to the submission consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedQueue {
    pub queue_name: String,
    pub site: String,
    pub ce_name: String,
    pub ce_type: String,
    /// Queue parameters, including the metrics and scoring results written during the cycle.
    pub parameters: ParameterMap,
    pub score: QueueScore,
    pub load: ProbeOutcome,
    /// Problems met while ranking the queue. The queue is still usable, but its position may be
    /// based on fallback values.
    pub issues: Vec<QueueError>,
}

impl RankedQueue {
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Queues ordered from the most to the least desirable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RankedQueueList {
    queues: Vec<RankedQueue>,
}

impl RankedQueueList {
    pub fn new(queues: Vec<RankedQueue>) -> Self {
        Self { queues }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RankedQueue> {
        self.queues.iter()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn first(&self) -> Option<&RankedQueue> {
        self.queues.first()
    }

    pub fn last(&self) -> Option<&RankedQueue> {
        self.queues.last()
    }

    pub fn get(&self, queue_name: &str) -> Option<&RankedQueue> {
        self.queues.iter().find(|q| q.queue_name == queue_name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.queues.iter().map(|q| q.queue_name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a RankedQueueList {
    type Item = &'a RankedQueue;
    type IntoIter = std::slice::Iter<'a, RankedQueue>;

    fn into_iter(self) -> Self::IntoIter {
        self.queues.iter()
    }
}

pub trait ScoringStrategy {
    fn name(&self) -> &'static str;

    fn score(
        &self,
        queue: &QueueDescriptor,
        load: &ProbeOutcome,
    ) -> Result<QueueScore, QueueError>;

    /// Score assigned to queues that cannot be scored under [`ScoringFailurePolicy::WorstRank`].
    fn worst_score(&self) -> QueueScore;

    /// Order of two scored queues. Sorting with this order has to be stable.
    fn compare(&self, a: &RankedQueue, b: &RankedQueue) -> Ordering;
}

fn required(queue: &QueueDescriptor, key: &str, value: Option<f64>) -> Result<f64, QueueError> {
    value.ok_or_else(|| QueueError::Scoring {
        queue: queue.name().to_string(),
        message: format!("parameter {key} is missing or not a number"),
    })
}

/// Orders queues by PUE, then by carbon intensity. Equal queues keep the resolution order.
pub struct PueCiStrategy;

impl ScoringStrategy for PueCiStrategy {
    fn name(&self) -> &'static str {
        "pue-ci"
    }

    fn score(
        &self,
        queue: &QueueDescriptor,
        _load: &ProbeOutcome,
    ) -> Result<QueueScore, QueueError> {
        Ok(QueueScore::PueCi {
            pue: required(queue, "PUE", queue.pue())?,
            ci: required(queue, "CI", queue.carbon_intensity())?,
        })
    }

    fn worst_score(&self) -> QueueScore {
        QueueScore::PueCi {
            pue: f64::INFINITY,
            ci: f64::INFINITY,
        }
    }

    fn compare(&self, a: &RankedQueue, b: &RankedQueue) -> Ordering {
        match (&a.score, &b.score) {
            (
                QueueScore::PueCi { pue: pue_a, ci: ci_a },
                QueueScore::PueCi { pue: pue_b, ci: ci_b },
            ) => pue_a.total_cmp(pue_b).then(ci_a.total_cmp(ci_b)),
            _ => Ordering::Equal,
        }
    }
}

/// `score = CI * w_co2 + (CPUTime / 3600) * w_time + (load_factor * 100) * w_load`
///
/// Equal scores are ordered by queue name.
pub struct WeightedStrategy {
    weights: ScoringWeights,
}

impl WeightedStrategy {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl ScoringStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn score(
        &self,
        queue: &QueueDescriptor,
        load: &ProbeOutcome,
    ) -> Result<QueueScore, QueueError> {
        let co2 = required(queue, "CI", queue.carbon_intensity())?;
        let cpu_time = required(queue, "CPUTime", queue.cpu_time())?;
        let value = co2 * self.weights.co2
            + (cpu_time / 3600.0) * self.weights.time
            + (load.load_factor() * 100.0) * self.weights.load;
        Ok(QueueScore::Composite { value })
    }

    fn worst_score(&self) -> QueueScore {
        QueueScore::Composite {
            value: f64::INFINITY,
        }
    }

    fn compare(&self, a: &RankedQueue, b: &RankedQueue) -> Ordering {
        let ordering = match (&a.score, &b.score) {
            (QueueScore::Composite { value: a }, QueueScore::Composite { value: b }) => {
                a.total_cmp(b)
            }
            _ => Ordering::Equal,
        };
        ordering.then_with(|| a.queue_name.cmp(&b.queue_name))
    }
}

pub fn create_strategy(kind: StrategyKind, weights: ScoringWeights) -> Box<dyn ScoringStrategy> {
    match kind {
        StrategyKind::Weighted => Box::new(WeightedStrategy::new(weights)),
        StrategyKind::PueCi => Box::new(PueCiStrategy),
    }
}

#[derive(Debug, Default)]
pub struct RankingResult {
    pub ranking: RankedQueueList,
    /// Probe and scoring errors of individual queues.
    pub errors: Vec<QueueError>,
}

/// Score all queues and order them.
///
/// `LoadFactor` (and `CompositeScore` for composite scores) are written into the queue parameters,
/// rounded to two decimals. The order is computed from unrounded scores. A queue that cannot be
/// scored is handled according to `policy`.
pub fn rank_queues<'a, I>(
    strategy: &dyn ScoringStrategy,
    policy: ScoringFailurePolicy,
    queues: I,
) -> RankingResult
where
    I: IntoIterator<Item = (&'a mut QueueDescriptor, ProbeOutcome)>,
{
    let mut ranked = Vec::new();
    let mut errors = Vec::new();

    for (queue, load) in queues {
        let mut issues = Vec::new();
        if let Some(error) = load.error() {
            issues.push(QueueError::Probe {
                queue: queue.name().to_string(),
                ce_name: queue.ce_name().to_string(),
                message: error.to_string(),
            });
        }
        queue.set_parameter(LOAD_FACTOR, round2(load.load_factor()));

        let score = match strategy.score(queue, &load) {
            Ok(score) => {
                if let QueueScore::Composite { value } = score {
                    queue.set_parameter(COMPOSITE_SCORE, round2(value));
                }
                score
            }
            Err(error) => {
                log::warn!("{error}");
                errors.push(error.clone());
                match policy {
                    ScoringFailurePolicy::WorstRank => {
                        issues.push(error);
                        strategy.worst_score()
                    }
                    ScoringFailurePolicy::Exclude => {
                        errors.extend(issues);
                        continue;
                    }
                }
            }
        };
        errors.extend(issues.iter().filter(|issue| issue.is_probe()).cloned());

        ranked.push(RankedQueue {
            queue_name: queue.name().to_string(),
            site: queue.site().to_string(),
            ce_name: queue.ce_name().to_string(),
            ce_type: queue.ce_type().to_string(),
            parameters: queue.parameters().clone(),
            score,
            load,
            issues,
        });
    }

    ranked.sort_by(|a, b| strategy.compare(a, b));
    RankingResult {
        ranking: RankedQueueList::new(ranked),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PueCiStrategy, QueueScore, ScoringFailurePolicy, ScoringStrategy, ScoringWeights,
        WeightedStrategy, rank_queues, round2,
    };
    use crate::director::ce::LoadSnapshot;
    use crate::director::descriptor::{ParameterValue, QueueDescriptor};
    use crate::director::error::QueueError;
    use crate::director::probe::ProbeOutcome;
    use crate::tests::utils::TestQueueBuilder;

    fn live(running: u64, waiting: u64, max_total: u64) -> ProbeOutcome {
        ProbeOutcome::live(LoadSnapshot::new(running, waiting, max_total)).unwrap()
    }

    fn rank(
        strategy: &dyn ScoringStrategy,
        policy: ScoringFailurePolicy,
        queues: &mut [QueueDescriptor],
    ) -> super::RankingResult {
        rank_queues(
            strategy,
            policy,
            queues.iter_mut().map(|q| (q, live(100, 50, 300))),
        )
    }

    fn weighted() -> WeightedStrategy {
        WeightedStrategy::new(ScoringWeights::default())
    }

    #[test]
    fn weighted_score_formula() {
        let queue = TestQueueBuilder::default().ci(Some(15.4)).finish();
        let score = weighted().score(&queue, &live(100, 50, 300)).unwrap();
        match score {
            QueueScore::Composite { value } => assert!((value - 18.0).abs() < 1e-9),
            score => panic!("Unexpected score {score:?}"),
        }
    }

    #[test]
    fn weighted_ranking_is_deterministic() {
        let make = || {
            vec![
                TestQueueBuilder::default().ce_name("ce1").ci(Some(40.0)).finish(),
                TestQueueBuilder::default().ce_name("ce2").ci(Some(15.4)).finish(),
                TestQueueBuilder::default()
                    .ce_name("ce3")
                    .ci(Some(24.6))
                    .cpu_time(Some(86400.0))
                    .finish(),
            ]
        };
        let mut first = make();
        let mut second = make();
        let a = rank(&weighted(), Default::default(), &mut first);
        let b = rank(&weighted(), Default::default(), &mut second);
        assert_eq!(a.ranking, b.ranking);
        assert_eq!(a.ranking.names(), vec!["ce2_short", "ce3_short", "ce1_short"]);
    }

    #[test]
    fn equal_weighted_scores_are_ordered_by_name() {
        let mut queues = vec![
            TestQueueBuilder::default().ce_name("ce.b").finish(),
            TestQueueBuilder::default().ce_name("ce.c").finish(),
            TestQueueBuilder::default().ce_name("ce.a").finish(),
        ];
        let result = rank(&weighted(), Default::default(), &mut queues);
        assert_eq!(
            result.ranking.names(),
            vec!["ce.a_short", "ce.b_short", "ce.c_short"]
        );
    }

    #[test]
    fn pue_ci_ranking_is_stable() {
        let mut queues = vec![
            TestQueueBuilder::default().ce_name("ce.z").pue(Some(1.3)).ci(Some(50.0)).finish(),
            TestQueueBuilder::default().ce_name("ce.y").pue(Some(1.1)).ci(Some(80.0)).finish(),
            TestQueueBuilder::default().ce_name("ce.x").pue(Some(1.3)).ci(Some(50.0)).finish(),
            TestQueueBuilder::default().ce_name("ce.w").pue(Some(1.1)).ci(Some(20.0)).finish(),
        ];
        for _ in 0..3 {
            let result = rank(&PueCiStrategy, Default::default(), &mut queues);
            assert_eq!(
                result.ranking.names(),
                vec!["ce.w_short", "ce.y_short", "ce.z_short", "ce.x_short"]
            );
        }
    }

    #[test]
    fn increasing_co2_never_improves_rank() {
        let position = |ci: f64| {
            let mut queues = vec![
                TestQueueBuilder::default().ce_name("ce.a").ci(Some(30.0)).finish(),
                TestQueueBuilder::default().ce_name("ce.b").ci(Some(ci)).finish(),
                TestQueueBuilder::default().ce_name("ce.c").ci(Some(60.0)).finish(),
            ];
            let result = rank(&weighted(), Default::default(), &mut queues);
            result
                .ranking
                .names()
                .iter()
                .position(|name| *name == "ce.b_short")
                .unwrap()
        };
        let mut last = 0;
        for ci in [10.0, 30.0, 45.0, 60.0, 90.0] {
            let current = position(ci);
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn unscorable_queue_is_worst_ranked() {
        let mut queues = vec![
            TestQueueBuilder::default().ce_name("ce.a").ci(None).finish(),
            TestQueueBuilder::default().ce_name("ce.b").ci(Some(400.0)).finish(),
        ];
        let result = rank(
            &weighted(),
            ScoringFailurePolicy::WorstRank,
            &mut queues,
        );
        assert_eq!(result.ranking.names(), vec!["ce.b_short", "ce.a_short"]);
        let worst = result.ranking.last().unwrap();
        assert!(worst.score.is_worst());
        assert!(matches!(worst.issues[0], QueueError::Scoring { .. }));
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn unscorable_queue_is_excluded() {
        let mut queues = vec![
            TestQueueBuilder::default().ce_name("ce.a").cpu_time(None).finish(),
            TestQueueBuilder::default().ce_name("ce.b").finish(),
        ];
        let result = rank(&weighted(), ScoringFailurePolicy::Exclude, &mut queues);
        assert_eq!(result.ranking.names(), vec!["ce.b_short"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].queue(), "ce.a_short");
    }

    #[test]
    fn failed_probe_keeps_queue_with_fallback_load() {
        let mut queues = vec![
            TestQueueBuilder::default().ce_name("ce.a").finish(),
            TestQueueBuilder::default().ce_name("ce.b").finish(),
        ];
        let loads = [
            ProbeOutcome::fallback(1.0, "connection refused".to_string()),
            live(0, 0, 300),
        ];
        let result = rank_queues(
            &weighted(),
            Default::default(),
            queues.iter_mut().zip(loads),
        );
        assert_eq!(result.ranking.names(), vec!["ce.b_short", "ce.a_short"]);
        let degraded = result.ranking.get("ce.a_short").unwrap();
        assert!(degraded.is_degraded());
        assert!(degraded.issues[0].is_probe());
        assert_eq!(
            degraded.parameters["LoadFactor"],
            ParameterValue::Float(1.0)
        );
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn ranking_uses_unrounded_scores() {
        let strategy = WeightedStrategy::new(ScoringWeights {
            co2: 1.0,
            time: 0.0,
            load: 0.0,
        });
        let mut queues = vec![
            TestQueueBuilder::default().ce_name("ce.a").ci(Some(20.004)).finish(),
            TestQueueBuilder::default().ce_name("ce.b").ci(Some(20.001)).finish(),
        ];
        let result = rank(&strategy, Default::default(), &mut queues);
        assert_eq!(result.ranking.names(), vec!["ce.b_short", "ce.a_short"]);
        for queue in &queues {
            assert_eq!(queue.parameter("CompositeScore"), Some(&ParameterValue::Float(20.0)));
        }
    }

    #[test]
    fn written_back_values_are_rounded() {
        let mut queues = vec![TestQueueBuilder::default().ci(Some(33.333)).finish()];
        rank_queues(
            &weighted(),
            Default::default(),
            queues.iter_mut().map(|q| (q, live(100, 0, 300))),
        );
        assert_eq!(queues[0].parameter("LoadFactor"), Some(&ParameterValue::Float(0.33)));
        assert_eq!(
            queues[0].parameter("CompositeScore"),
            Some(&ParameterValue::Float(23.63))
        );
    }

    #[test]
    fn rounding() {
        assert_eq!(round2(0.333333), 0.33);
        assert_eq!(round2(26.849999), 26.85);
        assert_eq!(round2(18.0), 18.0);
    }

    #[test]
    fn negative_weights_are_rejected() {
        let weights = ScoringWeights {
            co2: -0.5,
            ..Default::default()
        };
        assert!(weights.validate().is_err());
        assert!(ScoringWeights::default().validate().is_ok());
    }
}
