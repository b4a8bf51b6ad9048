use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::Map;
use crate::director::descriptor::{CI, EFFICIENCY, PUE, QueueDescriptor};
use crate::director::scoring::round_to;

/// Bounds of synthesized metrics.
pub const PUE_BOUNDS: RangeInclusive<f64> = 1.0..=2.0;
pub const CI_BOUNDS: RangeInclusive<f64> = 100.0..=500.0;
pub const EFFICIENCY_BOUNDS: RangeInclusive<f64> = 0.25..=0.75;

/// Environmental metrics of a site. Missing values are synthesized by [`MetricsProvider`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteMetrics {
    /// Power usage effectiveness (>= 1.0).
    pub pue: Option<f64>,
    /// Carbon intensity in gCO2/kWh (> 0).
    #[serde(alias = "co2")]
    pub ci: Option<f64>,
    /// Efficiency score in [0, 1].
    pub efficiency: Option<f64>,
}

impl SiteMetrics {
    pub fn new(pue: f64, ci: f64, efficiency: f64) -> Self {
        Self {
            pue: Some(pue),
            ci: Some(ci),
            efficiency: Some(efficiency),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pue.is_some() && self.ci.is_some() && self.efficiency.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(pue) = self.pue {
            if !pue.is_finite() || pue < 1.0 {
                return Err(format!("PUE has to be at least 1.0, got {pue}"));
            }
        }
        if let Some(ci) = self.ci {
            if !ci.is_finite() || ci <= 0.0 {
                return Err(format!("carbon intensity has to be positive, got {ci}"));
            }
        }
        if let Some(efficiency) = self.efficiency {
            if !(0.0..=1.0).contains(&efficiency) {
                return Err(format!("efficiency has to be in [0, 1], got {efficiency}"));
            }
        }
        Ok(())
    }

    /// Fill the values missing in `self` from `other`.
    pub fn or(self, other: SiteMetrics) -> SiteMetrics {
        SiteMetrics {
            pue: self.pue.or(other.pue),
            ci: self.ci.or(other.ci),
            efficiency: self.efficiency.or(other.efficiency),
        }
    }
}

/// Source of published site metrics.
pub trait MetricsSource {
    /// Metrics of the site, possibly partial. `None` if nothing is known about the site.
    fn lookup(&self, site: &str) -> Option<SiteMetrics>;
}

/// Fixed metrics, e.g. taken from the configuration file.
#[derive(Debug, Default, Clone)]
pub struct StaticMetrics {
    sites: Map<String, SiteMetrics>,
}

impl StaticMetrics {
    pub fn new(sites: Map<String, SiteMetrics>) -> Self {
        Self { sites }
    }
}

impl<S: Into<String>> FromIterator<(S, SiteMetrics)> for StaticMetrics {
    fn from_iter<T: IntoIterator<Item = (S, SiteMetrics)>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(|(site, m)| (site.into(), m)).collect())
    }
}

impl MetricsSource for StaticMetrics {
    fn lookup(&self, site: &str) -> Option<SiteMetrics> {
        self.sites.get(site).copied()
    }
}

fn missing_count(metrics: &SiteMetrics) -> usize {
    [metrics.pue, metrics.ci, metrics.efficiency]
        .iter()
        .filter(|value| value.is_none())
        .count()
}

/// Generates stand-in values for metrics that a site does not publish.
pub struct MetricsSynthesizer {
    rng: StdRng,
}

impl MetricsSynthesizer {
    /// A seeded synthesizer produces the same sequence of values on every run.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }

    /// PUE in [`PUE_BOUNDS`], rounded to two decimals.
    pub fn pue(&mut self) -> f64 {
        round_to(self.rng.random_range(PUE_BOUNDS), 2)
    }

    /// Carbon intensity in [`CI_BOUNDS`], rounded to one decimal.
    pub fn ci(&mut self) -> f64 {
        round_to(self.rng.random_range(CI_BOUNDS), 1)
    }

    /// Efficiency in [`EFFICIENCY_BOUNDS`], rounded to two decimals.
    pub fn efficiency(&mut self) -> f64 {
        round_to(self.rng.random_range(EFFICIENCY_BOUNDS), 2)
    }

    /// Synthesize the values missing in `metrics`.
    pub fn complete(&mut self, metrics: SiteMetrics) -> SiteMetrics {
        SiteMetrics {
            pue: Some(metrics.pue.unwrap_or_else(|| self.pue())),
            ci: Some(metrics.ci.unwrap_or_else(|| self.ci())),
            efficiency: Some(metrics.efficiency.unwrap_or_else(|| self.efficiency())),
        }
    }
}

/// Metrics of a site within a single `annotate` call. The flag marks a synthesized value that
/// was not stored into any queue yet.
struct SiteAnnotation {
    values: [(&'static str, Option<f64>, bool); 3],
}

/// Attaches site metrics to queues.
pub struct MetricsProvider {
    source: Box<dyn MetricsSource>,
    synthesizer: MetricsSynthesizer,
}

impl MetricsProvider {
    pub fn new(source: Box<dyn MetricsSource>, synthesizer: MetricsSynthesizer) -> Self {
        Self {
            source,
            synthesizer,
        }
    }

    /// Complete metrics of a site. Values that the source does not know are synthesized.
    pub fn lookup(&mut self, site: &str) -> SiteMetrics {
        let published = self.source.lookup(site).unwrap_or_default();
        self.synthesizer.complete(published)
    }

    /// Store `PUE`, `CI` and `Efficiency` into the parameters of every queue.
    ///
    /// Values already present in the queue parameters are kept. Missing values come from the
    /// metrics source, or are synthesized once per site and shared by all queues of the site.
    /// Returns the number of synthesized site values that were stored into at least one queue.
    pub fn annotate<'a, I>(&mut self, queues: I) -> usize
    where
        I: IntoIterator<Item = &'a mut QueueDescriptor>,
    {
        let mut sites: Map<String, SiteAnnotation> = Map::default();
        let mut synthesized = 0;

        for queue in queues {
            let site = sites.entry(queue.site().to_string()).or_insert_with(|| {
                let published = self.source.lookup(queue.site()).unwrap_or_default();
                let metrics = self.synthesizer.complete(published);
                let missing = missing_count(&published);
                if missing > 0 {
                    log::debug!(
                        "Site {} does not publish {missing} metric(s), using {metrics:?}",
                        queue.site()
                    );
                }
                SiteAnnotation {
                    values: [
                        (PUE, metrics.pue, published.pue.is_none()),
                        (CI, metrics.ci, published.ci.is_none()),
                        (EFFICIENCY, metrics.efficiency, published.efficiency.is_none()),
                    ],
                }
            });

            for (key, value, pending) in site.values.iter_mut() {
                let (key, Some(value)) = (*key, *value) else {
                    continue;
                };
                if !queue.has_parameter(key) {
                    queue.set_parameter(key, value);
                    if *pending {
                        synthesized += 1;
                        *pending = false;
                    }
                }
            }
        }
        synthesized
    }
}
