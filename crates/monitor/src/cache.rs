//! Per-kind cache of metric families
//!
//! Families are created lazily on first use and registered against the
//! shared registry at most once per name, even when many threads race on the
//! first observation. The cache is append-only: a family's label keys and
//! kind-specific configuration (histogram buckets, summary objectives) are
//! fixed by whoever wins that race and never change afterwards.
//!
//! ## Concurrency
//! - Lookups of known names take a shard read lock only.
//! - Candidates are built outside any lock; the insert-if-absent uses the
//!   map's entry API so exactly one candidate per name is stored.
//! - Registration runs after the shard lock is released, so registering one
//!   family never blocks observations of another.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::core::Collector;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts};
use tracing::debug;

use crate::context::Labels;
use crate::error::{MonitorError, MonitorResult};
use crate::registry::{is_already_registered, CollectorRegistry};
use crate::summary::{Objectives, Summary, SummaryVec};

/// Kind of a metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonic counter
    Counter,
    /// Gauge that can go up and down
    Gauge,
    /// Bucketed histogram, also used by timers
    Histogram,
    /// Summary with optional quantiles
    Summary,
}

impl MetricKind {
    /// Lower-case kind name, as used in error messages and log details
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, help and constant labels of a family about to be resolved
#[derive(Debug, Clone)]
pub(crate) struct FamilyOpts<'a> {
    pub(crate) name: String,
    pub(crate) help: &'a str,
    pub(crate) const_labels: &'a HashMap<String, String>,
}

impl FamilyOpts<'_> {
    /// Registry options; an empty help text falls back to the metric name
    fn to_opts(&self) -> Opts {
        let help = if self.help.is_empty() { self.name.as_str() } else { self.help };
        Opts::new(self.name.clone(), help).const_labels(self.const_labels.clone())
    }
}

/// A registrable family type and its kind-specific configuration
pub(crate) trait Family: Collector + Clone + 'static {
    /// Configuration fixed at first registration, in borrowed form
    type Config: ?Sized + PartialEq + fmt::Debug + ToOwned;
    /// Series handle inside the family
    type Child;

    const KIND: MetricKind;

    fn create(opts: Opts, config: &Self::Config, label_names: &[&str]) -> prometheus::Result<Self>;

    fn child(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<Self::Child>;

    fn describe(config: &Self::Config) -> String {
        format!("{config:?}")
    }
}

impl Family for CounterVec {
    type Config = ();
    type Child = Counter;

    const KIND: MetricKind = MetricKind::Counter;

    fn create(opts: Opts, _config: &(), label_names: &[&str]) -> prometheus::Result<Self> {
        Self::new(opts, label_names)
    }

    fn child(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<Counter> {
        self.get_metric_with(labels)
    }
}

impl Family for GaugeVec {
    type Config = ();
    type Child = Gauge;

    const KIND: MetricKind = MetricKind::Gauge;

    fn create(opts: Opts, _config: &(), label_names: &[&str]) -> prometheus::Result<Self> {
        Self::new(opts, label_names)
    }

    fn child(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<Gauge> {
        self.get_metric_with(labels)
    }
}

impl Family for HistogramVec {
    type Config = [f64];
    type Child = Histogram;

    const KIND: MetricKind = MetricKind::Histogram;

    fn create(opts: Opts, buckets: &[f64], label_names: &[&str]) -> prometheus::Result<Self> {
        Self::new(HistogramOpts::from(opts).buckets(buckets.to_vec()), label_names)
    }

    fn child(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<Histogram> {
        self.get_metric_with(labels)
    }
}

impl Family for SummaryVec {
    type Config = Objectives;
    type Child = Summary;

    const KIND: MetricKind = MetricKind::Summary;

    fn create(opts: Opts, objectives: &Objectives, label_names: &[&str]) -> prometheus::Result<Self> {
        Self::new(opts, objectives.clone(), label_names)
    }

    fn child(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<Summary> {
        self.get_metric_with(labels)
    }

    fn describe(objectives: &Objectives) -> String {
        objectives.to_string()
    }
}

/// A family as first registered: handle, configuration and label keys
pub(crate) struct CachedFamily<F: Family> {
    name: String,
    family: F,
    config: <F::Config as ToOwned>::Owned,
    label_keys: Vec<String>,
}

impl<F: Family> CachedFamily<F> {
    pub(crate) fn config(&self) -> &F::Config {
        self.config.borrow()
    }

    /// Series for `labels`, whose keys must equal the fixed label keys as a set
    pub(crate) fn resolve(&self, labels: &Labels) -> MonitorResult<F::Child> {
        let actual = sorted_keys(labels);
        if actual != self.label_keys {
            return Err(MonitorError::LabelSchemaMismatch {
                name: self.name.clone(),
                metric: F::KIND,
                expected: self.label_keys.clone(),
                actual,
            });
        }

        let view: HashMap<&str, &str> =
            labels.iter().map(|(key, value)| (key.as_str(), value.as_str())).collect();
        self.family.child(&view).map_err(|source| MonitorError::Construction {
            name: self.name.clone(),
            metric: F::KIND,
            source,
        })
    }
}

/// Append-only map of fully-qualified name to family for one metric kind
pub(crate) struct MetricCache<F: Family> {
    families: DashMap<String, Arc<CachedFamily<F>>>,
}

impl<F: Family> Default for MetricCache<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Family> MetricCache<F> {
    pub(crate) fn new() -> Self {
        Self { families: DashMap::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.families.len()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<CachedFamily<F>>> {
        self.families.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the family for `opts.name`, creating and registering it first
    /// if the name is new.
    ///
    /// `labels` only matter when this call creates the family: their keys
    /// become the family's fixed label keys. Non-fatal problems (config
    /// drift, registry conflicts) are passed to `report` and the cached
    /// family is still returned.
    ///
    /// # Errors
    /// Returns [`MonitorError::Construction`] when a new family cannot be
    /// built; nothing is cached in that case.
    pub(crate) fn get_or_create(
        &self,
        opts: &FamilyOpts<'_>,
        config: &F::Config,
        labels: &Labels,
        registry: &dyn CollectorRegistry,
        mut report: impl FnMut(MonitorError),
    ) -> MonitorResult<Arc<CachedFamily<F>>> {
        if let Some(existing) = self.get(&opts.name) {
            check_drift(&existing, config, &mut report);
            return Ok(existing);
        }

        let label_keys = sorted_keys(labels);
        let label_names: Vec<&str> = label_keys.iter().map(String::as_str).collect();
        let family = F::create(opts.to_opts(), config, &label_names).map_err(|source| {
            MonitorError::Construction { name: opts.name.clone(), metric: F::KIND, source }
        })?;
        let candidate = Arc::new(CachedFamily {
            name: opts.name.clone(),
            family,
            config: <F::Config as ToOwned>::to_owned(config),
            label_keys,
        });

        match self.families.entry(opts.name.clone()) {
            Entry::Occupied(entry) => {
                // Lost the race: drop the candidate, use the stored family
                let existing = Arc::clone(entry.get());
                drop(entry);
                check_drift(&existing, config, &mut report);
                return Ok(existing);
            }
            Entry::Vacant(entry) => drop(entry.insert(Arc::clone(&candidate))),
        }

        match registry.register(Box::new(candidate.family.clone())) {
            Ok(()) => debug!(name = %opts.name, metric = %F::KIND, "metric family registered"),
            Err(source) if is_already_registered(&source) => {
                report(MonitorError::RegistrationConflict {
                    name: opts.name.clone(),
                    metric: F::KIND,
                    source,
                });
            }
            Err(source) => {
                report(MonitorError::Construction { name: opts.name.clone(), metric: F::KIND, source });
            }
        }
        Ok(candidate)
    }
}

fn check_drift<F: Family>(
    cached: &CachedFamily<F>,
    requested: &F::Config,
    report: &mut impl FnMut(MonitorError),
) {
    if cached.config() != requested {
        report(MonitorError::ConfigDrift {
            name: cached.name.clone(),
            metric: F::KIND,
            registered: F::describe(cached.config()),
            requested: F::describe(requested),
        });
    }
}

fn sorted_keys(labels: &Labels) -> Vec<String> {
    let mut keys: Vec<String> = labels.keys().cloned().collect();
    keys.sort_unstable();
    keys
}
