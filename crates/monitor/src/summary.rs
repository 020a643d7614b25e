//! Summary collector
//!
//! The `prometheus` crate ships counters, gauges and histograms but no
//! summaries, so this module provides a [`SummaryVec`] collector producing
//! `SUMMARY` metric families. Every child tracks `_sum` and `_count`; when
//! quantile objectives are configured it also feeds a set of quantile
//! sketches and reports one `quantile` sample per objective.
//!
//! Quantiles cover a sliding window of [`MAX_AGE`]. The window is made of
//! [`AGE_BUCKETS`] overlapping sketches: every observation goes into all of
//! them, queries read the oldest one, and the oldest is reset each
//! `MAX_AGE / AGE_BUCKETS`. Sketch accuracy is derived from the tightest
//! objective error.
//!
//! With an empty [`Objectives`] set no sketches are kept at all, which is
//! the recommended setup: quantiles computed client-side cannot be
//! aggregated, so prefer histograms when percentiles are needed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_util::Summary as Sketch;
use parking_lot::{Mutex, RwLock};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{
    LabelPair, Metric, MetricFamily, MetricType, Quantile, Summary as SummaryProto,
};
use prometheus::Opts;

/// How long an observation contributes to the reported quantiles
pub const MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Number of overlapping sketches the quantile window rotates through
pub const AGE_BUCKETS: u32 = 5;

/// Label name reserved for quantile samples
const QUANTILE_LABEL: &str = "quantile";

/// Bounds for the relative accuracy handed to each sketch
const MIN_ACCURACY: f64 = 1e-3;
const MAX_ACCURACY: f64 = 0.1;

/// Bucket cap and zero threshold per sketch
const SKETCH_MAX_BUCKETS: u32 = 4096;
const SKETCH_MIN_VALUE: f64 = 1e-9;

/// Quantile objectives: target quantile mapped to its allowed error.
///
/// Entries are kept sorted by quantile; inserting the same quantile twice
/// keeps the last error. Two sets compare equal when they hold exactly the
/// same pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Objectives {
    entries: Vec<(f64, f64)>,
}

impl Objectives {
    /// Empty objective set (sum and count only)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the error for `quantile`
    #[must_use]
    pub fn with(mut self, quantile: f64, error: f64) -> Self {
        self.insert(quantile, error);
        self
    }

    /// Add or replace the error for `quantile`
    pub fn insert(&mut self, quantile: f64, error: f64) {
        match self.entries.iter_mut().find(|(q, _)| *q == quantile) {
            Some(entry) => entry.1 = error,
            None => {
                self.entries.push((quantile, error));
                self.entries.sort_by(|a, b| a.0.total_cmp(&b.0));
            }
        }
    }

    /// True when no quantile is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tracked quantiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `(quantile, error)` pairs in ascending quantile order
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Relative accuracy for the sketches backing these objectives.
    ///
    /// A tenth of the tightest error, so that the value error of the sketch
    /// stays well inside the rank error each objective allows. `None` when
    /// there is nothing to track.
    fn sketch_accuracy(&self) -> Option<f64> {
        self.iter()
            .map(|(_, error)| error)
            .reduce(f64::min)
            .map(|error| (error / 10.0).clamp(MIN_ACCURACY, MAX_ACCURACY))
    }

    fn validate(&self) -> prometheus::Result<()> {
        for (quantile, error) in self.iter() {
            if !(0.0..=1.0).contains(&quantile) {
                return Err(prometheus::Error::Msg(format!(
                    "illegal objective quantile {quantile}, must be within [0, 1]"
                )));
            }
            if !(0.0..=1.0).contains(&error) {
                return Err(prometheus::Error::Msg(format!(
                    "illegal error {error} for objective quantile {quantile}"
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(f64, f64)> for Objectives {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut objectives = Self::new();
        for (quantile, error) in iter {
            objectives.insert(quantile, error);
        }
        objectives
    }
}

impl fmt::Display for Objectives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (quantile, error)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{quantile}: {error}")?;
        }
        f.write_str("}")
    }
}

/// Age-rotated quantile sketches of one series
struct QuantileWindow {
    streams: Vec<Sketch>,
    head: usize,
    head_expires: Instant,
    rotation: Duration,
    accuracy: f64,
}

impl QuantileWindow {
    fn new(accuracy: f64, now: Instant) -> Self {
        let rotation = MAX_AGE / AGE_BUCKETS;
        Self {
            streams: (0..AGE_BUCKETS).map(|_| fresh_sketch(accuracy)).collect(),
            head: 0,
            head_expires: now + rotation,
            rotation,
            accuracy,
        }
    }

    /// Reset every stream whose age window ended before `now`
    fn rotate(&mut self, now: Instant) {
        if now < self.head_expires {
            return;
        }
        if now.duration_since(self.head_expires) >= MAX_AGE {
            for stream in &mut self.streams {
                *stream = fresh_sketch(self.accuracy);
            }
            self.head_expires = now + self.rotation;
            return;
        }
        while now >= self.head_expires {
            self.streams[self.head] = fresh_sketch(self.accuracy);
            self.head = (self.head + 1) % self.streams.len();
            self.head_expires += self.rotation;
        }
    }

    fn insert(&mut self, value: f64, now: Instant) {
        self.rotate(now);
        for stream in &mut self.streams {
            stream.add(value);
        }
    }

    /// Quantile over the oldest live stream; NaN when it is empty
    fn query(&mut self, quantile: f64, now: Instant) -> f64 {
        self.rotate(now);
        self.streams[self.head].quantile(quantile).unwrap_or(f64::NAN)
    }
}

impl fmt::Debug for QuantileWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantileWindow")
            .field("head", &self.head)
            .field("accuracy", &self.accuracy)
            .finish_non_exhaustive()
    }
}

fn fresh_sketch(accuracy: f64) -> Sketch {
    Sketch::new(accuracy, SKETCH_MAX_BUCKETS, SKETCH_MIN_VALUE)
}

#[derive(Debug)]
struct SummaryState {
    count: u64,
    sum: f64,
    quantiles: Option<QuantileWindow>,
}

/// One summary time series
#[derive(Debug, Clone)]
pub struct Summary {
    state: Arc<Mutex<SummaryState>>,
}

impl Summary {
    fn new(accuracy: Option<f64>) -> Self {
        let quantiles = accuracy.map(|accuracy| QuantileWindow::new(accuracy, Instant::now()));
        Self { state: Arc::new(Mutex::new(SummaryState { count: 0, sum: 0.0, quantiles })) }
    }

    /// Record one observation
    pub fn observe(&self, value: f64) {
        self.observe_at(value, Instant::now());
    }

    fn observe_at(&self, value: f64, now: Instant) {
        let mut state = self.state.lock();
        state.count += 1;
        state.sum += value;
        if let Some(window) = state.quantiles.as_mut() {
            window.insert(value, now);
        }
    }

    /// Number of observations so far
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.state.lock().count
    }

    /// Sum of all observations so far
    #[must_use]
    pub fn sample_sum(&self) -> f64 {
        self.state.lock().sum
    }

    fn snapshot(&self, objectives: &Objectives) -> SummaryProto {
        let now = Instant::now();
        let mut state = self.state.lock();
        let quantiles = objectives
            .iter()
            .map(|(target, _)| {
                let value = state.quantiles.as_mut().map_or(f64::NAN, |window| window.query(target, now));
                let mut quantile = Quantile::default();
                quantile.set_quantile(target);
                quantile.set_value(value);
                quantile
            })
            .collect();

        let mut proto = SummaryProto::default();
        proto.set_sample_count(state.count);
        proto.set_sample_sum(state.sum);
        proto.set_quantile(quantiles);
        proto
    }
}

struct SummaryVecCore {
    desc: Desc,
    fq_name: String,
    help: String,
    label_names: Vec<String>,
    const_labels: Vec<(String, String)>,
    objectives: Objectives,
    accuracy: Option<f64>,
    children: RwLock<HashMap<Vec<String>, Summary>>,
}

/// Summary family partitioned by a fixed set of label names
#[derive(Clone)]
pub struct SummaryVec {
    core: Arc<SummaryVecCore>,
}

impl fmt::Debug for SummaryVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryVec")
            .field("fq_name", &self.core.fq_name)
            .field("label_names", &self.core.label_names)
            .field("objectives", &self.core.objectives)
            .finish_non_exhaustive()
    }
}

impl SummaryVec {
    /// Create a summary family.
    ///
    /// # Errors
    /// Fails for invalid names or labels, for objectives outside `[0, 1]`,
    /// and when `quantile` is used as a label name.
    pub fn new(opts: Opts, objectives: Objectives, label_names: &[&str]) -> prometheus::Result<Self> {
        objectives.validate()?;
        if label_names.contains(&QUANTILE_LABEL) || opts.const_labels.contains_key(QUANTILE_LABEL) {
            return Err(prometheus::Error::Msg(format!(
                "\"{QUANTILE_LABEL}\" is reserved for summary quantiles"
            )));
        }

        let fq_name = opts.fq_name();
        let label_names: Vec<String> = label_names.iter().map(|name| (*name).to_string()).collect();
        let desc = Desc::new(fq_name.clone(), opts.help.clone(), label_names.clone(), opts.const_labels.clone())?;

        let mut const_labels: Vec<(String, String)> = opts.const_labels.into_iter().collect();
        const_labels.sort();

        Ok(Self {
            core: Arc::new(SummaryVecCore {
                desc,
                fq_name,
                help: opts.help,
                label_names,
                const_labels,
                accuracy: objectives.sketch_accuracy(),
                objectives,
                children: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Objectives this family was created with
    #[must_use]
    pub fn objectives(&self) -> &Objectives {
        &self.core.objectives
    }

    /// Child for a complete label map, created on first use.
    ///
    /// # Errors
    /// Fails unless `labels` holds exactly the family's label names.
    pub fn get_metric_with(&self, labels: &HashMap<&str, &str>) -> prometheus::Result<Summary> {
        let names = &self.core.label_names;
        if labels.len() != names.len() {
            return Err(prometheus::Error::Msg(format!(
                "inconsistent label cardinality, expect {} label values, but got {}",
                names.len(),
                labels.len()
            )));
        }

        let values = names
            .iter()
            .map(|name| {
                labels.get(name.as_str()).map(|value| (*value).to_string()).ok_or_else(|| {
                    prometheus::Error::Msg(format!("label name {name} missing in label map"))
                })
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        if let Some(summary) = self.core.children.read().get(&values) {
            return Ok(summary.clone());
        }

        let accuracy = self.core.accuracy;
        let mut children = self.core.children.write();
        Ok(children.entry(values).or_insert_with(|| Summary::new(accuracy)).clone())
    }

    fn label_pairs(&self, values: &[String]) -> Vec<LabelPair> {
        let variable = self.core.label_names.iter().zip(values);
        let constant = self.core.const_labels.iter().map(|(name, value)| (name, value));
        let mut named: Vec<(&String, &String)> = constant.chain(variable).collect();
        named.sort();

        named
            .into_iter()
            .map(|(name, value)| {
                let mut pair = LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.clone());
                pair
            })
            .collect()
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut children: Vec<(Vec<String>, Summary)> = self
            .core
            .children
            .read()
            .iter()
            .map(|(values, summary)| (values.clone(), summary.clone()))
            .collect();
        if children.is_empty() {
            return Vec::new();
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        let metrics = children
            .iter()
            .map(|(values, summary)| {
                let mut metric = Metric::default();
                metric.set_label(self.label_pairs(values));
                metric.set_summary(summary.snapshot(&self.core.objectives));
                metric
            })
            .collect();

        let mut family = MetricFamily::default();
        family.set_name(self.core.fq_name.clone());
        family.set_help(self.core.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family.set_metric(metrics);
        vec![family]
    }
}
