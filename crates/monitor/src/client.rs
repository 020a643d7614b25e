//! Instrumentation facade
//!
//! A [`Client`] turns `(context, name, help, value, labels)` calls into
//! observations on lazily registered metric families. Names are escaped and
//! qualified with the client's namespace, subsystem and per-kind appends;
//! labels come from the context merged with call-site pairs.
//!
//! None of the recording operations return an error. Failures are counted on
//! the internal error counter and passed to the configured [`Logger`].
//!
//! # Example
//! ```
//! use pulsearc_monitor::{Client, Context};
//!
//! let client = Client::builder().namespace("shop").build();
//! let ctx = Context::new().with_labels(&["route", "/cart"]);
//!
//! client.increment(&ctx, "requests", "Handled requests", &[]);
//! client.set(&ctx, "inflight", "Requests in flight", 3, &[]);
//!
//! let text = client.encode_text().unwrap();
//! assert!(text.contains("shop:counter:requests{route=\"/cart\"} 1"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "http")]
use once_cell::sync::OnceCell;
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Registry, TextEncoder};
use tracing::warn;

use crate::cache::{Family, FamilyOpts, MetricCache, MetricKind};
use crate::context::Context;
use crate::error::{ErrorKind, MonitorError, MonitorResult};
#[cfg(feature = "http")]
use crate::http::ScrapeMetrics;
use crate::naming::{build_fq_name, escape_name, NameAppend, NameAppends};
use crate::registry::CollectorRegistry;
use crate::sink::ErrorSink;
use crate::summary::{Objectives, SummaryVec};
use crate::value::Number;

/// Default histogram and timer bucket bounds, in seconds for timers
pub const DEFAULT_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Callback receiving recording failures.
///
/// Arguments are the caller's context, the event kind (an
/// [`ErrorKind`] string) and key/value diagnostics.
pub type Logger = Arc<dyn Fn(&Context, &str, &[(&'static str, String)]) + Send + Sync>;

/// Logger that emits a `tracing` warning per failure
#[must_use]
pub fn default_logger() -> Logger {
    Arc::new(|_ctx, event, details| {
        warn!(event = %event, details = ?details, "metric recording failed");
    })
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    namespace: String,
    subsystem: String,
    names: NameAppends,
    registry: Option<Registry>,
    collector_registry: Option<Arc<dyn CollectorRegistry>>,
    const_labels: HashMap<String, String>,
    logger: Logger,
    buckets: Vec<f64>,
    objectives: Objectives,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            subsystem: String::new(),
            names: NameAppends::default(),
            registry: None,
            collector_registry: None,
            const_labels: HashMap::new(),
            logger: default_logger(),
            buckets: DEFAULT_BUCKETS.to_vec(),
            objectives: Objectives::new(),
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("namespace", &self.namespace)
            .field("subsystem", &self.subsystem)
            .field("names", &self.names)
            .field("const_labels", &self.const_labels)
            .field("buckets", &self.buckets)
            .field("objectives", &self.objectives)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Create a builder with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leading name component; escaped, omitted when empty
    #[must_use]
    pub fn namespace(mut self, namespace: impl AsRef<str>) -> Self {
        self.namespace = escape_name(namespace.as_ref());
        self
    }

    /// Second name component; escaped, omitted when empty
    #[must_use]
    pub fn subsystem(mut self, subsystem: impl AsRef<str>) -> Self {
        self.subsystem = escape_name(subsystem.as_ref());
        self
    }

    /// Per-kind prefixes and suffixes, used verbatim
    #[must_use]
    pub fn name_appends(mut self, names: NameAppends) -> Self {
        self.names = names;
        self
    }

    /// Register into an existing Prometheus registry
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.collector_registry = Some(Arc::new(registry.clone()));
        self.registry = Some(registry);
        self
    }

    /// Register into any [`CollectorRegistry`] implementation
    #[must_use]
    pub fn collector_registry(mut self, registry: Arc<dyn CollectorRegistry>) -> Self {
        self.registry = None;
        self.collector_registry = Some(registry);
        self
    }

    /// Labels attached to every metric of this client
    #[must_use]
    pub fn const_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.const_labels = labels;
        self
    }

    /// Failure callback replacing the default `tracing` warning
    #[must_use]
    pub fn logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&Context, &str, &[(&'static str, String)]) + Send + Sync + 'static,
    {
        self.logger = Arc::new(logger);
        self
    }

    /// Default histogram and timer buckets; an empty list keeps
    /// [`DEFAULT_BUCKETS`]
    #[must_use]
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        if !buckets.is_empty() {
            self.buckets = buckets;
        }
        self
    }

    /// Default summary objectives; empty means sum and count only
    #[must_use]
    pub fn objectives(mut self, objectives: Objectives) -> Self {
        self.objectives = objectives;
        self
    }

    /// Build the client. A fresh registry is created when none was given.
    #[must_use]
    pub fn build(self) -> Client {
        let (registry, collector_registry) = match (self.registry, self.collector_registry) {
            (registry, Some(collector_registry)) => (registry, collector_registry),
            (_, None) => {
                let registry = Registry::new();
                let collector_registry: Arc<dyn CollectorRegistry> = Arc::new(registry.clone());
                (Some(registry), collector_registry)
            }
        };

        let sink = ErrorSink::new(
            &self.names.counter,
            &self.namespace,
            &self.subsystem,
            self.const_labels.clone(),
            Arc::clone(&collector_registry),
        );

        Client {
            inner: Arc::new(ClientInner {
                namespace: self.namespace,
                subsystem: self.subsystem,
                names: self.names,
                registry,
                collector_registry,
                const_labels: self.const_labels,
                logger: self.logger,
                buckets: self.buckets,
                objectives: self.objectives,
                counters: MetricCache::new(),
                gauges: MetricCache::new(),
                histograms: MetricCache::new(),
                summaries: MetricCache::new(),
                sink,
                #[cfg(feature = "http")]
                scrape: OnceCell::new(),
            }),
        }
    }
}

struct ClientInner {
    namespace: String,
    subsystem: String,
    names: NameAppends,
    registry: Option<Registry>,
    collector_registry: Arc<dyn CollectorRegistry>,
    const_labels: HashMap<String, String>,
    logger: Logger,
    buckets: Vec<f64>,
    objectives: Objectives,
    counters: MetricCache<CounterVec>,
    gauges: MetricCache<GaugeVec>,
    histograms: MetricCache<HistogramVec>,
    summaries: MetricCache<SummaryVec>,
    sink: ErrorSink,
    #[cfg(feature = "http")]
    scrape: OnceCell<Option<ScrapeMetrics>>,
}

/// Metrics client. Cheap to clone; clones share caches and registry.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.inner.namespace)
            .field("subsystem", &self.inner.subsystem)
            .field("counters", &self.inner.counters.len())
            .field("gauges", &self.inner.gauges.len())
            .field("histograms", &self.inner.histograms.len())
            .field("summaries", &self.inner.summaries.len())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client with default settings and its own registry
    #[must_use]
    pub fn new() -> Self {
        ClientBuilder::default().build()
    }

    /// Create a new client builder
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The Prometheus registry metrics are registered into, unless the client
    /// was built over a custom [`CollectorRegistry`]
    #[must_use]
    pub fn registry(&self) -> Option<&Registry> {
        self.inner.registry.as_ref()
    }

    /// The registry capability metrics are registered into
    #[must_use]
    pub fn collector_registry(&self) -> &Arc<dyn CollectorRegistry> {
        &self.inner.collector_registry
    }

    /// Snapshot of every family in the registry
    #[must_use]
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.collector_registry.gather()
    }

    /// Snapshot rendered in the Prometheus text exposition format
    ///
    /// # Errors
    /// Returns [`MonitorError::Encode`] if the snapshot cannot be serialized.
    pub fn encode_text(&self) -> MonitorResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf).map_err(MonitorError::Encode)?;
        String::from_utf8(buf).map_err(|err| MonitorError::Encode(prometheus::Error::Msg(err.to_string())))
    }

    /// Scrape counters, registered on the first scrape
    #[cfg(feature = "http")]
    pub(crate) fn scrape_metrics(&self) -> Option<&ScrapeMetrics> {
        self.inner
            .scrape
            .get_or_init(|| ScrapeMetrics::register(self.inner.collector_registry.as_ref()))
            .as_ref()
    }

    /// Errors of `kind` recorded so far against the fully-qualified `name`
    #[must_use]
    pub fn internal_error_count(&self, name: &str, kind: ErrorKind) -> f64 {
        self.inner.sink.count(name, kind)
    }

    /// Fully-qualified name of the internal error counter
    #[must_use]
    pub fn internal_error_metric(&self) -> &str {
        self.inner.sink.fq_name()
    }

    /// Fully-qualified name `name` gets as a metric of `kind`
    #[must_use]
    pub fn fq_name(&self, name: &str, kind: MetricKind) -> String {
        let append = match kind {
            MetricKind::Counter => &self.inner.names.counter,
            MetricKind::Gauge => &self.inner.names.gauge,
            MetricKind::Histogram => &self.inner.names.histogram,
            MetricKind::Summary => &self.inner.names.summary,
        };
        self.qualify(name, append)
    }

    /// Fully-qualified name `name` gets as a timer
    #[must_use]
    pub fn timer_name(&self, name: &str) -> String {
        self.qualify(name, &self.inner.names.timer)
    }

    /// Add 1 to counter `name`
    pub fn increment(&self, ctx: &Context, name: &str, help: &str, kvs: &[&str]) {
        self.increment_by(ctx, name, help, 1, kvs);
    }

    /// Add `delta` to counter `name`. Negative and NaN deltas are dropped.
    pub fn increment_by<N: Number>(&self, ctx: &Context, name: &str, help: &str, delta: N, kvs: &[&str]) {
        let delta = delta.to_f64();
        let append = &self.inner.names.counter;
        if delta.is_nan() || delta < 0.0 {
            let err = MonitorError::InvalidValue {
                name: self.qualify(name, append),
                metric: MetricKind::Counter,
                value: delta,
            };
            self.report(ctx, help, &err);
            return;
        }
        self.record(&self.inner.counters, ctx, name, help, append, &(), kvs, |counter| counter.inc_by(delta));
    }

    /// Set gauge `name` to `value`
    pub fn set<N: Number>(&self, ctx: &Context, name: &str, help: &str, value: N, kvs: &[&str]) {
        let value = value.to_f64();
        let append = &self.inner.names.gauge;
        self.record(&self.inner.gauges, ctx, name, help, append, &(), kvs, |gauge| gauge.set(value));
    }

    /// Record `duration` in seconds on timer `name` with the default buckets
    pub fn observe_duration(&self, ctx: &Context, name: &str, help: &str, duration: Duration, kvs: &[&str]) {
        self.observe_seconds(ctx, name, help, duration, &self.inner.buckets, kvs);
    }

    /// Record `duration` on timer `name` with explicit bucket bounds
    pub fn observe_duration_with_buckets(
        &self,
        ctx: &Context,
        name: &str,
        help: &str,
        duration: Duration,
        buckets: &[Duration],
        kvs: &[&str],
    ) {
        let buckets: Vec<f64> = buckets.iter().map(Duration::as_secs_f64).collect();
        self.observe_seconds(ctx, name, help, duration, &buckets, kvs);
    }

    /// Record `value` on histogram `name` with explicit bucket bounds
    pub fn observe_value<N: Number>(
        &self,
        ctx: &Context,
        name: &str,
        help: &str,
        value: N,
        buckets: &[f64],
        kvs: &[&str],
    ) {
        let value = value.to_f64();
        let append = &self.inner.names.histogram;
        self.record(&self.inner.histograms, ctx, name, help, append, buckets, kvs, |h| h.observe(value));
    }

    /// Record `value` on summary `name` with the client's objectives
    pub fn observe_summary<N: Number>(&self, ctx: &Context, name: &str, help: &str, value: N, kvs: &[&str]) {
        self.observe_summary_with_objectives(ctx, name, help, value, &self.inner.objectives, kvs);
    }

    /// Record `value` on summary `name` with explicit objectives
    pub fn observe_summary_with_objectives<N: Number>(
        &self,
        ctx: &Context,
        name: &str,
        help: &str,
        value: N,
        objectives: &Objectives,
        kvs: &[&str],
    ) {
        let value = value.to_f64();
        let append = &self.inner.names.summary;
        self.record(&self.inner.summaries, ctx, name, help, append, objectives, kvs, |s| s.observe(value));
    }

    /// Start a timer recording into a histogram with the default buckets
    pub fn start_timer(&self) -> Timer {
        self.start_timer_with_buckets(&[])
    }

    /// Start a timer recording into a histogram with `buckets`; empty keeps
    /// the default buckets
    pub fn start_timer_with_buckets(&self, buckets: &[f64]) -> Timer {
        let buckets = if buckets.is_empty() { None } else { Some(buckets.to_vec()) };
        Timer { client: self.clone(), buckets, start: Instant::now() }
    }

    /// Start a timer recording into a summary without quantiles
    pub fn start_observer(&self) -> Observer {
        Observer { client: self.clone(), start: Instant::now() }
    }

    fn observe_seconds(
        &self,
        ctx: &Context,
        name: &str,
        help: &str,
        duration: Duration,
        buckets: &[f64],
        kvs: &[&str],
    ) {
        let seconds = duration.as_secs_f64();
        let append = &self.inner.names.timer;
        self.record(&self.inner.histograms, ctx, name, help, append, buckets, kvs, |h| h.observe(seconds));
    }

    fn qualify(&self, name: &str, append: &NameAppend) -> String {
        build_fq_name(name, append, &self.inner.namespace, &self.inner.subsystem)
    }

    /// Resolve the family and series for one observation and write it
    #[allow(clippy::too_many_arguments)]
    fn record<F: Family>(
        &self,
        cache: &MetricCache<F>,
        ctx: &Context,
        name: &str,
        help: &str,
        append: &NameAppend,
        config: &F::Config,
        kvs: &[&str],
        write: impl FnOnce(F::Child),
    ) {
        let labels = ctx.resolve(kvs);
        let opts = FamilyOpts { name: self.qualify(name, append), help, const_labels: &self.inner.const_labels };
        let registry = self.inner.collector_registry.as_ref();

        let child = cache
            .get_or_create(&opts, config, &labels, registry, |err| self.report(ctx, help, &err))
            .and_then(|family| family.resolve(&labels));
        match child {
            Ok(child) => write(child),
            Err(err) => self.report(ctx, help, &err),
        }
    }

    fn report(&self, ctx: &Context, help: &str, err: &MonitorError) {
        let kind = err.kind();
        let name = err.metric_name().unwrap_or_default();
        self.inner.sink.record(name, kind);

        let details = [
            ("name", name.to_string()),
            ("help", help.to_string()),
            ("metric", err.metric_kind().map(|metric| metric.to_string()).unwrap_or_default()),
            ("error", err.to_string()),
        ];
        (self.inner.logger)(ctx, kind.as_str(), &details);
    }
}

/// Pending histogram observation of elapsed time.
///
/// Created by [`Client::start_timer`]; [`stop`](Timer::stop) records the
/// time since creation on the timer-profiled histogram.
#[derive(Debug)]
#[must_use = "a timer records nothing until stopped"]
pub struct Timer {
    client: Client,
    buckets: Option<Vec<f64>>,
    start: Instant,
}

impl Timer {
    /// Time since the timer was started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record the elapsed time on timer `name` and return it
    pub fn stop(self, ctx: &Context, name: &str, help: &str, kvs: &[&str]) -> Duration {
        let elapsed = self.start.elapsed();
        let buckets = self.buckets.as_deref().unwrap_or(&self.client.inner.buckets);
        self.client.observe_seconds(ctx, name, help, elapsed, buckets, kvs);
        elapsed
    }
}

/// Pending summary observation of elapsed time.
///
/// Records under the timer name appends with sum and count only.
#[derive(Debug)]
#[must_use = "an observer records nothing until stopped"]
pub struct Observer {
    client: Client,
    start: Instant,
}

impl Observer {
    /// Time since the observer was started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record the elapsed time on summary `name` and return it
    pub fn stop(self, ctx: &Context, name: &str, help: &str, kvs: &[&str]) -> Duration {
        let elapsed = self.start.elapsed();
        let seconds = elapsed.as_secs_f64();
        let client = &self.client;
        let append = &client.inner.names.timer;
        let objectives = Objectives::new();
        client.record(&client.inner.summaries, ctx, name, help, append, &objectives, kvs, |s| {
            s.observe(seconds);
        });
        elapsed
    }
}
