//! Internal error counter
//!
//! Every failure on the recording path increments
//! `internal_monitor_error{name, kind}` on the client's own registry. The
//! counter itself is registered lazily on the first failure and its own
//! registration problems are swallowed: the sink must never recurse into the
//! path it is reporting on.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use prometheus::{CounterVec, Opts};

use crate::error::ErrorKind;
use crate::naming::{build_fq_name, NameAppend};
use crate::registry::CollectorRegistry;

/// Base name of the internal error counter before appends are applied
pub const INTERNAL_ERROR_METRIC: &str = "internal_monitor_error";

const HELP: &str = "Count of errors hit while recording metrics, by metric name and error kind";

pub(crate) struct ErrorSink {
    fq_name: String,
    const_labels: HashMap<String, String>,
    registry: Arc<dyn CollectorRegistry>,
    counter: OnceCell<Option<CounterVec>>,
}

impl ErrorSink {
    pub(crate) fn new(
        counter_append: &NameAppend,
        namespace: &str,
        subsystem: &str,
        const_labels: HashMap<String, String>,
        registry: Arc<dyn CollectorRegistry>,
    ) -> Self {
        Self {
            fq_name: build_fq_name(INTERNAL_ERROR_METRIC, counter_append, namespace, subsystem),
            const_labels,
            registry,
            counter: OnceCell::new(),
        }
    }

    pub(crate) fn fq_name(&self) -> &str {
        &self.fq_name
    }

    /// Count one error of `kind` against metric `name`
    pub(crate) fn record(&self, name: &str, kind: ErrorKind) {
        if let Some(counter) = self.counter() {
            if let Ok(child) = counter.get_metric_with_label_values(&[name, kind.as_str()]) {
                child.inc();
            }
        }
    }

    /// Number of errors recorded so far for `(name, kind)`
    pub(crate) fn count(&self, name: &str, kind: ErrorKind) -> f64 {
        self.counter
            .get()
            .and_then(Option::as_ref)
            .and_then(|counter| counter.get_metric_with_label_values(&[name, kind.as_str()]).ok())
            .map_or(0.0, |child| child.get())
    }

    fn counter(&self) -> Option<&CounterVec> {
        self.counter
            .get_or_init(|| {
                let opts = Opts::new(self.fq_name.clone(), HELP).const_labels(self.const_labels.clone());
                let counter = CounterVec::new(opts, &["name", "kind"]).ok()?;
                // A rejected registration still counts locally
                let _ = self.registry.register(Box::new(counter.clone()));
                Some(counter)
            })
            .as_ref()
    }
}
