//! Lazily registered Prometheus instrumentation for PulseArc services.
//!
//! Call sites name a metric, describe it and record a value; the first call
//! for a name creates and registers the metric family, later calls reuse it.
//! Labels come from the [`Context`] the call runs in plus optional call-site
//! key/value pairs.
//!
//! # Guarantees
//!
//! - Recording never fails the caller. Schema mismatches, configuration drift
//!   and registry conflicts are counted on `internal_monitor_error{name,kind}`
//!   and logged through `tracing`.
//! - Each family is registered at most once, however many threads race on its
//!   first observation.
//! - Label keys, histogram buckets and summary objectives are fixed by the
//!   first observation of a name.
//!
//! # Features
//!
//! - `http`: axum router serving the text exposition format at `/metrics`
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use pulsearc_monitor::{Client, Context};
//!
//! let client = Client::builder().namespace("ns").subsystem("sub").build();
//! let ctx = Context::new().with_labels(&["tenant", "acme"]);
//!
//! client.increment(&ctx, "reqs", "Handled requests", &["route", "/"]);
//! client.observe_duration(&ctx, "db_query", "Query latency", Duration::from_millis(12), &[]);
//!
//! let timer = client.start_timer();
//! // ... work ...
//! let _elapsed = timer.stop(&ctx, "work", "Work duration", &[]);
//!
//! assert!(client.encode_text().unwrap().contains("ns:sub:counter:reqs"));
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod global;
pub mod naming;
pub mod registry;
mod sink;
pub mod summary;
pub mod value;

#[cfg(feature = "http")]
pub mod http;

// Re-export commonly used types
// ------------------------
pub use cache::MetricKind;
pub use client::{default_logger, Client, ClientBuilder, Logger, Observer, Timer, DEFAULT_BUCKETS};
pub use config::{MonitorConfig, ObjectiveConfig};
pub use context::{get_labels, merge_labels, Context, Labels};
pub use error::{ErrorKind, MonitorError, MonitorResult};
pub use global::{
    default_client, increment, increment_by, observe_duration, observe_duration_with_buckets,
    observe_summary, observe_summary_with_objectives, observe_value, set, set_default, start_observer,
    start_timer, start_timer_with_buckets, DEFAULT_METRICS_PATH,
};
pub use naming::{build_fq_name, escape_name, is_valid_metric_name, NameAppend, NameAppends};
pub use registry::CollectorRegistry;
pub use sink::INTERNAL_ERROR_METRIC;
pub use summary::{Objectives, Summary, SummaryVec, AGE_BUCKETS, MAX_AGE};
pub use value::Number;
