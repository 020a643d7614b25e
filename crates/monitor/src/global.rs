//! Process-wide default client
//!
//! The default client is created on first access and can be replaced at any
//! time with [`set_default`]. Readers never block on a replacement; calls
//! already holding the previous client finish against it.
//!
//! The free functions below forward to whatever client is the default at the
//! moment of the call.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

use crate::client::{Client, Observer, Timer};
use crate::context::Context;
use crate::summary::Objectives;
use crate::value::Number;

/// Path the exposition endpoint is mounted on by default
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

static DEFAULT_CLIENT: Lazy<ArcSwap<Client>> = Lazy::new(|| ArcSwap::from_pointee(Client::new()));

/// The current default client
#[must_use]
pub fn default_client() -> Client {
    Client::clone(&DEFAULT_CLIENT.load())
}

/// Replace the default client, returning the previous one
pub fn set_default(client: Client) -> Client {
    let previous = DEFAULT_CLIENT.swap(Arc::new(client));
    Arc::unwrap_or_clone(previous)
}

/// [`Client::increment`] on the default client
pub fn increment(ctx: &Context, name: &str, help: &str, kvs: &[&str]) {
    DEFAULT_CLIENT.load().increment(ctx, name, help, kvs);
}

/// [`Client::increment_by`] on the default client
pub fn increment_by<N: Number>(ctx: &Context, name: &str, help: &str, delta: N, kvs: &[&str]) {
    DEFAULT_CLIENT.load().increment_by(ctx, name, help, delta, kvs);
}

/// [`Client::set`] on the default client
pub fn set<N: Number>(ctx: &Context, name: &str, help: &str, value: N, kvs: &[&str]) {
    DEFAULT_CLIENT.load().set(ctx, name, help, value, kvs);
}

/// [`Client::observe_duration`] on the default client
pub fn observe_duration(ctx: &Context, name: &str, help: &str, duration: Duration, kvs: &[&str]) {
    DEFAULT_CLIENT.load().observe_duration(ctx, name, help, duration, kvs);
}

/// [`Client::observe_duration_with_buckets`] on the default client
pub fn observe_duration_with_buckets(
    ctx: &Context,
    name: &str,
    help: &str,
    duration: Duration,
    buckets: &[Duration],
    kvs: &[&str],
) {
    DEFAULT_CLIENT.load().observe_duration_with_buckets(ctx, name, help, duration, buckets, kvs);
}

/// [`Client::observe_value`] on the default client
pub fn observe_value<N: Number>(ctx: &Context, name: &str, help: &str, value: N, buckets: &[f64], kvs: &[&str]) {
    DEFAULT_CLIENT.load().observe_value(ctx, name, help, value, buckets, kvs);
}

/// [`Client::observe_summary`] on the default client
pub fn observe_summary<N: Number>(ctx: &Context, name: &str, help: &str, value: N, kvs: &[&str]) {
    DEFAULT_CLIENT.load().observe_summary(ctx, name, help, value, kvs);
}

/// [`Client::observe_summary_with_objectives`] on the default client
pub fn observe_summary_with_objectives<N: Number>(
    ctx: &Context,
    name: &str,
    help: &str,
    value: N,
    objectives: &Objectives,
    kvs: &[&str],
) {
    DEFAULT_CLIENT.load().observe_summary_with_objectives(ctx, name, help, value, objectives, kvs);
}

/// [`Client::start_timer`] on the default client
pub fn start_timer() -> Timer {
    DEFAULT_CLIENT.load().start_timer()
}

/// [`Client::start_timer_with_buckets`] on the default client
pub fn start_timer_with_buckets(buckets: &[f64]) -> Timer {
    DEFAULT_CLIENT.load().start_timer_with_buckets(buckets)
}

/// [`Client::start_observer`] on the default client
pub fn start_observer() -> Observer {
    DEFAULT_CLIENT.load().start_observer()
}
