//! Integration tests for the instrumentation facade
//!
//! Tests label schema lock-in, configuration lock-in, naming and constant
//! labels through the text exposition of the client's registry

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prometheus::Registry;
use pulsearc_monitor::{Client, Context, ErrorKind, MetricKind, Objectives};

fn exposition(client: &Client) -> String {
    client.encode_text().unwrap()
}

/// Verifies the first observation fixes a counter's label keys.
///
/// Later observations with a different key set are dropped and counted as
/// label schema mismatches; observations with the same keys and new values
/// are recorded.
#[test]
fn test_label_schema_lock_in() {
    let client = Client::new();
    let ctx = Context::new();

    client.increment_by(&ctx, "m", "d", 1, &["k1", "v1"]);
    client.increment_by(&ctx, "m", "d", 1, &["k1", "v1", "k2", "v2"]);
    client.increment_by(&ctx, "m", "d", 1, &[]);
    client.increment_by(&ctx, "m", "d", 1, &["k1", "other"]);

    let text = exposition(&client);
    assert!(text.contains("counter:m{k1=\"v1\"} 1"));
    assert!(text.contains("counter:m{k1=\"other\"} 1"));
    assert!(!text.contains("k2=\"v2\""));
    assert_eq!(client.internal_error_count("counter:m", ErrorKind::LabelSchemaMismatch), 2.0);
    assert!(text.contains(
        "counter:internal_monitor_error{kind=\"label_schema_mismatch\",name=\"counter:m\"} 2"
    ));
}

/// Verifies label keys are compared as a set, not in call order.
#[test]
fn test_label_key_order_is_irrelevant() {
    let client = Client::new();
    let ctx = Context::new().with_labels(&["b", "2"]);

    client.increment(&ctx, "ordered", "d", &["a", "1"]);
    client.increment(&Context::new().with_labels(&["a", "1"]), "ordered", "d", &["b", "2"]);

    assert!(exposition(&client).contains("counter:ordered{a=\"1\",b=\"2\"} 2"));
    assert_eq!(client.internal_error_count("counter:ordered", ErrorKind::LabelSchemaMismatch), 0.0);
}

/// Verifies ambient context labels merge with call-site pairs.
///
/// Call-site pairs win for the call only; the context is left unchanged.
#[test]
fn test_call_site_labels_override_context() {
    let client = Client::new();
    let ctx = Context::new().with_labels(&["env", "prod", "zone", "a"]);

    client.set(&ctx, "load", "d", 1, &["zone", "b"]);
    client.set(&ctx, "load", "d", 2, &[]);

    let text = exposition(&client);
    assert!(text.contains("gauge:load{env=\"prod\",zone=\"b\"} 1"));
    assert!(text.contains("gauge:load{env=\"prod\",zone=\"a\"} 2"));
    assert_eq!(ctx.labels().get("zone").map(String::as_str), Some("a"));
}

/// Verifies the first observation fixes a histogram's buckets.
///
/// A later call with other buckets is still recorded, into the original
/// buckets, and reported as config drift.
#[test]
fn test_histogram_bucket_lock_in() {
    let client = Client::new();
    let ctx = Context::new();

    client.observe_value(&ctx, "h", "d", 1.5, &[1.0, 2.0, 3.0], &[]);
    client.observe_value(&ctx, "h", "d", 7, &[5.0, 10.0], &[]);

    let text = exposition(&client);
    assert!(text.contains("histogram:h_bucket{le=\"1\"} 0"));
    assert!(text.contains("histogram:h_bucket{le=\"2\"} 1"));
    assert!(text.contains("histogram:h_bucket{le=\"3\"} 1"));
    assert!(text.contains("histogram:h_bucket{le=\"+Inf\"} 2"));
    assert!(!text.contains("le=\"5\""));
    assert!(text.contains("histogram:h_count 2"));
    assert_eq!(client.internal_error_count("histogram:h", ErrorKind::ConfigDrift), 1.0);
}

/// Verifies summary objectives are fixed by the first observation.
#[test]
fn test_summary_objectives_lock_in() {
    let client = Client::new();
    let ctx = Context::new();
    let objectives = Objectives::new().with(0.5, 0.05).with(0.9, 0.01);

    for i in 0..100 {
        client.observe_summary_with_objectives(&ctx, "detail", "d", i, &objectives, &[]);
    }
    client.observe_summary(&ctx, "detail", "d", 50, &[]);

    let text = exposition(&client);
    assert!(text.contains("summary:detail{quantile=\"0.5\"}"));
    assert!(text.contains("summary:detail{quantile=\"0.9\"}"));
    assert!(text.contains("summary:detail_count 101"));
    assert_eq!(client.internal_error_count("summary:detail", ErrorKind::ConfigDrift), 1.0);
}

/// Verifies a summary's quantiles describe the whole stream, not only the
/// most recent observations.
///
/// # Test Steps
/// 1. Observe 0..999 in ascending order with a 0.5 objective at 0.05 error
/// 2. Parse the reported median from the exposition
/// 3. Check it lies within ranks 450..=550
#[test]
fn test_summary_median_covers_whole_stream() {
    let client = Client::new();
    let ctx = Context::new();
    let objectives = Objectives::new().with(0.5, 0.05);

    for i in 0..1000 {
        client.observe_summary_with_objectives(&ctx, "q", "d", i, &objectives, &[]);
    }

    let text = exposition(&client);
    let median: f64 = text
        .lines()
        .find_map(|line| line.strip_prefix("summary:q{quantile=\"0.5\"} "))
        .unwrap()
        .parse()
        .unwrap();
    assert!((450.0..=550.0).contains(&median), "median {median}");
    assert!(text.contains("summary:q_count 1000"));
}

/// Verifies summaries without objectives expose only sum and count.
#[test]
fn test_summary_without_objectives() {
    let client = Client::new();
    client.observe_summary(&Context::new(), "plain", "d", 2.5, &[]);
    client.observe_summary(&Context::new(), "plain", "d", 1.5, &[]);

    let text = exposition(&client);
    assert!(text.contains("summary:plain_sum 4"));
    assert!(text.contains("summary:plain_count 2"));
    assert!(!text.contains("quantile"));
}

/// Verifies names are qualified with namespace, subsystem and kind appends.
#[test]
fn test_namespace_subsystem_scenario() {
    let client = Client::builder().namespace("ns").subsystem("sub").build();
    client.increment(&Context::new(), "reqs", "count", &[]);

    assert_eq!(client.fq_name("reqs", MetricKind::Counter), "ns:sub:counter:reqs");
    assert!(exposition(&client).contains("ns:sub:counter:reqs 1"));
}

/// Verifies raw names that are not valid identifiers are escaped.
#[test]
fn test_raw_names_are_escaped() {
    let client = Client::new();
    client.increment(&Context::new(), "总量", "d", &[]);
    client.increment(&Context::new(), "0a_b:c", "d", &[]);

    let text = exposition(&client);
    assert!(text.contains("counter:U___603b__91cf_ 1"));
    assert!(text.contains("counter:U___30_a_b:c 1"));
}

/// Verifies constant labels land on every family of the client, including
/// the internal error counter.
#[test]
fn test_const_labels_apply_everywhere() {
    let registry = Registry::new();
    let client = Client::builder()
        .registry(registry.clone())
        .const_labels(HashMap::from([("service".to_string(), "api".to_string())]))
        .build();
    let ctx = Context::new();

    client.increment(&ctx, "c", "d", &["k", "v"]);
    client.increment(&ctx, "c", "d", &[]);

    let mut text = Vec::new();
    prometheus::Encoder::encode(&prometheus::TextEncoder::new(), &registry.gather(), &mut text).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("counter:c{k=\"v\",service=\"api\"} 1"));
    assert!(text.contains(
        "counter:internal_monitor_error{kind=\"label_schema_mismatch\",name=\"counter:c\",service=\"api\"} 1"
    ));
}

/// Verifies a name registered outside the client is reported, not fatal.
#[test]
fn test_foreign_registration_conflict() {
    let registry = Registry::new();
    let foreign = prometheus::IntCounter::new("counter:taken", "foreign").unwrap();
    registry.register(Box::new(foreign.clone())).unwrap();
    foreign.inc_by(7);

    let client = Client::builder().registry(registry).build();
    client.increment(&Context::new(), "taken", "d", &[]);
    client.increment(&Context::new(), "taken", "d", &[]);

    assert_eq!(client.internal_error_count("counter:taken", ErrorKind::RegistrationConflict), 1.0);
    assert!(exposition(&client).contains("counter:taken 7"));
}

/// Verifies a timer records roughly the elapsed time and returns it.
///
/// # Test Steps
/// 1. Start a timer and sleep for 50ms
/// 2. Stop it and check the returned duration
/// 3. Check the recorded sum matches the returned duration
#[test]
fn test_timer_records_elapsed_time() {
    let client = Client::new();
    let timer = client.start_timer_with_buckets(&[0.01, 0.05, 1.0]);
    std::thread::sleep(Duration::from_millis(50));
    let elapsed = timer.stop(&Context::new(), "sleep", "d", &[]);

    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(5));

    let text = exposition(&client);
    assert!(text.contains("timer:sleep_seconds_count 1"));
    assert!(text.contains("timer:sleep_seconds_bucket{le=\"0.01\"} 0"));
    assert!(text.contains("timer:sleep_seconds_bucket{le=\"1\"} 1"));

    let sum_line = text.lines().find(|line| line.starts_with("timer:sleep_seconds_sum ")).unwrap();
    let recorded: f64 = sum_line.rsplit(' ').next().unwrap().parse().unwrap();
    assert!((recorded - elapsed.as_secs_f64()).abs() < 1e-3);
}

/// Verifies clones share caches: a family created through one clone is
/// reused by the other.
#[test]
fn test_client_clones_share_families() {
    let client = Client::new();
    let other = client.clone();

    client.increment(&Context::new(), "shared", "d", &["k", "v"]);
    other.increment(&Context::new(), "shared", "d", &["k", "v"]);

    assert!(exposition(&client).contains("counter:shared{k=\"v\"} 2"));
}

/// Writer capturing formatted log output
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Verifies the default logger emits a structured warning per failure.
#[test]
fn test_default_logger_warns_through_tracing() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt().with_writer(move || writer.clone()).with_ansi(false).finish();

    let client = Client::new();
    tracing::subscriber::with_default(subscriber, || {
        client.increment(&Context::new(), "logged", "d", &["k", "v"]);
        client.increment(&Context::new(), "logged", "d", &[]);
    });

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("WARN"));
    assert!(output.contains("event=label_schema_mismatch"));
    assert!(output.contains("counter:logged"));
}
