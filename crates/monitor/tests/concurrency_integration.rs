//! Integration tests for concurrent first use
//!
//! Tests that racing observations on a brand-new metric register it exactly
//! once, agree on one configuration and lose no observations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::Registry;
use pulsearc_monitor::{Client, CollectorRegistry, Context, ErrorKind};

const THREADS: usize = 16;

/// Registry wrapper counting successful registrations
#[derive(Default)]
struct CountingRegistry {
    inner: Registry,
    registrations: AtomicUsize,
}

impl CollectorRegistry for CountingRegistry {
    fn register(&self, collector: Box<dyn Collector>) -> prometheus::Result<()> {
        self.inner.register(collector)?;
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }
}

fn counting_client() -> (Client, Arc<CountingRegistry>) {
    let registry = Arc::new(CountingRegistry::default());
    let client = Client::builder().collector_registry(registry.clone()).build();
    (client, registry)
}

/// Verifies N concurrent first-use calls register one family and record N
/// observations.
#[test]
fn test_concurrent_first_use_registers_once() {
    let (client, registry) = counting_client();
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                client.increment(&Context::new(), "race", "d", &["k", "v"]);
            });
        }
    });

    assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);
    assert!(client.encode_text().unwrap().contains(&format!("counter:race{{k=\"v\"}} {THREADS}")));
    assert_eq!(client.internal_error_count("counter:race", ErrorKind::RegistrationConflict), 0.0);
}

/// Verifies racing histogram and summary observations on fresh names.
#[test]
fn test_concurrent_first_use_across_kinds() {
    let (client, registry) = counting_client();
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for i in 0..THREADS {
            let client = client.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                let ctx = Context::new().with_labels(&["worker", if i % 2 == 0 { "even" } else { "odd" }]);
                barrier.wait();
                client.observe_value(&ctx, "sizes", "d", i, &[4.0, 8.0, 16.0], &[]);
                client.observe_summary(&ctx, "latency", "d", i, &[]);
                client.set(&ctx, "last", "d", i, &[]);
            });
        }
    });

    assert_eq!(registry.registrations.load(Ordering::SeqCst), 3);
    let text = client.encode_text().unwrap();
    assert!(text.contains("histogram:sizes_count{worker=\"even\"} 8"));
    assert!(text.contains("histogram:sizes_count{worker=\"odd\"} 8"));
    assert!(text.contains("summary:latency_count{worker=\"even\"} 8"));
    assert!(text.contains("summary:latency_count{worker=\"odd\"} 8"));
}

/// Verifies many distinct metrics created concurrently each register once.
#[test]
fn test_concurrent_distinct_metrics() {
    let (client, registry) = counting_client();

    thread::scope(|scope| {
        for i in 0..THREADS {
            let client = &client;
            scope.spawn(move || {
                for round in 0..10 {
                    client.increment(&Context::new(), &format!("metric_{}", (i + round) % THREADS), "d", &[]);
                }
            });
        }
    });

    assert_eq!(registry.registrations.load(Ordering::SeqCst), THREADS);
    let text = client.encode_text().unwrap();
    let total: f64 = text
        .lines()
        .filter(|line| line.starts_with("counter:metric_"))
        .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
        .sum();
    assert_eq!(total, (THREADS * 10) as f64);
}

/// Verifies racing first uses with different buckets agree on one family.
///
/// Even threads ask for `[1, 2]`, odd threads for `[3, 4]`. Whichever
/// config wins the race is stored; every thread that asked for the other one
/// is reported as config drift and still recorded.
#[test]
fn test_concurrent_first_use_with_mixed_buckets() {
    let (client, registry) = counting_client();
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for i in 0..THREADS {
            let client = &client;
            let barrier = &barrier;
            scope.spawn(move || {
                let buckets: &[f64] = if i % 2 == 0 { &[1.0, 2.0] } else { &[3.0, 4.0] };
                barrier.wait();
                client.observe_value(&Context::new(), "mixed", "d", 0.5, buckets, &[]);
            });
        }
    });

    let text = client.encode_text().unwrap();
    let low = text.contains("histogram:mixed_bucket{le=\"1\"}");
    let high = text.contains("histogram:mixed_bucket{le=\"3\"}");
    assert!(low ^ high, "{text}");

    assert_eq!(text.matches("# TYPE histogram:mixed histogram").count(), 1);
    // The family itself plus the internal error counter
    assert_eq!(registry.registrations.load(Ordering::SeqCst), 2);

    assert!(text.contains(&format!("histogram:mixed_count {THREADS}")), "{text}");
    #[allow(clippy::cast_precision_loss)]
    let losers = (THREADS / 2) as f64;
    assert_eq!(client.internal_error_count("histogram:mixed", ErrorKind::ConfigDrift), losers);
}
