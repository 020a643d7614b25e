//! Registry capability required by the instrumentation layer
//!
//! The client only needs to register collectors and read back a snapshot.
//! [`prometheus::Registry`] provides both; other backends (or test doubles
//! that count registrations) can implement [`CollectorRegistry`] directly.

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::Registry;

/// Shared collector registry.
///
/// Implementations must tolerate concurrent `register` and `gather` calls.
pub trait CollectorRegistry: Send + Sync {
    /// Register a collector
    ///
    /// # Errors
    /// Returns [`prometheus::Error::AlreadyReg`] when an identical collector
    /// is already registered, or another error when the descriptors are
    /// inconsistent with existing ones.
    fn register(&self, collector: Box<dyn Collector>) -> prometheus::Result<()>;

    /// Current snapshot of every registered metric family
    fn gather(&self) -> Vec<MetricFamily>;
}

impl CollectorRegistry for Registry {
    fn register(&self, collector: Box<dyn Collector>) -> prometheus::Result<()> {
        Registry::register(self, collector)
    }

    fn gather(&self) -> Vec<MetricFamily> {
        Registry::gather(self)
    }
}

/// Whether a registration error means the name was taken by someone else
pub(crate) fn is_already_registered(err: &prometheus::Error) -> bool {
    matches!(err, prometheus::Error::AlreadyReg)
}
