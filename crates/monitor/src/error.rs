//! Error types for the instrumentation layer
//!
//! Instrumentation calls never return these to their callers. Every failure on
//! the recording path is counted by the internal error counter under its
//! [`ErrorKind`] and forwarded to the configured logger. Only auxiliary APIs
//! (text exposition, configuration parsing) hand a [`MonitorError`] back.

use std::fmt;

use thiserror::Error;

use crate::cache::MetricKind;

/// Result type used throughout the crate
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Failures of the metrics layer
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The label keys of an observation differ from the family's fixed keys
    #[error("{metric} '{name}' expects labels {expected:?}, got {actual:?}")]
    LabelSchemaMismatch {
        /// Fully-qualified metric name
        name: String,
        /// Kind of the family
        metric: MetricKind,
        /// Label keys fixed by the first observation, sorted
        expected: Vec<String>,
        /// Label keys of the rejected observation, sorted
        actual: Vec<String>,
    },

    /// A later call asked for a different bucket/objective configuration
    #[error("{metric} '{name}' was registered with {registered}, call requested {requested}")]
    ConfigDrift {
        /// Fully-qualified metric name
        name: String,
        /// Kind of the family
        metric: MetricKind,
        /// Configuration the family keeps using
        registered: String,
        /// Configuration the call asked for
        requested: String,
    },

    /// The registry already holds a collector with this name
    #[error("{metric} '{name}' is already registered outside this client: {source}")]
    RegistrationConflict {
        /// Fully-qualified metric name
        name: String,
        /// Kind of the family
        metric: MetricKind,
        /// Error returned by the registry
        #[source]
        source: prometheus::Error,
    },

    /// The family could not be built or resolved
    #[error("failed to build {metric} '{name}': {source}")]
    Construction {
        /// Fully-qualified metric name
        name: String,
        /// Kind of the family
        metric: MetricKind,
        /// Underlying construction or registration error
        #[source]
        source: prometheus::Error,
    },

    /// The observed value cannot be recorded by this kind
    #[error("{metric} '{name}' cannot record value {value}")]
    InvalidValue {
        /// Fully-qualified metric name
        name: String,
        /// Kind of the family
        metric: MetricKind,
        /// The rejected value
        value: f64,
    },

    /// Serializing a registry snapshot failed
    #[error("failed to encode metrics: {0}")]
    Encode(#[source] prometheus::Error),

    /// A configuration document could not be parsed
    #[error("invalid monitor configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl MonitorError {
    /// Stable category of this error, used as the `kind` label of the
    /// internal error counter
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LabelSchemaMismatch { .. } => ErrorKind::LabelSchemaMismatch,
            Self::ConfigDrift { .. } => ErrorKind::ConfigDrift,
            Self::RegistrationConflict { .. } => ErrorKind::RegistrationConflict,
            Self::InvalidValue { .. } => ErrorKind::InvalidValue,
            Self::Construction { .. } | Self::Encode(_) | Self::Config(_) => ErrorKind::Construction,
        }
    }

    /// Fully-qualified name of the offending metric, if the error concerns one
    #[must_use]
    pub fn metric_name(&self) -> Option<&str> {
        match self {
            Self::LabelSchemaMismatch { name, .. }
            | Self::ConfigDrift { name, .. }
            | Self::RegistrationConflict { name, .. }
            | Self::Construction { name, .. }
            | Self::InvalidValue { name, .. } => Some(name),
            Self::Encode(_) | Self::Config(_) => None,
        }
    }

    /// Kind of the offending metric family
    #[must_use]
    pub fn metric_kind(&self) -> Option<MetricKind> {
        match self {
            Self::LabelSchemaMismatch { metric, .. }
            | Self::ConfigDrift { metric, .. }
            | Self::RegistrationConflict { metric, .. }
            | Self::Construction { metric, .. }
            | Self::InvalidValue { metric, .. } => Some(*metric),
            Self::Encode(_) | Self::Config(_) => None,
        }
    }

    /// Whether the observation that hit this error was still recorded
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::ConfigDrift { .. } | Self::RegistrationConflict { .. })
    }
}

/// Error taxonomy of the internal error counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Observation label keys differ from the family's keys
    LabelSchemaMismatch,
    /// Buckets or objectives differ from the registered ones
    ConfigDrift,
    /// Name already registered outside the client
    RegistrationConflict,
    /// Family could not be built, registered or encoded
    Construction,
    /// Value rejected before recording
    InvalidValue,
}

impl ErrorKind {
    /// Label value recorded on the internal error counter
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LabelSchemaMismatch => "label_schema_mismatch",
            Self::ConfigDrift => "config_drift",
            Self::RegistrationConflict => "registration_conflict",
            Self::Construction => "construction_error",
            Self::InvalidValue => "invalid_value",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
