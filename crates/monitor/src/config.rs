//! Declarative client configuration
//!
//! [`MonitorConfig`] mirrors the [`ClientBuilder`] options so a client can be
//! described in TOML next to the rest of an application's settings:
//!
//! ```toml
//! namespace = "shop"
//! subsystem = "checkout"
//! buckets = [0.01, 0.1, 1.0]
//!
//! [const_labels]
//! region = "eu"
//!
//! [[objectives]]
//! quantile = 0.5
//! error = 0.05
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientBuilder};
use crate::error::MonitorResult;
use crate::naming::NameAppends;
use crate::summary::Objectives;

/// One summary quantile target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    pub quantile: f64,
    pub error: f64,
}

/// Construction options of a [`Client`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Leading name component
    pub namespace: String,
    /// Second name component
    pub subsystem: String,
    /// Per-kind appends; the standard appends when absent
    pub name_appends: Option<NameAppends>,
    /// Labels attached to every metric
    pub const_labels: HashMap<String, String>,
    /// Default histogram and timer buckets; empty keeps the built-in default
    pub buckets: Vec<f64>,
    /// Default summary objectives
    pub objectives: Vec<ObjectiveConfig>,
}

impl MonitorConfig {
    /// Parse a configuration from a TOML document
    ///
    /// # Errors
    /// Returns [`MonitorError::Config`](crate::MonitorError::Config) when the
    /// document is not valid TOML or does not match the expected shape.
    pub fn from_toml_str(input: &str) -> MonitorResult<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Objectives as the summary collector expects them
    #[must_use]
    pub fn objectives(&self) -> Objectives {
        self.objectives.iter().map(|objective| (objective.quantile, objective.error)).collect()
    }

    /// Builder preloaded with these options
    #[must_use]
    pub fn into_builder(self) -> ClientBuilder {
        let objectives = self.objectives();
        let mut builder = Client::builder()
            .namespace(&self.namespace)
            .subsystem(&self.subsystem)
            .const_labels(self.const_labels)
            .buckets(self.buckets)
            .objectives(objectives);
        if let Some(names) = self.name_appends {
            builder = builder.name_appends(names);
        }
        builder
    }

    /// Build a client with its own registry
    #[must_use]
    pub fn build(self) -> Client {
        self.into_builder().build()
    }
}
