//! Metric name escaping and fully-qualified name construction
//!
//! Arbitrary text (including non-ASCII) can be used as a raw metric name.
//! Names that are already valid Prometheus identifiers pass through
//! untouched; everything else is rewritten into a deterministic,
//! collision-free `U__` encoding.
//!
//! ```
//! use pulsearc_monitor::naming::escape_name;
//!
//! assert_eq!(escape_name("abc"), "abc");
//! assert_eq!(escape_name("总量"), "U___603b__91cf_");
//! ```

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Marker prepended to every escaped name
const ESCAPE_PREFIX: &str = "U__";

/// Separator between namespace, subsystem and metric name
const NAME_SEPARATOR: &str = ":";

/// Escape an arbitrary string into a valid metric name.
///
/// Strings matching `^[A-Za-z_:][A-Za-z0-9_:]*$` (and the empty string) are
/// returned unchanged. Otherwise the result starts with `U__` and every
/// character outside `[A-Za-z0-9_:]` (a leading digit included) is replaced by
/// its code point in lowercase hex wrapped in underscores.
#[must_use]
pub fn escape_name(raw: &str) -> String {
    if raw.is_empty() || is_valid_metric_name(raw) {
        return raw.to_string();
    }

    let mut escaped = String::with_capacity(ESCAPE_PREFIX.len() + raw.len() * 2);
    escaped.push_str(ESCAPE_PREFIX);
    for (index, ch) in raw.chars().enumerate() {
        if is_valid_rune(ch, index) {
            escaped.push(ch);
        } else {
            // Writing into a String cannot fail
            let _ = write!(escaped, "_{:x}_", u32::from(ch));
        }
    }
    escaped
}

/// Whether `name` is a legal metric name without escaping
#[must_use]
pub fn is_valid_metric_name(name: &str) -> bool {
    !name.is_empty() && name.chars().enumerate().all(|(index, ch)| is_valid_rune(ch, index))
}

fn is_valid_rune(ch: char, index: usize) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == ':' || (ch.is_ascii_digit() && index > 0)
}

/// Prefix/suffix wrapped around the escaped metric name of one metric kind.
///
/// Only `[a-zA-Z0-9_:]` should be used here; appends are not escaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameAppend {
    /// Prepended to the escaped name
    pub prefix: String,
    /// Appended to the escaped name
    pub suffix: String,
}

impl NameAppend {
    /// Create an append from a prefix and a suffix
    #[must_use]
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), suffix: suffix.into() }
    }

    /// Append with an empty prefix and suffix
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Per-kind name appends, fixed when a client is built.
///
/// The default gives every kind its own prefix and suffixes timer metrics
/// with `_seconds`:
///
/// | kind      | prefix       | suffix     |
/// |-----------|--------------|------------|
/// | counter   | `counter:`   |            |
/// | gauge     | `gauge:`     |            |
/// | timer     | `timer:`     | `_seconds` |
/// | histogram | `histogram:` |            |
/// | summary   | `summary:`   |            |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameAppends {
    /// Counters and the internal error counter
    pub counter: NameAppend,
    /// Gauges
    pub gauge: NameAppend,
    /// Duration histograms and observers
    pub timer: NameAppend,
    /// Value histograms
    pub histogram: NameAppend,
    /// Summaries
    pub summary: NameAppend,
}

impl Default for NameAppends {
    fn default() -> Self {
        Self {
            counter: NameAppend::new("counter:", ""),
            gauge: NameAppend::new("gauge:", ""),
            timer: NameAppend::new("timer:", "_seconds"),
            histogram: NameAppend::new("histogram:", ""),
            summary: NameAppend::new("summary:", ""),
        }
    }
}

impl NameAppends {
    /// No prefixes or suffixes for any kind
    #[must_use]
    pub fn none() -> Self {
        Self {
            counter: NameAppend::none(),
            gauge: NameAppend::none(),
            timer: NameAppend::none(),
            histogram: NameAppend::none(),
            summary: NameAppend::none(),
        }
    }
}

/// Build `namespace:subsystem:<prefix><escaped name><suffix>`.
///
/// Empty components are skipped, so a client without namespace and subsystem
/// produces just the appended name. `namespace` and `subsystem` are expected
/// to be escaped already.
#[must_use]
pub fn build_fq_name(name: &str, append: &NameAppend, namespace: &str, subsystem: &str) -> String {
    let metric = format!("{}{}{}", append.prefix, escape_name(name), append.suffix);
    [namespace, subsystem, metric.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(NAME_SEPARATOR)
}
