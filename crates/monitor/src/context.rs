//! Context-scoped ambient labels
//!
//! A [`Context`] is an immutable value carrying labels that every metric
//! recorded with it inherits. Extending a context produces a new value; the
//! original is never touched, and reads always hand out an independent copy.
//!
//! Labels are given as a flat, alternating key/value slice. Consecutive
//! elements form pairs and an unpaired trailing element is ignored.
//!
//! ```
//! use pulsearc_monitor::Context;
//!
//! let ctx = Context::new().with_labels(&["region", "eu", "tier"]);
//! assert_eq!(ctx.labels().get("region").map(String::as_str), Some("eu"));
//! assert!(!ctx.labels().contains_key("tier"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

/// Concrete label set of one time series
pub type Labels = HashMap<String, String>;

/// Immutable carrier of ambient labels.
///
/// Cloning is cheap: the attached map is shared until the next
/// [`with_labels`](Context::with_labels), which copies it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    labels: Option<Arc<Labels>>,
}

impl Context {
    /// Empty context with no attached labels
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new context whose labels are this context's labels with `kvs`
    /// applied in order. Later pairs overwrite earlier ones.
    #[must_use = "with_labels returns a new context and leaves self unchanged"]
    pub fn with_labels(&self, kvs: &[&str]) -> Self {
        let mut labels = self.labels();
        apply_pairs(&mut labels, kvs);
        Self { labels: Some(Arc::new(labels)) }
    }

    /// Independent copy of the attached labels (empty if none are attached)
    #[must_use]
    pub fn labels(&self) -> Labels {
        self.labels.as_deref().cloned().unwrap_or_default()
    }

    /// Whether any label is attached
    #[must_use]
    pub fn has_labels(&self) -> bool {
        self.labels.as_ref().is_some_and(|labels| !labels.is_empty())
    }

    /// Attached labels merged with call-site pairs, which win on collision.
    /// The context itself is left as is.
    pub(crate) fn resolve(&self, kvs: &[&str]) -> Labels {
        let mut labels = self.labels();
        apply_pairs(&mut labels, kvs);
        labels
    }
}

/// Free-function form of [`Context::with_labels`]
#[must_use]
pub fn merge_labels(ctx: &Context, kvs: &[&str]) -> Context {
    ctx.with_labels(kvs)
}

/// Free-function form of [`Context::labels`]
#[must_use]
pub fn get_labels(ctx: &Context) -> Labels {
    ctx.labels()
}

/// Call `f` for each complete key/value pair of a flat alternating slice
pub(crate) fn for_each_pair<'a>(kvs: &[&'a str], mut f: impl FnMut(&'a str, &'a str)) {
    for pair in kvs.chunks_exact(2) {
        f(pair[0], pair[1]);
    }
}

fn apply_pairs(labels: &mut Labels, kvs: &[&str]) {
    for_each_pair(kvs, |key, value| {
        labels.insert(key.to_string(), value.to_string());
    });
}
