//! Named, hierarchical log sink (spec §4.8).
//!
//! Each engine carries a [`Logger`] whose name path is prefixed to every
//! emitted event. Wrapping engines hand a scoped child down to the
//! engines they own, so `Complex`'s `["COMPLEX", "BACK", "THROTTLE",
//! "BODYSTORE", "INFO"]` example from the spec falls out of repeated
//! `Logger::child` calls during stack assembly.

/// A cheap, clonable handle to a named log path.
///
/// Backed by `tracing`; the actual sink (stdout, JSON file, OTLP
/// exporter, ...) is configured by whoever owns the process, per §1's
/// "logging backends" exclusion.
#[derive(Debug, Clone)]
pub struct Logger {
    path: Vec<&'static str>,
}

impl Logger {
    /// Creates a root logger with a single name segment.
    #[must_use]
    pub fn new(root: &'static str) -> Self {
        Self { path: vec![root] }
    }

    /// Returns a child logger with `name` appended to this logger's path.
    ///
    /// The parent's path is always a prefix of the child's, matching the
    /// spec's "setting the names on a parent propagates to children."
    #[must_use]
    pub fn child(&self, name: &'static str) -> Self {
        let mut path = self.path.clone();
        path.push(name);
        Self { path }
    }

    /// Renders the name path as `A.B.C`, used as a structured field on
    /// every emitted event.
    #[must_use]
    pub fn path_str(&self) -> String {
        self.path.join(".")
    }

    /// `debug`-level event.
    pub fn debug(&self, msg: &str) {
        tracing::debug!(path = %self.path_str(), "{msg}");
    }

    /// `info`-level event.
    pub fn info(&self, msg: &str) {
        tracing::info!(path = %self.path_str(), "{msg}");
    }

    /// `warning`-level event.
    pub fn warning(&self, msg: &str) {
        tracing::warn!(path = %self.path_str(), "{msg}");
    }

    /// `error`-level event: a transient storage error the caller can retry.
    pub fn error(&self, msg: &str) {
        tracing::error!(path = %self.path_str(), severity = "error", "{msg}");
    }

    /// `alert`-level event: fatal, the process should not continue serving.
    ///
    /// `tracing` has no `alert` level; the distinction from `error` is
    /// carried as a structured `severity` field so a downstream sink that
    /// cares can page on it.
    pub fn alert(&self, msg: &str) {
        tracing::error!(path = %self.path_str(), severity = "alert", "{msg}");
    }

    /// `emergency`-level event: an invariant was violated; repair has been
    /// triggered but the condition should never occur.
    pub fn emergency(&self, msg: &str) {
        tracing::error!(path = %self.path_str(), severity = "emergency", "{msg}");
    }
}
