//! Observer trait for cascade events.
//!
//! Inject an [`Arc<dyn CascadeObserver>`] via
//! [`crate::config::ExtractionConfigBuilder::observer`] to be told, in
//! order, which backend the cascade is about to try and how each attempt
//! ended. The CLI uses it to print progress on stderr while stdout stays
//! reserved for the JSON result.
//!
//! # Example
//!
//! ```rust
//! use polyextract::{BackendId, CascadeObserver, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     failures: AtomicUsize,
//! }
//!
//! impl CascadeObserver for CountingObserver {
//!     fn on_backend_failed(&self, backend: BackendId, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{backend} failed: {error}");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { failures: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .observer(observer as Arc<dyn CascadeObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::backends::BackendId;
use crate::capability::Capability;
use crate::config::ContentKind;
use std::sync::Arc;

/// Called by the cascade controller as it walks its candidate list.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Attempts are sequential, so events for one request
/// never interleave.
pub trait CascadeObserver: Send + Sync {
    /// Called once the candidate list for the detected kind is known.
    fn on_cascade_start(&self, kind: ContentKind, candidates: &[BackendId]) {
        let _ = (kind, candidates);
    }

    /// A candidate was skipped because a required capability is unavailable.
    fn on_backend_skipped(&self, backend: BackendId, missing: Capability) {
        let _ = (backend, missing);
    }

    /// Called just before a backend is invoked. `retry` is true for the
    /// single retry after a recoverable condition.
    fn on_backend_start(&self, backend: BackendId, retry: bool) {
        let _ = (backend, retry);
    }

    fn on_backend_succeeded(&self, backend: BackendId) {
        let _ = backend;
    }

    fn on_backend_failed(&self, backend: BackendId, error: &str) {
        let _ = (backend, error);
    }

    /// Called once after the cascade settled.
    fn on_cascade_complete(&self, success: bool, degraded: bool) {
        let _ = (success, degraded);
    }
}

/// A no-op observer; the default when none is configured.
pub struct NoopObserver;

impl CascadeObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ObserverHandle = Arc<dyn CascadeObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingObserver {
        starts: AtomicUsize,
        skips: AtomicUsize,
        failures: AtomicUsize,
        successes: AtomicUsize,
    }

    impl CascadeObserver for TrackingObserver {
        fn on_backend_skipped(&self, _backend: BackendId, _missing: Capability) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backend_start(&self, _backend: BackendId, _retry: bool) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backend_succeeded(&self, _backend: BackendId) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backend_failed(&self, _backend: BackendId, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_cascade_start(ContentKind::Pdf, &[BackendId::Pdfium]);
        o.on_backend_skipped(BackendId::Docling, Capability::Docling);
        o.on_backend_start(BackendId::Pdfium, false);
        o.on_backend_failed(BackendId::Pdfium, "boom");
        o.on_cascade_complete(false, false);
    }

    #[test]
    fn tracking_observer_receives_events() {
        let o = TrackingObserver::default();
        o.on_backend_skipped(BackendId::Pdfium, Capability::Pdfium);
        o.on_backend_start(BackendId::Pdftotext, false);
        o.on_backend_failed(BackendId::Pdftotext, "exit status 1");
        o.on_backend_start(BackendId::Docling, false);
        o.on_backend_succeeded(BackendId::Docling);

        assert_eq!(o.skips.load(Ordering::SeqCst), 1);
        assert_eq!(o.starts.load(Ordering::SeqCst), 2);
        assert_eq!(o.failures.load(Ordering::SeqCst), 1);
        assert_eq!(o.successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let o: ObserverHandle = Arc::new(NoopObserver);
        o.on_backend_start(BackendId::Crawler, true);
    }
}
