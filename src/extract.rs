//! Extraction entry points.
//!
//! Every entry point returns exactly one [`UnifiedResult`] and never an
//! `Err`: configuration problems, unresolvable inputs, exhausted cascades and
//! malformed backend output all become `success=false` results carrying a
//! message. Temporary artifacts created while resolving the input are owned
//! by the [`ResolvedInput`] and removed when it drops, before the entry point
//! returns.

use crate::backends::{default_backends, Backend, BackendContext, BackendId};
use crate::capability::Capabilities;
use crate::config::{ExtractionConfig, ExtractionRequest};
use crate::error::PolyExtractError;
use crate::output::UnifiedResult;
use crate::pipeline::cascade::{plan, Cascade};
use crate::pipeline::{input, normalize};
use crate::progress::{CascadeObserver, NoopObserver};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A configured extractor: runtime settings, a capability registry and the
/// registered backend adapters.
///
/// Construct once and reuse; [`Extractor::extract`] takes `&self` and keeps
/// no per-request state.
#[derive(Clone)]
pub struct Extractor {
    config: ExtractionConfig,
    capabilities: Arc<Capabilities>,
    backends: BTreeMap<BackendId, Arc<dyn Backend>>,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Extractor {
    /// Use the process-wide capability registry (probed on first use) and
    /// the built-in adapters.
    ///
    /// Probing runs tools and may take a few seconds the first time; call
    /// this outside async code or use [`Extractor::probed`].
    pub fn new(config: ExtractionConfig) -> Self {
        let capabilities = Capabilities::global(&config)
            .clone()
            .with_disabled(&config.disabled_capabilities);
        Self::with_capabilities(config, capabilities)
    }

    /// Like [`Extractor::new`], probing on a blocking thread.
    pub async fn probed(config: ExtractionConfig) -> Result<Self, PolyExtractError> {
        tokio::task::spawn_blocking(move || Self::new(config))
            .await
            .map_err(|e| PolyExtractError::Internal(format!("capability probe failed: {e}")))
    }

    /// Use an explicit registry instead of probing.
    pub fn with_capabilities(config: ExtractionConfig, capabilities: Capabilities) -> Self {
        let capabilities = capabilities.with_disabled(&config.disabled_capabilities);
        Self {
            config,
            capabilities: Arc::new(capabilities),
            backends: default_backends(),
        }
    }

    /// Register (or replace) the adapter for `backend.id()`.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.id(), backend);
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Run one extraction request to completion.
    pub async fn extract(&self, request: &ExtractionRequest) -> UnifiedResult {
        let started = Instant::now();
        info!("Starting extraction: {}", request.target.describe());

        let observer: &dyn CascadeObserver = match self.config.observer {
            Some(ref o) => o.as_ref(),
            None => &NoopObserver,
        };

        // ── Step 1: Resolve input ────────────────────────────────────────
        let resolved = match input::resolve(
            &request.target,
            request.content_type_hint.as_deref(),
            self.config.download_timeout_secs,
        )
        .await
        {
            Ok(r) => Arc::new(r),
            Err(e) => {
                warn!("Input resolution failed: {}", e);
                observer.on_cascade_complete(false, false);
                return UnifiedResult::from_error(&e);
            }
        };
        let kind = resolved.kind();
        debug!("Resolved {} as {}", resolved.path().display(), kind);

        // ── Step 2: Plan and run the cascade ─────────────────────────────
        let plan = plan(kind, &request.options);
        let ctx = BackendContext {
            capabilities: Arc::clone(&self.capabilities),
            tool_timeout: Duration::from_secs(self.config.tool_timeout_secs),
            max_scrape_chars: self.config.max_scrape_chars,
            python: self.config.python.clone(),
        };
        let outcome = Cascade::new(&self.backends, ctx, observer)
            .run(&plan, Arc::clone(&resolved), &request.options)
            .await;

        // ── Step 3: Normalize the winner ─────────────────────────────────
        let mut result = match outcome.winner {
            None => UnifiedResult::failure(format!(
                "every backend failed for {} content: {}",
                kind,
                outcome.summary()
            )),
            Some(ref winner) => match normalize::normalize(
                winner.backend,
                &winner.output,
                kind,
                &request.options,
                self.config.max_binary_bytes,
            ) {
                Err(e) => {
                    warn!("{}", e);
                    UnifiedResult::from_error(&e)
                }
                Ok(r) if winner.fallback && !r.has_content() => UnifiedResult::failure(format!(
                    "every backend failed for {} content and the minimal fallback found nothing: {}",
                    kind,
                    outcome.summary()
                )),
                Ok(mut r) => {
                    if winner.fallback {
                        r.metadata.degraded = true;
                        r.metadata
                            .extra
                            .insert("degraded_reason".into(), outcome.summary().into());
                    }
                    r
                }
            },
        };

        result.document.format = kind.as_str().to_string();
        result.backends_used = outcome.backends_used;
        result.attempts = outcome.attempts;
        if let Some(url) = resolved.source_url() {
            result
                .metadata
                .extra
                .entry("source_url")
                .or_insert_with(|| url.into());
        }

        info!(
            "Extraction finished: success={} degraded={} backends={:?} in {}ms",
            result.success,
            result.metadata.degraded,
            result.backends_used,
            started.elapsed().as_millis()
        );
        observer.on_cascade_complete(result.success, result.metadata.degraded);

        // Temp artifacts are removed here, before the result is handed back.
        drop(resolved);
        result
    }

    /// Parse a JSON configuration object and run it.
    pub async fn extract_json(&self, json: &str) -> UnifiedResult {
        match ExtractionRequest::from_json(json) {
            Ok(request) => self.extract(&request).await,
            Err(e) => {
                warn!("Rejected request: {}", e);
                UnifiedResult::from_error(&e)
            }
        }
    }
}

/// One-shot extraction with the process-wide registry and built-in adapters.
///
/// # Example
/// ```rust,no_run
/// use polyextract::{extract, ExtractionConfig, ExtractionRequest, Target};
///
/// # #[tokio::main]
/// # async fn main() {
/// let request = ExtractionRequest::new(Target::parse("report.pdf"));
/// let result = extract(&request, &ExtractionConfig::default()).await;
/// println!("{}", serde_json::to_string_pretty(&result).unwrap());
/// # }
/// ```
pub async fn extract(request: &ExtractionRequest, config: &ExtractionConfig) -> UnifiedResult {
    match Extractor::probed(config.clone()).await {
        Ok(extractor) => extractor.extract(request).await,
        Err(e) => UnifiedResult::from_error(&e),
    }
}

/// One-shot extraction from a JSON configuration object.
pub async fn extract_json(json: &str, config: &ExtractionConfig) -> UnifiedResult {
    let request = match ExtractionRequest::from_json(json) {
        Ok(r) => r,
        Err(e) => return UnifiedResult::from_error(&e),
    };
    extract(&request, config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(request: &ExtractionRequest, config: &ExtractionConfig) -> UnifiedResult {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(extract(request, config)),
        Err(e) => UnifiedResult::from_error(&PolyExtractError::Internal(format!(
            "Failed to create tokio runtime: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use crate::error::ErrorKind;

    fn offline() -> Extractor {
        Extractor::with_capabilities(ExtractionConfig::default(), Capabilities::only(&[]))
    }

    #[tokio::test]
    async fn missing_target_fails_without_backends() {
        let r = offline().extract_json(r#"{"options": {"ocr": true}}"#).await;
        assert!(!r.success);
        assert_eq!(r.error_kind(), Some(ErrorKind::Configuration));
        assert!(r.backends_used.is_empty());
        assert!(r.attempts.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_configuration_error() {
        let r = offline().extract_json("{not json").await;
        assert!(!r.success);
        assert_eq!(r.error_kind(), Some(ErrorKind::Configuration));
    }

    #[tokio::test]
    async fn nothing_available_lists_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.4\n").unwrap();
        let request = ExtractionRequest::new(Target::Path(path));
        let r = offline().extract(&request).await;
        assert!(!r.success);
        assert!(r.backends_used.is_empty());
        assert_eq!(r.attempts.len(), 5);
        assert!(r.attempts.iter().all(|a| a.outcome.is_skipped()));
        assert!(r.attempts[4].fallback);
        assert!(r.error.unwrap().contains("skipped"));
    }

    #[test]
    fn disabled_capabilities_are_applied() {
        let config = ExtractionConfig::builder()
            .disable(crate::capability::Capability::TextScrape)
            .build()
            .unwrap();
        let e = Extractor::with_capabilities(
            config,
            Capabilities::only(&[crate::capability::Capability::TextScrape]),
        );
        assert!(!e
            .capabilities()
            .is_available(crate::capability::Capability::TextScrape));
    }
}
