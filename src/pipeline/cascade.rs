//! The fallback cascade.
//!
//! [`plan`] orders the candidate backends for a content kind; [`Cascade::run`]
//! walks them strictly one at a time until one returns content. A backend
//! that finishes without error but extracts nothing (a scanned PDF through a
//! text-layer reader) is a failed attempt, and the next candidate runs. Every candidate
//! leaves exactly one [`CascadeAttempt`] in the log, whether it was skipped
//! for a missing capability, failed, or won. When every candidate failed,
//! the minimal in-process fallback for the kind (if any) gets one try.
//!
//! A backend that reports a [`RecoverableCondition`] is retried once with
//! the offending option removed. Nothing else is retried.

use crate::backends::{Backend, BackendContext, BackendId, RawBackendOutput};
use crate::config::{ContentKind, Options};
use crate::error::{AdapterError, RecoverableCondition};
use crate::output::{AttemptOutcome, CascadeAttempt};
use crate::pipeline::input::ResolvedInput;
use crate::progress::CascadeObserver;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Ordered candidates for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadePlan {
    pub kind: ContentKind,
    pub candidates: Vec<BackendId>,
    /// Minimal in-process backend run after every candidate failed.
    pub fallback: Option<BackendId>,
}

/// Default candidate order and minimal fallback for a content kind.
pub fn default_plan(kind: ContentKind) -> (Vec<BackendId>, Option<BackendId>) {
    use BackendId::*;
    match kind {
        ContentKind::Pdf => (vec![Pdfplumber, Pdfium, Pdftotext, Docling], Some(Lopdf)),
        ContentKind::Image | ContentKind::Tiff => (vec![Tesseract, Docling], Some(ImageProbe)),
        ContentKind::Office => (vec![Docling], Some(TextScrape)),
        ContentKind::Html => (vec![Crawler], Some(HtmlScrape)),
        ContentKind::Text => (vec![TextScrape], None),
        ContentKind::Unknown => (vec![Docling], Some(TextScrape)),
    }
}

/// Build the plan for `kind`, applying the planning options:
///
/// * `prefer_tables` / `use_deepdoctection` move `docling` to the front.
/// * `backends` (list or comma-separated string of names) keeps only the
///   listed candidates, in default order.
/// * `disable_fallback` removes the minimal fallback.
pub fn plan(kind: ContentKind, options: &Options) -> CascadePlan {
    let (mut candidates, mut fallback) = default_plan(kind);

    if options.bool_or("prefer_tables", false) || options.bool_or("use_deepdoctection", false) {
        if let Some(pos) = candidates.iter().position(|b| *b == BackendId::Docling) {
            let docling = candidates.remove(pos);
            candidates.insert(0, docling);
        }
    }

    if let Some(allowed) = allowed_backends(options) {
        candidates.retain(|b| allowed.contains(b));
    }

    if options.bool_or("disable_fallback", false) {
        fallback = None;
    }

    CascadePlan {
        kind,
        candidates,
        fallback,
    }
}

fn allowed_backends(options: &Options) -> Option<Vec<BackendId>> {
    let names: Vec<String> = match options.get("backends")? {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => return None,
    };
    let mut ids = Vec::new();
    for name in names.iter().filter(|n| !n.trim().is_empty()) {
        match BackendId::from_name(name) {
            Some(id) => ids.push(id),
            None => warn!("Ignoring unknown backend name '{}'", name.trim()),
        }
    }
    Some(ids)
}

/// The output of the backend that won.
#[derive(Debug, Clone)]
pub struct Winner {
    pub backend: BackendId,
    pub output: RawBackendOutput,
    /// Produced by the minimal fallback rather than a planned candidate.
    pub fallback: bool,
}

/// Everything the cascade did for one request.
#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub winner: Option<Winner>,
    pub attempts: Vec<CascadeAttempt>,
    /// Backends actually invoked, in order. Skipped candidates are absent.
    pub backends_used: Vec<BackendId>,
}

impl CascadeOutcome {
    /// One line per attempt, for the failure message after exhaustion.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no backend is available for this content".to_string();
        }
        self.attempts
            .iter()
            .map(|a| match &a.outcome {
                AttemptOutcome::Success => format!("{}: succeeded", a.backend),
                AttemptOutcome::SkippedUnavailable { capability } => {
                    format!("{}: skipped ({} unavailable)", a.backend, capability)
                }
                AttemptOutcome::Failed { reason, .. } => format!("{}: {}", a.backend, reason),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Runs a [`CascadePlan`] against a registered backend set.
pub struct Cascade<'a> {
    backends: &'a BTreeMap<BackendId, Arc<dyn Backend>>,
    ctx: BackendContext,
    observer: &'a dyn CascadeObserver,
}

impl<'a> Cascade<'a> {
    pub fn new(
        backends: &'a BTreeMap<BackendId, Arc<dyn Backend>>,
        ctx: BackendContext,
        observer: &'a dyn CascadeObserver,
    ) -> Self {
        Self {
            backends,
            ctx,
            observer,
        }
    }

    pub async fn run(
        &self,
        plan: &CascadePlan,
        input: Arc<ResolvedInput>,
        options: &Options,
    ) -> CascadeOutcome {
        info!(
            "Cascade for {}: {:?} (fallback: {:?})",
            plan.kind, plan.candidates, plan.fallback
        );
        self.observer.on_cascade_start(plan.kind, &plan.candidates);

        let mut outcome = CascadeOutcome::default();
        for &backend in &plan.candidates {
            if let Some(output) = self.attempt(backend, false, &input, options, &mut outcome).await {
                outcome.winner = Some(Winner {
                    backend,
                    output,
                    fallback: false,
                });
                return outcome;
            }
        }

        if let Some(backend) = plan.fallback {
            info!("All candidates failed; trying minimal fallback {}", backend);
            if let Some(output) = self.attempt(backend, true, &input, options, &mut outcome).await {
                outcome.winner = Some(Winner {
                    backend,
                    output,
                    fallback: true,
                });
            }
        }
        outcome
    }

    /// Try one backend, recording exactly one attempt. Returns its output on
    /// success.
    async fn attempt(
        &self,
        backend: BackendId,
        fallback: bool,
        input: &Arc<ResolvedInput>,
        options: &Options,
        outcome: &mut CascadeOutcome,
    ) -> Option<RawBackendOutput> {
        let start = Instant::now();
        let record = |outcome: &mut CascadeOutcome, result: AttemptOutcome, retries: u8| {
            outcome.attempts.push(CascadeAttempt {
                backend,
                outcome: result,
                retries,
                fallback,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        };

        let Some(adapter) = self.backends.get(&backend) else {
            warn!("No adapter registered for {}", backend);
            let reason = "no adapter registered".to_string();
            self.observer.on_backend_failed(backend, &reason);
            record(
                outcome,
                AttemptOutcome::Failed {
                    reason,
                    transient: false,
                },
                0,
            );
            return None;
        };

        if let Some(&missing) = adapter
            .required_capabilities()
            .iter()
            .find(|c| !self.ctx.has(**c))
        {
            debug!("Skipping {}: {} unavailable", backend, missing);
            self.observer.on_backend_skipped(backend, missing);
            record(
                outcome,
                AttemptOutcome::SkippedUnavailable {
                    capability: missing,
                },
                0,
            );
            return None;
        }

        debug_assert!(adapter
            .required_capabilities()
            .iter()
            .all(|c| self.ctx.has(*c)));
        outcome.backends_used.push(backend);

        self.observer.on_backend_start(backend, false);
        let mut retries = 0u8;
        let mut result = self.invoke(adapter, input, options.clone()).await;

        let rejected = match &result {
            Err(AdapterError::Transient {
                condition: RecoverableCondition::DeprecatedParameter { option },
                message,
                ..
            }) if options.contains(option) => {
                warn!(
                    "{} rejected option '{}' ({}); retrying once without it",
                    backend, option, message
                );
                Some(option.clone())
            }
            _ => None,
        };
        if let Some(option) = rejected {
            retries = 1;
            self.observer.on_backend_start(backend, true);
            result = self.invoke(adapter, input, options.without(&option)).await;
        }

        match result {
            Ok(output) if !output.has_content() => {
                let reason = "no content".to_string();
                info!("{} finished without content", backend);
                self.observer.on_backend_failed(backend, &reason);
                record(
                    outcome,
                    AttemptOutcome::Failed {
                        reason,
                        transient: false,
                    },
                    retries,
                );
                None
            }
            Ok(output) => {
                info!("{} succeeded in {}ms", backend, start.elapsed().as_millis());
                self.observer.on_backend_succeeded(backend);
                record(outcome, AttemptOutcome::Success, retries);
                Some(output)
            }
            Err(e) => {
                warn!("{} failed: {}", backend, e.message());
                self.observer.on_backend_failed(backend, e.message());
                record(
                    outcome,
                    AttemptOutcome::Failed {
                        reason: e.message().to_string(),
                        transient: e.is_transient(),
                    },
                    retries,
                );
                None
            }
        }
    }

    /// Invoke on a spawned task so a panicking adapter becomes a failure.
    async fn invoke(
        &self,
        adapter: &Arc<dyn Backend>,
        input: &Arc<ResolvedInput>,
        options: Options,
    ) -> Result<RawBackendOutput, AdapterError> {
        let backend = adapter.id();
        let adapter = Arc::clone(adapter);
        let input = Arc::clone(input);
        let ctx = self.ctx.clone();
        let handle =
            tokio::spawn(async move { adapter.invoke(&input, &options, &ctx).await });
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(AdapterError::permanent(backend, "backend panicked")),
            Err(e) => Err(AdapterError::permanent(backend, format!("backend task failed: {e}"))),
        }
    }
}
