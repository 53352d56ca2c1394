//! # polyextract
//!
//! Extract text, tables, figures and layout from web pages and documents
//! through whichever extraction backends happen to be installed.
//!
//! ## Why this crate?
//!
//! Every extraction tool fails somewhere: the in-process PDF library cannot
//! see scanned pages, the layout model is missing on half the machines, the
//! crawler's LLM provider gets renamed under it. This crate probes what is
//! installed once, orders the usable backends for the content at hand, and
//! walks them until one succeeds. Whatever produced it, the caller gets one
//! [`UnifiedResult`] with a log of every attempt.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request (JSON or ExtractionRequest)
//!  │
//!  ├─ 1. Resolve    URL download / local path / inline bytes → local file + kind
//!  ├─ 2. Plan       kind → ordered candidates + minimal fallback
//!  ├─ 3. Cascade    skip unavailable, invoke in order, retry one typed
//!  │                recoverable condition, stop at first success
//!  ├─ 4. Normalize  backend-native output → UnifiedResult, cleanup, limits
//!  └─ 5. Output     one UnifiedResult (never an Err), temp files removed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use polyextract::{extract_json, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ExtractionConfig::default();
//!     let result = extract_json(r#"{"target": "report.pdf"}"#, &config).await;
//!     if result.success {
//!         println!("{}", result.document.markdown);
//!     }
//!     eprintln!("backends used: {:?}", result.backends_used);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `polyextract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! polyextract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends
//!
//! | Kind | Candidates | Minimal fallback |
//! |------|------------|------------------|
//! | pdf | pdfplumber → pdfium → pdftotext → docling | lopdf |
//! | image / tiff | tesseract → docling | image-probe |
//! | office | docling | text-scrape |
//! | html | crawler | html-scrape |
//! | text | text-scrape | |
//! | unknown | docling | text-scrape |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backends;
pub mod capability;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backends::{Backend, BackendContext, BackendId, RawBackendOutput};
pub use capability::{Capabilities, Capability, CapabilityStatus};
pub use config::{
    ContentKind, ExtractionConfig, ExtractionConfigBuilder, ExtractionRequest, Options, Target,
};
pub use error::{AdapterError, ErrorKind, PolyExtractError, RecoverableCondition};
pub use extract::{extract, extract_json, extract_sync, Extractor};
pub use output::{
    AttemptOutcome, BoundingBox, CascadeAttempt, DocumentContent, DocumentMetadata,
    EncodedBinary, Figure, LayoutElement, Link, Links, Media, MediaItem, Table, UnifiedResult,
};
pub use progress::{CascadeObserver, NoopObserver, ObserverHandle};
