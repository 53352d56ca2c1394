//! Error types for the polyextract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PolyExtractError`] — **Fatal to the request**: the extraction cannot
//!   proceed at all (no target given, the reference cannot be resolved, the
//!   winning backend produced output of an unexpected shape). The entry point
//!   turns it into a `success=false` [`crate::output::UnifiedResult`].
//!
//! * [`AdapterError`] — **Contained by the cascade**: one backend failed on
//!   one call. It is recorded in the attempt log and the cascade advances to
//!   the next candidate (after at most one retry for a
//!   [`RecoverableCondition`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::backends::BackendId;

/// All request-level errors returned by the polyextract library.
#[derive(Debug, Error)]
pub enum PolyExtractError {
    // ── Configuration errors ─────────────────────────────────────────────
    /// The request or runtime configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The request names no target reference at all.
    #[error("Invalid configuration: a target (URL, local path or inline content) is required")]
    MissingTarget,

    // ── Input errors ──────────────────────────────────────────────────────
    /// Local target was not found at the given path.
    #[error("Failed to resolve input: file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Failed to resolve input: permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to resolve input: download of '{url}' failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Failed to resolve input: download of '{url}' timed out after {secs}s")]
    DownloadTimeout { url: String, secs: u64 },

    /// Inline content could not be decoded.
    #[error("Failed to resolve input: inline content could not be decoded: {reason}")]
    InvalidInlineContent { reason: String },

    /// A temporary artifact could not be created or written.
    #[error("Failed to resolve input: could not stage temporary file: {0}")]
    Staging(String),

    // ── Normalization errors ─────────────────────────────────────────────
    /// A backend succeeded but its output does not have the expected shape.
    #[error("Failed to normalize output of backend '{backend}': {detail}")]
    Normalization { backend: BackendId, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse taxonomy of [`PolyExtractError`], reported in result metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Input,
    Normalization,
    Internal,
}

impl PolyExtractError {
    /// Which branch of the taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolyExtractError::Configuration(_) | PolyExtractError::MissingTarget => {
                ErrorKind::Configuration
            }
            PolyExtractError::FileNotFound { .. }
            | PolyExtractError::PermissionDenied { .. }
            | PolyExtractError::DownloadFailed { .. }
            | PolyExtractError::DownloadTimeout { .. }
            | PolyExtractError::InvalidInlineContent { .. }
            | PolyExtractError::Staging(_) => ErrorKind::Input,
            PolyExtractError::Normalization { .. } => ErrorKind::Normalization,
            PolyExtractError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A backend-declared condition under which one retry is worthwhile.
///
/// Adapters produce this from their own knowledge of the tool's failure
/// format; the cascade never inspects failure text itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum RecoverableCondition {
    /// The backend rejected a parameter as deprecated or unknown. The retry
    /// drops the request option that produced it.
    DeprecatedParameter { option: String },
}

/// A single backend call failed.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Known-recoverable failure; retried exactly once with the offending
    /// option removed.
    #[error("{backend}: {message} (recoverable: {condition:?})")]
    Transient {
        backend: BackendId,
        condition: RecoverableCondition,
        message: String,
    },

    /// Any other failure. Not retried.
    #[error("{backend}: {message}")]
    Permanent { backend: BackendId, message: String },
}

impl AdapterError {
    pub fn permanent(backend: BackendId, message: impl Into<String>) -> Self {
        AdapterError::Permanent {
            backend,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient { .. })
    }

    /// The failure message without the backend prefix.
    pub fn message(&self) -> &str {
        match self {
            AdapterError::Transient { message, .. } | AdapterError::Permanent { message, .. } => {
                message
            }
        }
    }
}
