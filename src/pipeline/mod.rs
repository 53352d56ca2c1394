//! Pipeline stages around the backend adapters.
//!
//! Each submodule implements one step of an extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ cascade ──▶ normalize ──▶ (clean, encode)
//! (URL/path/inline)  (backends in order)  (unified schema)
//! ```
//!
//! 1. [`input`]     — turn the target into a local file and detect its kind;
//!    downloads and inline content are staged in a temp dir
//! 2. [`cascade`]   — plan the candidate order for the kind and try each
//!    backend until one succeeds, logging every attempt
//! 3. [`normalize`] — map the winner's raw output into a `UnifiedResult`
//! 4. [`clean`]     — deterministic text and markdown cleanup used by
//!    normalization
//! 5. [`encode`]    — base64 payloads and the binary size limit

pub mod cascade;
pub mod clean;
pub mod encode;
pub mod input;
pub mod normalize;
