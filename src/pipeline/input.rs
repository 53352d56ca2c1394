//! Input resolution: turn a target reference into a local, typed file.
//!
//! Every backend wants a file-system path. URL targets are downloaded and
//! inline content is decoded into a `TempDir` owned by the returned
//! [`ResolvedInput`], so the artifact is removed when the handle drops on
//! every exit path, panics included. Local paths are used in place.
//!
//! ## Content detection
//!
//! The first signal wins:
//!
//! 1. explicit hint
//! 2. suffix of the reference (path or URL path)
//! 3. HTTP `Content-Type` (or the `data:` URI media type)
//! 4. magic bytes
//! 5. a URL with no other signal is a web page
//! 6. otherwise [`ContentKind::Unknown`]

use crate::config::{ContentKind, Target};
use crate::error::PolyExtractError;
use crate::pipeline::encode::decode_base64;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Bytes read from the head of a file for magic-byte detection.
const SNIFF_LEN: usize = 512;

/// A local file ready for the backends, plus what is known about it.
#[derive(Debug)]
pub struct ResolvedInput {
    path: PathBuf,
    kind: ContentKind,
    source_url: Option<String>,
    content_type: Option<String>,
    /// Kept alive until the handle drops.
    temp_dir: Option<TempDir>,
}

impl ResolvedInput {
    /// Wrap an existing local file without staging.
    pub fn local(path: impl Into<PathBuf>, kind: ContentKind) -> Self {
        Self {
            path: path.into(),
            kind,
            source_url: None,
            content_type: None,
            temp_dir: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// The original URL for downloaded targets.
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Directory of the staged artifact, if any.
    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }
}

/// Resolve a target to a local file and detect its content kind.
///
/// `hint` is the caller's declared type (kind name, suffix or MIME type).
/// Besides deciding the kind, it names the suffix of any staged file.
pub async fn resolve(
    target: &Target,
    hint: Option<&str>,
    download_timeout_secs: u64,
) -> Result<ResolvedInput, PolyExtractError> {
    let hint = hint.map(str::trim).filter(|h| !h.is_empty());
    match target {
        Target::Url(url) => download_url(url, hint, download_timeout_secs).await,
        Target::Path(path) => resolve_local(path, hint.and_then(ContentKind::from_hint)),
        Target::Inline(data) => stage_inline(data, hint).await,
    }
}

fn resolve_local(path: &Path, hint: Option<ContentKind>) -> Result<ResolvedInput, PolyExtractError> {
    if !path.exists() || path.is_dir() {
        return Err(PolyExtractError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut head = Vec::with_capacity(SNIFF_LEN);
    match std::fs::File::open(path) {
        Ok(f) => {
            f.take(SNIFF_LEN as u64)
                .read_to_end(&mut head)
                .map_err(|_| PolyExtractError::PermissionDenied {
                    path: path.to_path_buf(),
                })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PolyExtractError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(PolyExtractError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let kind = detect_kind(hint, Some(&path.to_string_lossy()), None, &head, false);
    debug!("Resolved local input {} as {}", path.display(), kind);
    Ok(ResolvedInput::local(path, kind))
}

async fn download_url(
    url: &str,
    hint: Option<&str>,
    timeout_secs: u64,
) -> Result<ResolvedInput, PolyExtractError> {
    info!("Downloading {}", url);

    let failed = |reason: String| PolyExtractError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let timed_out = || PolyExtractError::DownloadTimeout {
        url: url.to_string(),
        secs: timeout_secs,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            timed_out()
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    let url_path = reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            timed_out()
        } else {
            failed(e.to_string())
        }
    })?;

    let kind = detect_kind(
        hint.and_then(ContentKind::from_hint),
        Some(&url_path),
        content_type.as_deref(),
        &bytes,
        true,
    );
    let filename = url_filename(&url_path).unwrap_or_else(|| {
        format!(
            "download{}",
            kind.file_suffix(hint.or(content_type.as_deref()))
        )
    });

    let (temp_dir, path) = stage_bytes(&filename, &bytes).await?;
    info!("Downloaded {} bytes to {} ({})", bytes.len(), path.display(), kind);

    Ok(ResolvedInput {
        path,
        kind,
        source_url: Some(url.to_string()),
        content_type,
        temp_dir: Some(temp_dir),
    })
}

async fn stage_inline(data: &str, hint: Option<&str>) -> Result<ResolvedInput, PolyExtractError> {
    let (media_type, bytes) = decode_inline(data)?;
    let kind = detect_kind(
        hint.and_then(ContentKind::from_hint),
        None,
        media_type.as_deref(),
        &bytes,
        false,
    );
    let filename = format!("inline{}", kind.file_suffix(hint.or(media_type.as_deref())));

    let (temp_dir, path) = stage_bytes(&filename, &bytes).await?;
    debug!("Staged {} inline bytes as {} ({})", bytes.len(), path.display(), kind);

    Ok(ResolvedInput {
        path,
        kind,
        source_url: None,
        content_type: media_type,
        temp_dir: Some(temp_dir),
    })
}

/// Decode inline content: plain base64 or a `data:` URI.
fn decode_inline(data: &str) -> Result<(Option<String>, Vec<u8>), PolyExtractError> {
    let invalid = |reason: &str| PolyExtractError::InvalidInlineContent {
        reason: reason.to_string(),
    };

    let trimmed = data.trim();
    let (media_type, bytes) = if let Some(rest) = trimmed.strip_prefix("data:") {
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| invalid("data URI has no ',' separator"))?;
        let mut parts = header.split(';');
        let media_type = parts
            .next()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty());
        let is_base64 = parts.any(|p| p.eq_ignore_ascii_case("base64"));
        let bytes = if is_base64 {
            decode_base64(payload).ok_or_else(|| invalid("payload is not valid base64"))?
        } else {
            payload.as_bytes().to_vec()
        };
        (media_type, bytes)
    } else {
        let bytes = decode_base64(trimmed).ok_or_else(|| invalid("not valid base64"))?;
        (None, bytes)
    };

    if bytes.is_empty() {
        return Err(invalid("decoded content is empty"));
    }
    Ok((media_type, bytes))
}

async fn stage_bytes(filename: &str, bytes: &[u8]) -> Result<(TempDir, PathBuf), PolyExtractError> {
    let temp_dir = tempfile::Builder::new()
        .prefix("polyextract-")
        .tempdir()
        .map_err(|e| PolyExtractError::Staging(e.to_string()))?;
    let path = temp_dir.path().join(filename);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| PolyExtractError::Staging(format!("failed to write temp file: {e}")))?;
    Ok((temp_dir, path))
}

/// Last URL path segment when it looks like a file name.
fn url_filename(url_path: &str) -> Option<String> {
    let last = url_path.rsplit('/').next()?;
    let safe: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    (safe.contains('.') && !safe.starts_with('.')).then_some(safe)
}

// ── Detection ────────────────────────────────────────────────────────────

/// Apply the detection policy to whatever signals are available.
pub fn detect_kind(
    hint: Option<ContentKind>,
    name: Option<&str>,
    content_type: Option<&str>,
    head: &[u8],
    is_url: bool,
) -> ContentKind {
    hint.or_else(|| name.and_then(kind_from_suffix))
        .or_else(|| content_type.and_then(kind_from_content_type))
        .or_else(|| kind_from_magic(head))
        .unwrap_or(if is_url {
            ContentKind::Html
        } else {
            ContentKind::Unknown
        })
}

fn kind_from_suffix(name: &str) -> Option<ContentKind> {
    let file = name.rsplit(['/', '\\']).next()?;
    let (_, ext) = file.rsplit_once('.')?;
    ContentKind::from_hint(ext)
}

fn kind_from_content_type(content_type: &str) -> Option<ContentKind> {
    let mime = content_type.split(';').next()?.trim();
    // Generic binary types carry no signal.
    if mime.eq_ignore_ascii_case("application/octet-stream") {
        return None;
    }
    ContentKind::from_hint(mime)
}

/// Sniff the leading bytes.
pub fn kind_from_magic(head: &[u8]) -> Option<ContentKind> {
    if head.starts_with(b"%PDF") {
        return Some(ContentKind::Pdf);
    }
    if head.starts_with(b"\x89PNG\r\n\x1a\n")
        || head.starts_with(&[0xFF, 0xD8, 0xFF])
        || head.starts_with(b"GIF8")
        || head.starts_with(b"BM")
        || (head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP")
    {
        return Some(ContentKind::Image);
    }
    if head.starts_with(b"II*\0") || head.starts_with(b"MM\0*") {
        return Some(ContentKind::Tiff);
    }

    let text = String::from_utf8_lossy(head);
    let lead = text
        .trim_start_matches('\u{FEFF}')
        .trim_start()
        .to_ascii_lowercase();
    if lead.starts_with("<!doctype html") || lead.starts_with("<html") {
        return Some(ContentKind::Html);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[test]
    fn hint_beats_everything() {
        let kind = detect_kind(
            Some(ContentKind::Office),
            Some("report.pdf"),
            Some("text/html"),
            b"%PDF-1.7",
            true,
        );
        assert_eq!(kind, ContentKind::Office);
    }

    #[test]
    fn suffix_then_content_type_then_magic() {
        assert_eq!(
            detect_kind(None, Some("/a/b/scan.TIF"), Some("application/pdf"), b"", false),
            ContentKind::Tiff
        );
        assert_eq!(
            detect_kind(None, Some("/download"), Some("application/pdf"), b"<html>", true),
            ContentKind::Pdf
        );
        assert_eq!(
            detect_kind(None, Some("/download"), Some("application/octet-stream"), b"%PDF-1.4", true),
            ContentKind::Pdf
        );
    }

    #[test]
    fn url_without_signal_is_web_page() {
        assert_eq!(detect_kind(None, Some("/"), None, b"", true), ContentKind::Html);
        assert_eq!(detect_kind(None, Some("/tmp/blob"), None, b"\0\0", false), ContentKind::Unknown);
    }

    #[test]
    fn magic_bytes() {
        assert_eq!(kind_from_magic(b"\x89PNG\r\n\x1a\n...."), Some(ContentKind::Image));
        assert_eq!(kind_from_magic(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ContentKind::Image));
        assert_eq!(kind_from_magic(b"II*\0abcd"), Some(ContentKind::Tiff));
        assert_eq!(kind_from_magic(b"  <!DOCTYPE html><html>"), Some(ContentKind::Html));
        assert_eq!(kind_from_magic(b"hello"), None);
    }

    #[test]
    fn url_filenames() {
        assert_eq!(url_filename("/papers/attention.pdf").as_deref(), Some("attention.pdf"));
        assert_eq!(url_filename("/papers/"), None);
        assert_eq!(url_filename("/index"), None);
    }

    #[test]
    fn inline_data_uri_and_plain_base64() {
        let b64 = STANDARD.encode(b"%PDF-1.4 minimal");
        let (mime, bytes) = decode_inline(&format!("data:application/pdf;base64,{b64}")).unwrap();
        assert_eq!(mime.as_deref(), Some("application/pdf"));
        assert!(bytes.starts_with(b"%PDF"));

        let (mime, bytes) = decode_inline(&b64).unwrap();
        assert!(mime.is_none());
        assert!(bytes.starts_with(b"%PDF"));

        let (mime, bytes) = decode_inline("data:text/plain,hello").unwrap();
        assert_eq!(mime.as_deref(), Some("text/plain"));
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn invalid_inline_is_input_error() {
        let err = decode_inline("!!! not base64 !!!").unwrap_err();
        assert!(matches!(err, PolyExtractError::InvalidInlineContent { .. }));
        assert!(decode_inline("data:application/pdf;base64").is_err());
    }

    #[tokio::test]
    async fn missing_local_path() {
        let err = resolve(&Target::Path("/definitely/not/here.pdf".into()), None, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PolyExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_detected_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noext");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        let input = resolve(&Target::Path(path.clone()), None, 5).await.unwrap();
        assert_eq!(input.kind(), ContentKind::Pdf);
        assert_eq!(input.path(), path.as_path());
        assert!(input.temp_dir().is_none());
    }

    #[tokio::test]
    async fn inline_staging_is_removed_on_drop() {
        let b64 = STANDARD.encode(b"plain text body");
        let input = resolve(&Target::Inline(b64), Some("text"), 5)
            .await
            .unwrap();
        let dir = input.temp_dir().unwrap().to_path_buf();
        assert!(input.path().exists());
        assert_eq!(input.path().extension().unwrap(), "txt");
        drop(input);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn inline_staging_keeps_declared_office_format() {
        let b64 = STANDARD.encode(b"PK\x03\x04 spreadsheet bytes");
        let input = resolve(&Target::Inline(b64), Some("xlsx"), 5).await.unwrap();
        assert_eq!(input.kind(), ContentKind::Office);
        assert_eq!(input.path().extension().unwrap(), "xlsx");

        let b64 = STANDARD.encode(b"PK\x03\x04 slides");
        let uri = format!(
            "data:application/vnd.openxmlformats-officedocument.presentationml.presentation;base64,{b64}"
        );
        let input = resolve(&Target::Inline(uri), None, 5).await.unwrap();
        assert_eq!(input.kind(), ContentKind::Office);
        assert_eq!(input.path().extension().unwrap(), "pptx");
    }
}
