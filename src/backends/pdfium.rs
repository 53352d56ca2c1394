//! In-process PDF text extraction via PDFium.
//!
//! PDFium keeps thread-local state and is not async-safe, so the whole
//! document walk runs inside `spawn_blocking` with a freshly bound library
//! instance per call.

use super::{Backend, BackendContext, BackendId, PdfInfo, RawBackendOutput};
use crate::capability::{Capability, PdfiumLocation};
use crate::config::Options;
use crate::error::{AdapterError, PolyExtractError};
use crate::output::UnifiedResult;
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

pub struct PdfiumBackend;

#[async_trait]
impl Backend for PdfiumBackend {
    fn id(&self) -> BackendId {
        BackendId::Pdfium
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Pdfium]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let location = ctx
            .capabilities
            .pdfium_location()
            .cloned()
            .unwrap_or(PdfiumLocation::System);
        let path = input.path().to_path_buf();
        let password = options.get_str("password").map(str::to_string);

        tokio::task::spawn_blocking(move || extract_blocking(&location, &path, password.as_deref()))
            .await
            .map_err(|e| AdapterError::permanent(BackendId::Pdfium, format!("task panicked: {e}")))?
    }
}

fn extract_blocking(
    location: &PdfiumLocation,
    path: &Path,
    password: Option<&str>,
) -> Result<RawBackendOutput, AdapterError> {
    let fail = |msg: String| AdapterError::permanent(BackendId::Pdfium, msg);

    let pdfium = location.bind().map_err(|e| fail(format!("bind failed: {e}")))?;
    let document = pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_ascii_lowercase().contains("password") {
            fail(if password.is_some() {
                "wrong password".to_string()
            } else {
                "document is password protected".to_string()
            })
        } else {
            fail(format!("cannot open PDF: {detail}"))
        }
    })?;

    let metadata = document.metadata();
    let tag = |t: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(t)
            .map(|m| m.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let info = PdfInfo {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        keywords: tag(PdfDocumentMetadataTagType::Keywords),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        version: Some(format!("{:?}", document.version())),
    };

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = page
            .text()
            .map_err(|e| fail(format!("text layer of page {} unreadable: {e:?}", idx + 1)))?
            .all();
        debug!("pdfium page {} → {} chars", idx + 1, text.len());
        pages.push(text);
    }
    info!("pdfium extracted {} pages", pages.len());

    Ok(RawBackendOutput::PdfPages { pages, info })
}

/// Map per-page PDF text into the unified schema. Shared by every PDF text
/// backend.
pub fn normalize(
    backend: BackendId,
    pages: &[String],
    info: &PdfInfo,
) -> Result<UnifiedResult, PolyExtractError> {
    let mut result = UnifiedResult {
        success: true,
        ..Default::default()
    };

    result.document.text = pages
        .iter()
        .map(|p| p.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n");

    let meta = &mut result.metadata;
    meta.page_count = pages.len();
    meta.document_type = "pdf".to_string();
    meta.title = info.title.clone().unwrap_or_default();
    meta.author = info.author.clone().unwrap_or_default();
    meta.description = info.subject.clone().unwrap_or_default();
    meta.keywords = info
        .keywords
        .as_deref()
        .map(split_keywords)
        .unwrap_or_default();
    if let Some(ref producer) = info.producer {
        meta.extra.insert("producer".into(), producer.clone().into());
    }
    if let Some(ref version) = info.version {
        meta.extra.insert("pdf_version".into(), version.clone().into());
    }

    for (idx, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        result.layout_elements.push(crate::output::LayoutElement {
            category: "page".to_string(),
            text: page.trim().to_string(),
            page: Some(idx as u32 + 1),
            ..Default::default()
        });
    }

    debug!("{} normalized {} pages", backend, pages.len());
    Ok(result)
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
