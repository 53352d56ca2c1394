//! Raw backend output → [`UnifiedResult`].
//!
//! Dispatches to the mapping function owned by each backend module, then
//! applies one common pass: text cleanup, derived fields, the export
//! options and the binary size limit. The whole function is pure, so
//! normalizing the same raw output twice gives equal results.

use crate::backends::{
    crawler, docling, pdfium, pdfplumber, scrape, tesseract, BackendId, RawBackendOutput,
};
use crate::config::{ContentKind, Options};
use crate::error::PolyExtractError;
use crate::output::UnifiedResult;
use crate::pipeline::clean::{clean_markdown, clean_text, word_count};
use crate::pipeline::encode::bound;

/// Map one backend's raw output into the unified schema.
pub fn normalize(
    backend: BackendId,
    raw: &RawBackendOutput,
    kind: ContentKind,
    options: &Options,
    max_binary_bytes: usize,
) -> Result<UnifiedResult, PolyExtractError> {
    let mut result = match raw {
        RawBackendOutput::Docling {
            document,
            markdown,
            html,
        } => docling::normalize(document, markdown.as_deref(), html.as_deref())?,
        RawBackendOutput::Crawler(value) => crawler::normalize(value)?,
        RawBackendOutput::Pdfplumber(value) => pdfplumber::normalize(value)?,
        RawBackendOutput::PdfPages { pages, info } => pdfium::normalize(backend, pages, info)?,
        RawBackendOutput::OcrWords(words) => tesseract::normalize(words)?,
        RawBackendOutput::Scraped {
            text,
            html,
            title,
            truncated,
        } => scrape::normalize_scrape(text, html.as_deref(), title.as_deref(), *truncated)?,
        RawBackendOutput::Image {
            width,
            height,
            format,
            thumbnail_png,
        } => scrape::normalize_image(*width, *height, format, thumbnail_png)?,
    };
    finish(&mut result, kind, options, max_binary_bytes);
    Ok(result)
}

/// The backend-independent pass. Idempotent.
pub fn finish(result: &mut UnifiedResult, kind: ContentKind, options: &Options, max_binary_bytes: usize) {
    let doc = &mut result.document;
    doc.text = clean_text(&doc.text);
    doc.markdown = clean_markdown(&doc.markdown);
    if doc.text.is_empty() && !doc.markdown.is_empty() {
        doc.text = clean_text(&doc.markdown);
    }
    if doc.markdown.is_empty() && !doc.text.is_empty() {
        doc.markdown = clean_markdown(&doc.text);
    }
    doc.format = kind.as_str().to_string();

    let meta = &mut result.metadata;
    meta.title = meta.title.trim().to_string();
    if meta.word_count == 0 {
        meta.word_count = word_count(&result.document.text);
    }
    if meta.document_type.is_empty() {
        meta.document_type = kind.as_str().to_string();
    }

    if !options.bool_or("export_tables", true) {
        result.tables.clear();
    }
    let export_figures = options.bool_or("export_figures", false);
    for figure in &mut result.figures {
        if !export_figures {
            figure.image = None;
        }
        if let Some(image) = figure.image.as_mut() {
            bound(image, max_binary_bytes);
        }
    }
    if let Some(shot) = result.media.screenshot.as_mut() {
        bound(shot, max_binary_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::PdfInfo;
    use serde_json::json;

    fn pages() -> RawBackendOutput {
        RawBackendOutput::PdfPages {
            pages: vec!["Hello  \r\nworld\u{200B}\n\n\n\n".into(), "Page two".into()],
            info: PdfInfo {
                title: Some("  Report ".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn common_pass_cleans_and_derives() {
        let r = normalize(BackendId::Pdfium, &pages(), ContentKind::Pdf, &Options::new(), 1024).unwrap();
        assert!(r.success);
        assert_eq!(r.document.text, "Hello\nworld\n\nPage two");
        assert_eq!(r.document.markdown, "Hello\nworld\n\nPage two\n");
        assert_eq!(r.document.format, "pdf");
        assert_eq!(r.metadata.title, "Report");
        assert_eq!(r.metadata.word_count, 4);
        assert_eq!(r.metadata.page_count, 2);
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let opts = Options::new().with("export_figures", true);
        let a = normalize(BackendId::Pdfium, &pages(), ContentKind::Pdf, &opts, 1024).unwrap();
        let b = normalize(BackendId::Pdfium, &pages(), ContentKind::Pdf, &opts, 1024).unwrap();
        assert_eq!(a, b);

        let mut again = a.clone();
        finish(&mut again, ContentKind::Pdf, &opts, 1024);
        assert_eq!(again, a);
        assert_eq!(
            serde_json::to_string(&again).unwrap(),
            serde_json::to_string(&a).unwrap()
        );
    }

    #[test]
    fn figures_keep_records_without_image_data_by_default() {
        let raw = RawBackendOutput::Image {
            width: 2,
            height: 2,
            format: "png".into(),
            thumbnail_png: vec![1, 2, 3],
        };
        let r = normalize(BackendId::ImageProbe, &raw, ContentKind::Image, &Options::new(), 1024).unwrap();
        assert_eq!(r.figures.len(), 1);
        assert!(r.figures[0].image.is_none());

        let opts = Options::new().with("export_figures", true);
        let r = normalize(BackendId::ImageProbe, &raw, ContentKind::Image, &opts, 1024).unwrap();
        assert!(r.figures[0].image.as_ref().unwrap().data.is_some());

        let r = normalize(BackendId::ImageProbe, &raw, ContentKind::Image, &opts, 2).unwrap();
        let image = r.figures[0].image.as_ref().unwrap();
        assert!(image.omitted);
        assert!(image.data.is_none());
        assert_eq!(image.byte_len, 3);
    }

    #[test]
    fn export_tables_false_drops_tables() {
        let doc = json!({
            "schema_name": "DoclingDocument",
            "texts": [],
            "tables": [{
                "data": {
                    "num_rows": 1,
                    "num_cols": 1,
                    "table_cells": [{"text": "x", "start_row_offset_idx": 0, "start_col_offset_idx": 0}]
                }
            }]
        });
        let raw = RawBackendOutput::Docling {
            document: doc,
            markdown: None,
            html: None,
        };
        let with = normalize(BackendId::Docling, &raw, ContentKind::Pdf, &Options::new(), 1024).unwrap();
        assert_eq!(with.tables.len(), 1);
        let opts = Options::new().with("export_tables", false);
        let without = normalize(BackendId::Docling, &raw, ContentKind::Pdf, &opts, 1024).unwrap();
        assert!(without.tables.is_empty());
    }

    #[test]
    fn shape_errors_propagate() {
        let raw = RawBackendOutput::Crawler(json!("not an object"));
        let err = normalize(BackendId::Crawler, &raw, ContentKind::Html, &Options::new(), 1024).unwrap_err();
        assert!(matches!(err, PolyExtractError::Normalization { .. }));
    }

    #[test]
    fn scrape_defaults_document_type_to_kind() {
        let raw = RawBackendOutput::Scraped {
            text: "just text".into(),
            html: None,
            title: None,
            truncated: true,
        };
        let r = normalize(BackendId::TextScrape, &raw, ContentKind::Text, &Options::new(), 1024).unwrap();
        assert_eq!(r.metadata.document_type, "text");
        assert_eq!(r.metadata.extra["truncated"], json!(true));
        assert_eq!(r.metadata.word_count, 2);
    }
}
