//! End-to-end tests against the backends installed on this machine.
//!
//! These probe the real capability registry and run real tools (pdfium,
//! pdftotext, tesseract, docling, crwl), so they are gated behind the
//! `E2E_ENABLED` environment variable and skip individual cases whose
//! capability is missing.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! The URL case also needs network access and `E2E_PDF_URL`.

use polyextract::{
    extract_json, BackendId, Capabilities, Capability, ExtractionConfig, ExtractionRequest,
    Extractor, Options, Target, UnifiedResult,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

async fn extractor() -> Extractor {
    Extractor::probed(ExtractionConfig::default())
        .await
        .expect("capability probe")
}

fn require(caps: &Capabilities, cap: Capability) -> bool {
    if caps.is_available(cap) {
        return true;
    }
    let reason = caps
        .status(cap)
        .and_then(|s| s.reason.clone())
        .unwrap_or_default();
    println!("SKIP — {cap} unavailable: {reason}");
    false
}

fn write_pdf(dir: &Path, line: &str) -> PathBuf {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 28.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(line)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let path = dir.join("e2e.pdf");
    doc.save(&path).unwrap();
    path
}

/// Assert the invariants every well-formed result satisfies.
fn assert_well_formed(r: &UnifiedResult, context: &str) {
    assert_eq!(r.success, r.error.is_none(), "[{context}] success/error mismatch");
    if r.success {
        assert!(
            !r.document.text.contains("\n\n\n"),
            "[{context}] uncollapsed blank lines"
        );
        if !r.document.markdown.is_empty() {
            assert!(r.document.markdown.ends_with('\n'), "[{context}] markdown newline");
        }
    }
    let invoked: Vec<BackendId> = r
        .attempts
        .iter()
        .filter(|a| !a.outcome.is_skipped())
        .map(|a| a.backend)
        .collect();
    assert_eq!(invoked, r.backends_used, "[{context}] attempt log mismatch");
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn e2e_probe_report_serialises() {
    e2e_skip_unless_enabled!();
    let ex = extractor().await;
    let json = serde_json::to_value(ex.capabilities()).unwrap();
    println!("{}", serde_json::to_string_pretty(&json).unwrap());
    assert!(ex.capabilities().is_available(Capability::Lopdf));
    assert!(ex.capabilities().is_available(Capability::TextScrape));
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_pdf_with_installed_backends() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(dir.path(), "Cascade end to end");

    let result = extractor()
        .await
        .extract(&ExtractionRequest::new(Target::Path(path)))
        .await;

    println!("backends: {:?}", result.backends_used);
    assert_well_formed(&result, "pdf");
    assert!(result.success, "{:?}", result.error);
    assert!(result.document.text.contains("Cascade end to end"));
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_pdftotext_alone() {
    e2e_skip_unless_enabled!();
    let ex = extractor().await;
    if !require(ex.capabilities(), Capability::Pdftotext) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(dir.path(), "Poppler says hello");
    let request = ExtractionRequest::new(Target::Path(path)).with_options(
        Options::new()
            .with("backends", "pdftotext")
            .with("disable_fallback", true),
    );

    let result = ex.extract(&request).await;
    assert_well_formed(&result, "pdftotext");
    assert_eq!(result.backends_used, vec![BackendId::Pdftotext]);
    assert!(result.document.text.contains("Poppler says hello"));
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_tesseract_handles_blank_image() {
    e2e_skip_unless_enabled!();
    let ex = extractor().await;
    if !require(ex.capabilities(), Capability::Tesseract) {
        return;
    }
    // OCR finds no words, so the attempt fails and the image fallback answers.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.png");
    image::RgbImage::from_pixel(300, 100, image::Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();

    let result = ex
        .extract(&ExtractionRequest::new(Target::Path(path)))
        .await;
    assert_well_formed(&result, "tesseract");
    assert_eq!(result.backends_used.first(), Some(&BackendId::Tesseract));
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_pdf_url() {
    e2e_skip_unless_enabled!();
    let Ok(url) = std::env::var("E2E_PDF_URL") else {
        println!("SKIP — set E2E_PDF_URL to a reachable PDF");
        return;
    };
    let json = serde_json::json!({ "url": url }).to_string();
    let result = extract_json(&json, &ExtractionConfig::default()).await;
    assert_well_formed(&result, "pdf url");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.document.format, "pdf");
}
