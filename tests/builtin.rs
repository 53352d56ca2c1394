//! Integration tests running the built-in in-process backends.
//!
//! Only the capabilities of the minimal backends are marked available, so
//! every external candidate is skipped and the minimal fallbacks do the
//! work. Fixtures are generated into temp dirs.

use polyextract::{
    AttemptOutcome, BackendId, Capabilities, Capability, ErrorKind, ExtractionConfig,
    ExtractionRequest, Extractor, Options, Target,
};
use std::path::{Path, PathBuf};

fn builtin_only() -> Extractor {
    let config = ExtractionConfig::builder()
        .max_scrape_chars(200)
        .build()
        .unwrap();
    Extractor::with_capabilities(
        config,
        Capabilities::only(&[
            Capability::Lopdf,
            Capability::HtmlScrape,
            Capability::TextScrape,
            Capability::ImageProbe,
        ]),
    )
}

fn write_pdf(dir: &Path) -> PathBuf {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("Minimal fallback text")]),
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

    let path = dir.join("fallback.pdf");
    doc.save(&path).unwrap();
    path
}

#[tokio::test]
async fn pdf_degrades_to_lopdf() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(dir.path());

    let result = builtin_only()
        .extract(&ExtractionRequest::new(Target::Path(path)))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.metadata.degraded);
    assert!(result.document.text.contains("Minimal fallback text"));
    assert_eq!(result.metadata.page_count, 1);
    assert_eq!(result.backends_used, vec![BackendId::Lopdf]);
    let skipped: Vec<_> = result
        .attempts
        .iter()
        .filter(|a| a.outcome.is_skipped())
        .map(|a| a.backend)
        .collect();
    assert_eq!(
        skipped,
        vec![
            BackendId::Pdfplumber,
            BackendId::Pdfium,
            BackendId::Pdftotext,
            BackendId::Docling
        ]
    );
}

#[tokio::test]
async fn html_degrades_to_scrape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.html");
    std::fs::write(
        &path,
        "<html><head><title>Home</title><script>track()</script></head>\
         <body><h1>Welcome</h1><p>Fish &amp; chips</p></body></html>",
    )
    .unwrap();

    let result = builtin_only()
        .extract(&ExtractionRequest::new(Target::Path(path)))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.metadata.degraded);
    assert_eq!(result.metadata.title, "Home");
    assert_eq!(result.document.text, "Home\nWelcome\nFish & chips");
    assert!(!result.document.text.contains("track"));
    assert_eq!(result.document.format, "html");
}

#[tokio::test]
async fn text_is_capped_but_not_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "word ".repeat(100)).unwrap();

    let result = builtin_only()
        .extract(&ExtractionRequest::new(Target::Path(path)))
        .await;

    assert!(result.success);
    // text-scrape is the planned candidate for text, not a fallback
    assert!(!result.metadata.degraded);
    assert_eq!(result.metadata.extra["truncated"], serde_json::json!(true));
    assert_eq!(result.metadata.word_count, 40);
}

#[tokio::test]
async fn image_degrades_to_probe_figure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.png");
    image::RgbImage::from_pixel(64, 32, image::Rgb([200, 200, 200]))
        .save(&path)
        .unwrap();

    let request = ExtractionRequest::new(Target::Path(path))
        .with_options(Options::new().with("export_figures", true));
    let result = builtin_only().extract(&request).await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.metadata.degraded);
    assert_eq!(result.figures.len(), 1);
    let image = result.figures[0].image.as_ref().unwrap();
    assert_eq!(image.mime_type, "image/png");
    assert!(image.data.is_some());
    assert_eq!(result.metadata.extra["width"], serde_json::json!(64));
}

#[tokio::test]
async fn binary_office_document_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.docx");
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend(std::iter::repeat(0u8).take(512));
    std::fs::write(&path, bytes).unwrap();

    let result = builtin_only()
        .extract(&ExtractionRequest::new(Target::Path(path)))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), None);
    assert!(result.error.as_deref().unwrap().contains("binary"));
    assert!(matches!(
        result.attempts[0].outcome,
        AttemptOutcome::SkippedUnavailable {
            capability: Capability::Docling
        }
    ));
    assert_eq!(result.backends_used, vec![BackendId::TextScrape]);
}

#[tokio::test]
async fn json_entry_point_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.txt");
    std::fs::write(&path, "hello from json").unwrap();
    let json = serde_json::json!({ "path": path, "document_type": "text" }).to_string();

    let result = builtin_only().extract_json(&json).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.document.text, "hello from json");

    let missing = builtin_only().extract_json(r#"{"url": ""}"#).await;
    assert_eq!(missing.error_kind(), Some(ErrorKind::Configuration));
}
