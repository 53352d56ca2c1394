//! Document converter (`docling`) as a subprocess.
//!
//! The converter writes `<stem>.json` (its lossless document model),
//! `<stem>.md` and `<stem>.html` into a scratch directory. The JSON carries the layout-aware
//! content: labelled text items with page provenance, table cell grids and
//! pictures, cross-referenced by JSON pointers such as `#/texts/12`.

use super::{
    cli_value, json_type, rejected_flag, run_tool, Backend, BackendContext, BackendId,
    RawBackendOutput,
};
use crate::capability::Capability;
use crate::config::{ContentKind, Options};
use crate::error::{AdapterError, PolyExtractError, RecoverableCondition};
use crate::output::{BoundingBox, Figure, LayoutElement, Table, UnifiedResult};
use crate::pipeline::clean::clean_markdown;
use crate::pipeline::encode::from_data_uri;
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct DoclingBackend;

/// Which request option produced each CLI flag.
const FLAG_OPTIONS: &[(&str, &str)] = &[
    ("--ocr", "ocr"),
    ("--no-ocr", "ocr"),
    ("--force-ocr", "force_ocr"),
    ("--ocr-lang", "ocr_language"),
    ("--table-mode", "table_mode"),
    ("--pdf-backend", "pdf_backend"),
    ("--document-timeout", "document_timeout"),
    ("--image-export-mode", "export_figures"),
];

/// Translate the option bag into converter arguments.
///
/// `ocr` is forced off when the OCR sub-feature is not installed.
pub fn build_args(
    input: &Path,
    output_dir: &Path,
    options: &Options,
    ocr_available: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--to".into(),
        "json".into(),
        "--to".into(),
        "md".into(),
        "--to".into(),
        "html".into(),
        "--output".into(),
        output_dir.as_os_str().to_owned(),
    ];

    let want_ocr = options.get_bool("ocr");
    match (want_ocr, ocr_available) {
        (Some(true), true) => args.push("--ocr".into()),
        (Some(false), _) | (_, false) => args.push("--no-ocr".into()),
        (None, true) => {}
    }
    if ocr_available && options.bool_or("force_ocr", false) {
        args.push("--force-ocr".into());
    }
    if let Some(lang) = options.get("ocr_language").filter(|_| ocr_available) {
        args.push("--ocr-lang".into());
        args.push(cli_value(lang).into());
    }
    if let Some(mode) = options.get_str("table_mode") {
        if matches!(mode, "fast" | "accurate") {
            args.push("--table-mode".into());
            args.push(mode.into());
        }
    }
    if let Some(backend) = options.get_str("pdf_backend") {
        args.push("--pdf-backend".into());
        args.push(backend.into());
    }
    if let Some(timeout) = options.get_f64("document_timeout").filter(|t| *t > 0.0) {
        args.push("--document-timeout".into());
        args.push(timeout.to_string().into());
    }
    if options.contains("export_figures") {
        let mode = if options.bool_or("export_figures", false) {
            "embedded"
        } else {
            "placeholder"
        };
        args.push("--image-export-mode".into());
        args.push(mode.into());
    }

    args.push(input.as_os_str().to_owned());
    args
}

/// Classify a failed run: a rejected flag that one of our options produced
/// is recoverable by dropping that option.
pub fn classify_failure(stderr: &str) -> Option<RecoverableCondition> {
    let flag = rejected_flag(stderr)?;
    FLAG_OPTIONS
        .iter()
        .find(|(f, _)| *f == flag)
        .map(|(_, option)| RecoverableCondition::DeprecatedParameter {
            option: (*option).to_string(),
        })
}

#[async_trait]
impl Backend for DoclingBackend {
    fn id(&self) -> BackendId {
        BackendId::Docling
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Docling]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let scratch = tempfile::Builder::new()
            .prefix("polyextract-docling-")
            .tempdir()
            .map_err(|e| AdapterError::permanent(self.id(), format!("scratch dir: {e}")))?;

        let args = build_args(
            input.path(),
            scratch.path(),
            options,
            ctx.has(Capability::DoclingOcr),
        );
        let output = run_tool(self.id(), "docling", args, ctx).await?;

        if !output.success() {
            if let Some(condition) = classify_failure(&output.stderr) {
                return Err(AdapterError::Transient {
                    backend: self.id(),
                    condition,
                    message: super::stderr_tail(&output.stderr),
                });
            }
            return Err(output.exit_failure(self.id()));
        }

        let json_path = find_output(scratch.path(), input.path(), "json")
            .ok_or_else(|| AdapterError::permanent(self.id(), "no JSON output was written"))?;
        let raw = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| AdapterError::permanent(self.id(), format!("reading output: {e}")))?;
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| AdapterError::permanent(self.id(), format!("output is not JSON: {e}")))?;

        let markdown = read_optional(scratch.path(), input.path(), "md").await;
        let html = read_optional(scratch.path(), input.path(), "html").await;
        debug!(
            "docling wrote {} bytes of JSON, markdown: {}, html: {}",
            raw.len(),
            markdown.is_some(),
            html.is_some()
        );

        Ok(RawBackendOutput::Docling {
            document,
            markdown,
            html,
        })
    }
}

async fn read_optional(dir: &Path, input: &Path, ext: &str) -> Option<String> {
    let path = find_output(dir, input, ext)?;
    tokio::fs::read_to_string(&path).await.ok()
}

/// `<stem>.<ext>` in the output dir, else the first file with that extension.
fn find_output(dir: &Path, input: &Path, ext: &str) -> Option<PathBuf> {
    if let Some(stem) = input.file_stem() {
        let candidate = dir.join(stem).with_extension(ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

// ── Normalization ────────────────────────────────────────────────────────

/// Upper bound on a table's rows and columns; larger declared sizes are
/// treated as malformed.
const MAX_TABLE_DIM: usize = 1_000;

/// Text labels that are page furniture rather than content.
const FURNITURE: &[&str] = &["page_header", "page_footer"];

/// Map the converter's document model into the unified schema. The
/// markdown and HTML renderings are used as written when present.
pub fn normalize(
    document: &Value,
    markdown: Option<&str>,
    html: Option<&str>,
) -> Result<UnifiedResult, PolyExtractError> {
    let doc = document.as_object().ok_or_else(|| PolyExtractError::Normalization {
        backend: BackendId::Docling,
        detail: format!("expected a JSON object, got {}", json_type(document)),
    })?;
    if !doc.contains_key("texts") && !doc.contains_key("schema_name") {
        return Err(PolyExtractError::Normalization {
            backend: BackendId::Docling,
            detail: "document has neither `texts` nor `schema_name`".to_string(),
        });
    }

    let texts = array(doc, "texts");
    let mut result = UnifiedResult {
        success: true,
        ..Default::default()
    };

    // Text and layout
    let mut paragraphs = Vec::new();
    let mut rendered = Vec::new();
    for item in texts {
        let label = str_field(item, "label").unwrap_or("text");
        let text = str_field(item, "text").unwrap_or("").trim();
        let (page, bbox) = provenance(item);

        if !text.is_empty() {
            result.layout_elements.push(LayoutElement {
                category: label.to_string(),
                text: text.to_string(),
                page,
                bbox,
                confidence: None,
                extensions: self_ref(item),
            });
        }
        if text.is_empty() || FURNITURE.contains(&label) {
            continue;
        }
        paragraphs.push(text.to_string());
        rendered.push(match label {
            "title" => format!("# {text}"),
            "section_header" => format!("## {text}"),
            "list_item" => format!("- {text}"),
            "code" => format!("```\n{text}\n```"),
            _ => text.to_string(),
        });
    }
    result.document.text = paragraphs.join("\n\n");
    result.document.markdown = match markdown {
        Some(md) if !md.trim().is_empty() => md.to_string(),
        _ => clean_markdown(&rendered.join("\n\n")),
    };
    result.document.html = html
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_default()
        .to_string();

    // Title
    let labelled = |want: &str| {
        texts
            .iter()
            .find(|t| str_field(t, "label") == Some(want))
            .and_then(|t| str_field(t, "text"))
            .map(|s| s.trim().to_string())
    };
    result.metadata.title = labelled("title")
        .or_else(|| labelled("section_header"))
        .unwrap_or_default();

    // Tables
    for (index, table) in array(doc, "tables").iter().enumerate() {
        result.tables.push(table_from(index, table, texts));
    }

    // Figures
    for (index, picture) in array(doc, "pictures").iter().enumerate() {
        let (page, bbox) = provenance(picture);
        let image = picture
            .get("image")
            .and_then(|i| i.get("uri"))
            .and_then(Value::as_str)
            .and_then(from_data_uri);
        let mut extensions = self_ref(picture);
        if let Some(size) = picture.get("image").and_then(|i| i.get("size")) {
            extensions.insert("size".into(), size.clone());
        }
        result.figures.push(Figure {
            index,
            page,
            caption: captions(picture, texts),
            bbox,
            image,
            extensions,
        });
    }

    // Metadata
    let meta = &mut result.metadata;
    meta.page_count = match doc.get("pages") {
        Some(Value::Object(pages)) => pages.len(),
        Some(Value::Array(pages)) => pages.len(),
        _ => 0,
    };
    if let Some(origin) = doc.get("origin") {
        if let Some(mime) = str_field(origin, "mimetype") {
            meta.document_type = ContentKind::from_hint(mime)
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|| mime.to_string());
        }
        if let Some(name) = str_field(origin, "filename") {
            meta.extra.insert("filename".into(), name.into());
        }
    }
    for key in ["name", "version", "schema_name"] {
        if let Some(v) = doc.get(key).filter(|v| !v.is_null()) {
            meta.extra.insert(key.into(), v.clone());
        }
    }

    result.document.structured = document.clone();
    Ok(result)
}

fn table_from(index: usize, table: &Value, texts: &[Value]) -> Table {
    let (page, bbox) = provenance(table);
    let data = table.get("data");
    let cells = data
        .and_then(|d| d.get("table_cells"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let dim = |key: &str, cell_key: &str| -> usize {
        let declared = data.and_then(|d| d.get(key)).and_then(Value::as_u64).unwrap_or(0) as usize;
        let seen = cells
            .iter()
            .filter_map(|c| c.get(cell_key).and_then(Value::as_u64))
            .map(|v| v as usize)
            .max()
            .unwrap_or(0);
        let dim = declared.max(seen);
        if dim > MAX_TABLE_DIM {
            warn!("docling table {} declares {} {}; clamping to {}", index, dim, key, MAX_TABLE_DIM);
        }
        dim.min(MAX_TABLE_DIM)
    };
    let num_rows = dim("num_rows", "end_row_offset_idx");
    let num_cols = dim("num_cols", "end_col_offset_idx");

    let mut grid = vec![vec![String::new(); num_cols]; num_rows];
    let mut header_rows = vec![false; num_rows];
    for cell in cells {
        let row = cell.get("start_row_offset_idx").and_then(Value::as_u64);
        let col = cell.get("start_col_offset_idx").and_then(Value::as_u64);
        let (Some(row), Some(col)) = (row, col) else {
            warn!("docling table {} has a cell without offsets", index);
            continue;
        };
        let (row, col) = (row as usize, col as usize);
        if row >= num_rows || col >= num_cols {
            continue;
        }
        grid[row][col] = str_field(cell, "text").unwrap_or("").trim().to_string();
        if cell.get("column_header").and_then(Value::as_bool) == Some(true) {
            header_rows[row] = true;
        }
    }

    let mut rows = grid;
    let headers = if header_rows.first() == Some(&true) && !rows.is_empty() {
        rows.remove(0)
    } else {
        Vec::new()
    };

    Table {
        index,
        page,
        caption: captions(table, texts),
        num_rows: rows.len(),
        num_cols,
        headers,
        rows,
        bbox,
        extensions: self_ref(table),
    }
}

/// Resolve `captions: [{"$ref": "#/texts/N"}]` to caption text.
fn captions(item: &Value, texts: &[Value]) -> String {
    item.get("captions")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("$ref").and_then(Value::as_str))
                .filter_map(|r| r.strip_prefix("#/texts/"))
                .filter_map(|i| i.parse::<usize>().ok())
                .filter_map(|i| texts.get(i))
                .filter_map(|t| str_field(t, "text"))
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// Page number and box of the first provenance entry.
fn provenance(item: &Value) -> (Option<u32>, Option<BoundingBox>) {
    let Some(prov) = item.get("prov").and_then(Value::as_array).and_then(|p| p.first()) else {
        return (None, None);
    };
    let page = prov.get("page_no").and_then(Value::as_u64).map(|p| p as u32);
    let bbox = prov.get("bbox").and_then(|b| {
        let f = |k: &str| b.get(k).and_then(Value::as_f64);
        let (l, t, r, bt) = (f("l")?, f("t")?, f("r")?, f("b")?);
        Some(BoundingBox::new(l.min(r), t.min(bt), l.max(r), t.max(bt)))
    });
    (page, bbox)
}

fn self_ref(item: &Value) -> Map<String, Value> {
    let mut ext = Map::new();
    if let Some(r) = item.get("self_ref").filter(|v| v.is_string()) {
        ext.insert("self_ref".into(), r.clone());
    }
    ext
}

fn array<'a>(doc: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    doc.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "schema_name": "DoclingDocument",
            "version": "1.3.0",
            "name": "report",
            "origin": {"mimetype": "application/pdf", "filename": "report.pdf"},
            "texts": [
                {"self_ref": "#/texts/0", "label": "page_header", "text": "ACME Corp",
                 "prov": [{"page_no": 1, "bbox": {"l": 10.0, "t": 800.0, "r": 100.0, "b": 780.0}}]},
                {"self_ref": "#/texts/1", "label": "title", "text": "Quarterly Report",
                 "prov": [{"page_no": 1, "bbox": {"l": 50.0, "t": 700.0, "r": 400.0, "b": 660.0}}]},
                {"self_ref": "#/texts/2", "label": "text", "text": "Revenue grew.",
                 "prov": [{"page_no": 1}]},
                {"self_ref": "#/texts/3", "label": "caption", "text": "Table 1: Revenue"},
                {"self_ref": "#/texts/4", "label": "caption", "text": "Figure 1: Chart"}
            ],
            "tables": [{
                "self_ref": "#/tables/0",
                "captions": [{"$ref": "#/texts/3"}],
                "prov": [{"page_no": 2, "bbox": {"l": 0.0, "t": 10.0, "r": 5.0, "b": 0.0}}],
                "data": {"num_rows": 3, "num_cols": 2, "table_cells": [
                    {"text": "Quarter", "start_row_offset_idx": 0, "end_row_offset_idx": 1,
                     "start_col_offset_idx": 0, "end_col_offset_idx": 1, "column_header": true},
                    {"text": "Revenue", "start_row_offset_idx": 0, "end_row_offset_idx": 1,
                     "start_col_offset_idx": 1, "end_col_offset_idx": 2, "column_header": true},
                    {"text": "Q1", "start_row_offset_idx": 1, "end_row_offset_idx": 2,
                     "start_col_offset_idx": 0, "end_col_offset_idx": 1},
                    {"text": "10", "start_row_offset_idx": 1, "end_row_offset_idx": 2,
                     "start_col_offset_idx": 1, "end_col_offset_idx": 2},
                    {"text": "Q2", "start_row_offset_idx": 2, "end_row_offset_idx": 3,
                     "start_col_offset_idx": 0, "end_col_offset_idx": 1}
                ]}
            }],
            "pictures": [{
                "self_ref": "#/pictures/0",
                "captions": [{"$ref": "#/texts/4"}],
                "prov": [{"page_no": 3}],
                "image": {"mimetype": "image/png", "uri": "data:image/png;base64,aGVsbG8=",
                          "size": {"width": 10, "height": 10}}
            }],
            "pages": {"1": {"page_no": 1}, "2": {"page_no": 2}, "3": {"page_no": 3}}
        })
    }

    #[test]
    fn maps_document_model() {
        let r = normalize(&sample(), Some("# Quarterly Report\n\nRevenue grew.\n"), None).unwrap();
        assert!(r.success);
        assert_eq!(r.metadata.title, "Quarterly Report");
        assert_eq!(r.metadata.page_count, 3);
        assert_eq!(r.metadata.document_type, "pdf");
        assert_eq!(r.metadata.extra["filename"], "report.pdf");
        assert!(!r.document.text.contains("ACME Corp"));
        assert!(r.document.text.starts_with("Quarterly Report"));
        assert_eq!(r.document.markdown, "# Quarterly Report\n\nRevenue grew.\n");
        assert_eq!(r.layout_elements[0].category, "page_header");
        assert_eq!(
            r.layout_elements[1].bbox,
            Some(BoundingBox::new(50.0, 660.0, 400.0, 700.0))
        );
        assert_eq!(r.document.structured["name"], "report");
    }

    #[test]
    fn tables_become_grids_with_headers() {
        let r = normalize(&sample(), None, None).unwrap();
        let t = &r.tables[0];
        assert_eq!(t.headers, vec!["Quarter", "Revenue"]);
        assert_eq!(t.rows, vec![vec!["Q1", "10"], vec!["Q2", ""]]);
        assert_eq!(t.num_rows, 2);
        assert_eq!(t.num_cols, 2);
        assert_eq!(t.caption, "Table 1: Revenue");
        assert_eq!(t.page, Some(2));
    }

    #[test]
    fn pictures_keep_caption_and_image() {
        let r = normalize(&sample(), None, None).unwrap();
        let f = &r.figures[0];
        assert_eq!(f.caption, "Figure 1: Chart");
        assert_eq!(f.page, Some(3));
        assert_eq!(f.image.as_ref().unwrap().byte_len, 5);
    }

    #[test]
    fn markdown_rendered_when_absent() {
        let r = normalize(&sample(), None, None).unwrap();
        assert!(r.document.markdown.starts_with("# Quarterly Report\n\nRevenue grew."));
    }

    #[test]
    fn unexpected_shape_is_normalization_error() {
        let err = normalize(&json!([1, 2]), None, None).unwrap_err();
        assert!(matches!(err, PolyExtractError::Normalization { .. }));
        let err = normalize(&json!({"foo": 1}), None, None).unwrap_err();
        assert!(err.to_string().contains("docling"));
    }

    #[test]
    fn ocr_forced_off_without_sub_feature() {
        let opts = Options::new().with("ocr", true).with("ocr_language", "de");
        let args = build_args(Path::new("/in/a.pdf"), Path::new("/out"), &opts, false);
        assert!(args.iter().any(|a| a == "--no-ocr"));
        assert!(!args.iter().any(|a| a == "--ocr" || a == "--ocr-lang"));
        assert_eq!(args.last().unwrap(), "/in/a.pdf");
    }

    #[test]
    fn options_translate_to_flags() {
        let opts = Options::new()
            .with("ocr", true)
            .with("table_mode", "accurate")
            .with("document_timeout", 60)
            .with("export_figures", true)
            .with("whatever", 1);
        let args = build_args(Path::new("/in/a.pdf"), Path::new("/out"), &opts, true);
        let joined: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let joined = joined.join(" ");
        assert!(joined.contains("--ocr --table-mode accurate"));
        assert!(joined.contains("--document-timeout 60"));
        assert!(joined.contains("--image-export-mode embedded"));
        assert!(!joined.contains("whatever"));
    }

    #[test]
    fn rejected_flag_maps_back_to_option() {
        let stderr = "Usage: docling [OPTIONS] SOURCE...\nError: No such option: --table-mode";
        assert_eq!(
            classify_failure(stderr),
            Some(RecoverableCondition::DeprecatedParameter {
                option: "table_mode".into()
            })
        );
        assert_eq!(classify_failure("Error: No such option: --verbose-x"), None);
        assert_eq!(classify_failure("Killed"), None);
    }

    #[test]
    fn html_rendering_is_requested_and_kept() {
        let args = build_args(Path::new("/in/a.docx"), Path::new("/out"), &Options::new(), true);
        let joined: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(joined.join(" ").starts_with("--to json --to md --to html --output /out"));

        let html = "<html><body><h1>Quarterly Report</h1></body></html>";
        let r = normalize(&sample(), None, Some(html)).unwrap();
        assert_eq!(r.document.html, html);
        assert!(normalize(&sample(), None, Some("  ")).unwrap().document.html.is_empty());
    }

    #[test]
    fn oversized_table_declaration_is_clamped() {
        let table = json!({
            "data": {"num_rows": 1_000_000_000_000u64, "num_cols": 4_000_000_000u64, "table_cells": [
                {"text": "a", "start_row_offset_idx": 0, "end_row_offset_idx": 1,
                 "start_col_offset_idx": 0, "end_col_offset_idx": 1},
                {"text": "far", "start_row_offset_idx": 5_000_000, "end_row_offset_idx": 5_000_001,
                 "start_col_offset_idx": 0, "end_col_offset_idx": 1}
            ]}
        });
        let t = table_from(0, &table, &[]);
        assert!(t.num_rows <= MAX_TABLE_DIM);
        assert!(t.num_cols <= MAX_TABLE_DIM);
        assert_eq!(t.rows[0][0], "a");
        assert!(t.rows.iter().all(|r| !r.contains(&"far".to_string())));
    }
}
