//! Table-aware PDF text extraction via the `pdfplumber` Python package.
//!
//! A short inline script walks the pages, collecting page text and every
//! table `find_tables()` detects (cell grid plus bounding box), and prints
//! one JSON object on stdout:
//!
//! ```text
//! {"page_count": 3, "metadata": {"Title": ...},
//!  "pages": [{"page": 1, "text": "...", "tables": [{"bbox": [x0, top, x1, bottom], "rows": [[...]]}]}]}
//! ```

use super::{json_type, pdfium, run_tool, Backend, BackendContext, BackendId, PdfInfo, RawBackendOutput};
use crate::capability::Capability;
use crate::config::Options;
use crate::error::{AdapterError, PolyExtractError};
use crate::output::{BoundingBox, Table, UnifiedResult};
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::ffi::OsString;
use tracing::debug;

pub struct PdfplumberBackend;

const SCRIPT: &str = r#"
import json, sys
import pdfplumber

path, password, first, last, want_tables = sys.argv[1:6]
first = int(first) if first else 1
last = int(last) if last else None
out = {"pages": []}
with pdfplumber.open(path, password=password or None) as pdf:
    out["page_count"] = len(pdf.pages)
    out["metadata"] = {
        k: str(v) for k, v in (pdf.metadata or {}).items()
        if isinstance(v, (str, int, float))
    }
    for page in pdf.pages:
        n = page.page_number
        if n < first or (last is not None and n > last):
            continue
        tables = []
        if want_tables == "1":
            for table in page.find_tables():
                tables.append({"bbox": list(table.bbox), "rows": table.extract()})
        out["pages"].append({"page": n, "text": page.extract_text() or "", "tables": tables})
json.dump(out, sys.stdout)
"#;

/// Interpreter arguments: the inline script, then its positional inputs.
pub fn build_args(input: &ResolvedInput, options: &Options) -> Vec<OsString> {
    let page = |key: &str| {
        options
            .get_u64(key)
            .filter(|p| *p > 0)
            .map(|p| p.to_string())
            .unwrap_or_default()
    };
    let want_tables = if options.bool_or("export_tables", true) {
        "1"
    } else {
        "0"
    };
    vec![
        "-c".into(),
        SCRIPT.into(),
        input.path().as_os_str().to_owned(),
        options.get_str("password").unwrap_or_default().into(),
        page("first_page").into(),
        page("last_page").into(),
        want_tables.into(),
    ]
}

#[async_trait]
impl Backend for PdfplumberBackend {
    fn id(&self) -> BackendId {
        BackendId::Pdfplumber
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Pdfplumber]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let output = run_tool(self.id(), &ctx.python, build_args(input, options), ctx).await?;
        if !output.success() {
            return Err(output.exit_failure(self.id()));
        }
        let value: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| AdapterError::permanent(self.id(), format!("output is not JSON: {e}")))?;
        Ok(RawBackendOutput::Pdfplumber(value))
    }
}

// ── Normalization ────────────────────────────────────────────────────────

/// Map the script's JSON into the unified schema: page text as for every
/// PDF text backend, plus the detected tables.
pub fn normalize(value: &Value) -> Result<UnifiedResult, PolyExtractError> {
    let shape_error = |detail: String| PolyExtractError::Normalization {
        backend: BackendId::Pdfplumber,
        detail,
    };
    let obj = value
        .as_object()
        .ok_or_else(|| shape_error(format!("expected a JSON object, got {}", json_type(value))))?;
    let pages = obj
        .get("pages")
        .and_then(Value::as_array)
        .ok_or_else(|| shape_error("missing `pages` list".to_string()))?;

    let texts: Vec<String> = pages
        .iter()
        .map(|p| p.get("text").and_then(Value::as_str).unwrap_or("").to_string())
        .collect();
    let meta = obj.get("metadata").and_then(Value::as_object);
    let tag = |key: &str| {
        meta.and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let info = PdfInfo {
        title: tag("Title"),
        author: tag("Author"),
        subject: tag("Subject"),
        keywords: tag("Keywords"),
        producer: tag("Producer"),
        version: None,
    };

    let mut result = pdfium::normalize(BackendId::Pdfplumber, &texts, &info)?;
    if let Some(count) = obj.get("page_count").and_then(Value::as_u64) {
        result.metadata.page_count = count as usize;
    }

    for page in pages {
        let number = page.get("page").and_then(Value::as_u64).map(|n| n as u32);
        let Some(tables) = page.get("tables").and_then(Value::as_array) else {
            continue;
        };
        for table in tables {
            let index = result.tables.len();
            result.tables.push(table_from(index, number, table));
        }
    }
    debug!("pdfplumber normalized {} tables", result.tables.len());
    Ok(result)
}

fn table_from(index: usize, page: Option<u32>, table: &Value) -> Table {
    let mut rows: Vec<Vec<String>> = table
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| c.as_str().unwrap_or("").trim().to_string())
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();

    let num_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let headers = if rows.len() > 1 {
        rows.remove(0)
    } else {
        Vec::new()
    };
    let bbox = table.get("bbox").and_then(Value::as_array).and_then(|b| {
        let f = |i: usize| b.get(i).and_then(Value::as_f64);
        Some(BoundingBox::new(f(0)?, f(1)?, f(2)?, f(3)?))
    });

    Table {
        index,
        page,
        caption: String::new(),
        num_rows: rows.len(),
        num_cols,
        headers,
        rows,
        bbox,
        extensions: Map::new(),
    }
}
