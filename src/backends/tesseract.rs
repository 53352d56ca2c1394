//! Tesseract OCR as a subprocess, in TSV mode for word boxes.

use super::{cli_value, run_tool, Backend, BackendContext, BackendId, OcrWord, RawBackendOutput};
use crate::capability::Capability;
use crate::config::Options;
use crate::error::{AdapterError, PolyExtractError};
use crate::output::{BoundingBox, LayoutElement, UnifiedResult};
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;

/// Words below this confidence (0–100) are dropped unless overridden.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 50.0;

/// TSV level of a word row.
const WORD_LEVEL: &str = "5";

pub struct TesseractBackend;

pub fn build_args(input: &ResolvedInput, options: &Options) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![input.path().as_os_str().to_owned(), "stdout".into()];
    if let Some(lang) = options.get("ocr_language").map(cli_value).filter(|l| !l.is_empty()) {
        args.push("-l".into());
        args.push(lang.into());
    }
    if let Some(psm) = options.get_u64("psm") {
        args.push("--psm".into());
        args.push(psm.to_string().into());
    }
    args.push("tsv".into());
    args
}

/// Parse TSV output into words, dropping structural rows, empty words and
/// words below `min_confidence`.
pub fn parse_tsv(tsv: &str, min_confidence: f64) -> Vec<OcrWord> {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }
        let text = cols[11].trim();
        let Ok(confidence) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        if text.is_empty() || confidence < min_confidence {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<f64>().unwrap_or(0.0);
        let int = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        words.push(OcrWord {
            page: int(1),
            block: int(2),
            paragraph: int(3),
            line: int(4),
            text: text.to_string(),
            confidence,
            left: num(6),
            top: num(7),
            width: num(8),
            height: num(9),
        });
    }
    words
}

#[async_trait]
impl Backend for TesseractBackend {
    fn id(&self) -> BackendId {
        BackendId::Tesseract
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Tesseract]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let output = run_tool(self.id(), "tesseract", build_args(input, options), ctx).await?;
        if !output.success() {
            return Err(output.exit_failure(self.id()));
        }
        let threshold = options
            .get_f64("ocr_confidence")
            .unwrap_or(DEFAULT_MIN_CONFIDENCE)
            .clamp(0.0, 100.0);
        Ok(RawBackendOutput::OcrWords(parse_tsv(
            &output.stdout_lossy(),
            threshold,
        )))
    }
}

/// Group OCR words into lines; each line becomes a layout element with the
/// union of its word boxes and the mean word confidence (0–1).
pub fn normalize(words: &[OcrWord]) -> Result<UnifiedResult, PolyExtractError> {
    let mut result = UnifiedResult {
        success: true,
        ..Default::default()
    };

    type LineKey = (u32, u32, u32, u32);
    let mut lines: BTreeMap<LineKey, Vec<&OcrWord>> = BTreeMap::new();
    for w in words {
        lines
            .entry((w.page, w.block, w.paragraph, w.line))
            .or_default()
            .push(w);
    }

    let mut text = String::new();
    let mut last_para: Option<(u32, u32, u32)> = None;
    for ((page, block, para, _), line_words) in &lines {
        let line_text = line_words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let bbox = line_words
            .iter()
            .map(|w| BoundingBox::new(w.left, w.top, w.left + w.width, w.top + w.height))
            .reduce(|a, b| a.union(&b));
        let confidence =
            line_words.iter().map(|w| w.confidence).sum::<f64>() / line_words.len() as f64 / 100.0;

        let para_key = (*page, *block, *para);
        if !text.is_empty() {
            text.push_str(if last_para == Some(para_key) { "\n" } else { "\n\n" });
        }
        text.push_str(&line_text);
        last_para = Some(para_key);

        result.layout_elements.push(LayoutElement {
            category: "line".to_string(),
            text: line_text,
            page: Some(*page),
            bbox,
            confidence: Some(confidence),
            ..Default::default()
        });
    }

    result.document.text = text;
    result.metadata.page_count = words.iter().map(|w| w.page).max().unwrap_or(0) as usize;
    result
        .metadata
        .extra
        .insert("ocr_word_count".into(), words.len().into());
    Ok(result)
}
