//! Deterministic text cleanup applied to every backend's text and markdown.
//!
//! Backends disagree on line endings, leave trailing blanks and page-break
//! form feeds, and some emit zero-width characters from PDF text layers. The
//! rules here are pure `&str → String` passes, and both entry points are
//! idempotent: cleaning cleaned text changes nothing.
//!
//! ## Rule order
//!
//! Line endings are normalised before anything looks at lines; invisible
//! characters go before trailing-whitespace trimming so a line ending in a
//! zero-width space is trimmed too; blank-line collapsing runs last because
//! the markdown passes can introduce blank lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean plain text: no leading or trailing blank lines, at most one empty
/// line between paragraphs.
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

/// Clean markdown: the text rules plus heading spacing and GFM table
/// repair. Non-empty output ends with exactly one newline.
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = normalise_heading_spacing(&s);
    let s = repair_tables(&s);
    let s = collapse_blank_lines(&s);
    let trimmed = s.trim_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ── Line endings ─────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    // Form feeds are page breaks from PDF text tools.
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{000C}', "\n\n")
}

// ── Invisible characters ─────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{FEFF}' | '\u{00AD}' | '\u{200C}' | '\u{200D}' | '\u{2060}'
            ) && !(c.is_control() && *c != '\n' && *c != '\t')
        })
        .collect()
}

// ── Trailing whitespace ──────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Blank lines ──────────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Headings ─────────────────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

/// Ensure a blank line before every ATX heading except at the very start.
fn normalise_heading_spacing(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 64);
    for (i, line) in input.split('\n').enumerate() {
        if i > 0 {
            if RE_HEADING.is_match(line) {
                let kept = out.trim_end_matches('\n').len();
                out.truncate(kept);
                if kept > 0 {
                    out.push_str("\n\n");
                }
            } else {
                out.push('\n');
            }
        }
        out.push_str(line);
    }
    out
}

// ── GFM tables ───────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    is_table_row(t) && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Within each run of table rows keep exactly one separator, directly after
/// the header row, inserting it when missing.
fn repair_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.split('\n') {
        if !is_table_row(line) {
            row_in_table = 0;
            out.push(line.to_string());
            continue;
        }

        row_in_table += 1;
        let separator = is_separator_row(line);
        match (row_in_table, separator) {
            // A table cannot start with a separator: treat it as stray text.
            (1, true) => {
                row_in_table = 0;
                out.push(line.to_string());
            }
            (2, true) => out.push(line.to_string()),
            (2, false) => {
                let cols = out
                    .last()
                    .map(|h| h.trim().matches('|').count().saturating_sub(1).max(1))
                    .unwrap_or(1);
                out.push(separator_row(cols));
                out.push(line.to_string());
                row_in_table = 3;
            }
            (_, true) => {}
            (_, false) => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

fn separator_row(cols: usize) -> String {
    std::iter::once("|")
        .chain(std::iter::repeat_n(" --- |", cols))
        .collect()
}

/// Render rows as a GFM table. Used when a backend has tables but no
/// markdown of its own.
pub fn table_markdown(headers: &[String], rows: &[Vec<String>]) -> String {
    let cols = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(headers.len()))
        .max()
        .unwrap_or(0);
    if cols == 0 {
        return String::new();
    }

    let cell = |s: &str| s.replace('|', "\\|").replace('\n', " ");
    let render = |row: &[String]| -> String {
        let mut line = String::from("|");
        for i in 0..cols {
            line.push(' ');
            line.push_str(&cell(row.get(i).map(String::as_str).unwrap_or("")));
            line.push_str(" |");
        }
        line
    };

    let (head, body) = if headers.is_empty() {
        match rows.split_first() {
            Some((first, rest)) => (render(first), rest),
            None => return String::new(),
        }
    } else {
        (render(headers), rows)
    };

    let mut lines = vec![head, separator_row(cols)];
    lines.extend(body.iter().map(|r| render(r)));
    lines.join("\n")
}
