//! Capability registry: which backends are usable in this process.
//!
//! Every optional backend (and every optional sub-feature of a backend) is
//! probed exactly once, independently, before the first request is served.
//! A failed probe never raises: it yields `available = false` with the
//! failure reason kept for diagnostics, and the backend stays unavailable for
//! the rest of the process lifetime. There are no retries.
//!
//! ## Probe kinds
//!
//! | Probe | Meaning of "available" |
//! |-------|------------------------|
//! | [`Probe::SharedLibrary`] | libpdfium could be bound |
//! | [`Probe::Executable`] | the tool's version command ran |
//! | [`Probe::PythonModule`] | `python -c "import <module>"` exited 0 |
//! | [`Probe::Builtin`] | in-process Rust code, always available |
//!
//! Probing also fixes the [`BackendEnvironment`] — the noise-suppression
//! variables every backend subprocess inherits — so backends never print
//! model-loading chatter where the result JSON is expected.

use crate::config::ExtractionConfig;
use once_cell::sync::OnceCell;
use pdfium_render::prelude::Pdfium;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

/// A probed backend or backend sub-feature.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Pdfplumber,
    Pdfium,
    Pdftotext,
    Docling,
    DoclingOcr,
    Tesseract,
    Crawler,
    CrawlerExtraction,
    Lopdf,
    HtmlScrape,
    TextScrape,
    ImageProbe,
}

/// How a capability is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    SharedLibrary,
    Executable {
        program: &'static str,
        args: &'static [&'static str],
        /// Some tools (poppler) exit non-zero from their version flag.
        any_exit_status: bool,
    },
    PythonModule {
        module: &'static str,
    },
    Builtin,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::Pdfplumber,
        Capability::Pdfium,
        Capability::Pdftotext,
        Capability::Docling,
        Capability::DoclingOcr,
        Capability::Tesseract,
        Capability::Crawler,
        Capability::CrawlerExtraction,
        Capability::Lopdf,
        Capability::HtmlScrape,
        Capability::TextScrape,
        Capability::ImageProbe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Pdfplumber => "pdfplumber",
            Capability::Pdfium => "pdfium",
            Capability::Pdftotext => "pdftotext",
            Capability::Docling => "docling",
            Capability::DoclingOcr => "docling-ocr",
            Capability::Tesseract => "tesseract",
            Capability::Crawler => "crawler",
            Capability::CrawlerExtraction => "crawler-extraction",
            Capability::Lopdf => "lopdf",
            Capability::HtmlScrape => "html-scrape",
            Capability::TextScrape => "text-scrape",
            Capability::ImageProbe => "image-probe",
        }
    }

    pub fn from_name(name: &str) -> Option<Capability> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
    }

    pub fn probe_kind(&self) -> Probe {
        match self {
            Capability::Pdfplumber => Probe::PythonModule {
                module: "pdfplumber",
            },
            Capability::Pdfium => Probe::SharedLibrary,
            Capability::Pdftotext => Probe::Executable {
                program: "pdftotext",
                args: &["-v"],
                any_exit_status: true,
            },
            Capability::Docling => Probe::Executable {
                program: "docling",
                args: &["--version"],
                any_exit_status: false,
            },
            Capability::DoclingOcr => Probe::PythonModule { module: "easyocr" },
            Capability::Tesseract => Probe::Executable {
                program: "tesseract",
                args: &["--version"],
                any_exit_status: false,
            },
            Capability::Crawler => Probe::Executable {
                program: "crwl",
                args: &["--version"],
                any_exit_status: false,
            },
            Capability::CrawlerExtraction => Probe::PythonModule {
                module: "crawl4ai.extraction_strategy",
            },
            Capability::Lopdf
            | Capability::HtmlScrape
            | Capability::TextScrape
            | Capability::ImageProbe => Probe::Builtin,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapabilityStatus {
    pub fn available(version: Option<String>) -> Self {
        Self {
            available: true,
            version,
            reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            version: None,
            reason: Some(reason.into()),
        }
    }
}

/// Environment applied to every backend subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendEnvironment {
    vars: Vec<(String, String)>,
}

impl BackendEnvironment {
    /// Variables that silence ML-framework logging and progress bars.
    pub fn quiet() -> Self {
        let vars = [
            ("TF_CPP_MIN_LOG_LEVEL", "3"),
            ("TRANSFORMERS_VERBOSITY", "error"),
            ("TOKENIZERS_PARALLELISM", "false"),
            ("HF_HUB_DISABLE_PROGRESS_BARS", "1"),
            ("TQDM_DISABLE", "1"),
            ("USE_TORCH", "1"),
            ("USE_TF", "0"),
            ("PYTHONIOENCODING", "utf-8"),
        ];
        Self {
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Apply to a `std` command.
    pub fn apply_std(&self, cmd: &mut Command) {
        for (k, v) in self.vars() {
            cmd.env(k, v);
        }
    }

    /// Apply to a tokio command.
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        for (k, v) in self.vars() {
            cmd.env(k, v);
        }
    }
}

/// Where libpdfium was found by the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum PdfiumLocation {
    Path(PathBuf),
    System,
}

impl PdfiumLocation {
    /// Bind a fresh PDFium instance at this location.
    pub fn bind(&self) -> Result<Pdfium, String> {
        let bindings = match self {
            PdfiumLocation::Path(p) => Pdfium::bind_to_library(p),
            PdfiumLocation::System => Pdfium::bind_to_system_library(),
        };
        bindings.map(Pdfium::new).map_err(|e| format!("{e:?}"))
    }
}

/// The immutable capability set for one process.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    statuses: BTreeMap<Capability, CapabilityStatus>,
    #[serde(skip)]
    environment: Arc<BackendEnvironment>,
    #[serde(skip)]
    pdfium: Option<PdfiumLocation>,
}

static GLOBAL: OnceCell<Capabilities> = OnceCell::new();

impl Capabilities {
    /// The process-wide registry, probed on first use and then shared.
    pub fn global(config: &ExtractionConfig) -> &'static Capabilities {
        GLOBAL.get_or_init(|| Capabilities::probe(config))
    }

    /// Probe every capability once.
    ///
    /// Probes run on scoped threads so a slow interpreter start does not
    /// serialise the whole startup; the call still returns only after every
    /// probe settled. A probe that panics counts as unavailable.
    pub fn probe(config: &ExtractionConfig) -> Capabilities {
        let environment = BackendEnvironment::quiet();
        let mut pdfium = None;

        let statuses: BTreeMap<Capability, CapabilityStatus> = std::thread::scope(|scope| {
            let handles: Vec<_> = Capability::ALL
                .into_iter()
                .map(|cap| {
                    let env = &environment;
                    (
                        cap,
                        scope.spawn(move || probe_one(cap, config, env)),
                    )
                })
                .collect();

            handles
                .into_iter()
                .map(|(cap, handle)| {
                    let (status, location) = handle
                        .join()
                        .unwrap_or_else(|_| (CapabilityStatus::unavailable("probe panicked"), None));
                    if location.is_some() {
                        pdfium = location;
                    }
                    (cap, status)
                })
                .collect()
        });

        let available: Vec<&str> = statuses
            .iter()
            .filter(|(_, s)| s.available)
            .map(|(c, _)| c.as_str())
            .collect();
        info!("Capabilities available: {}", available.join(", "));
        for (cap, status) in statuses.iter().filter(|(_, s)| !s.available) {
            debug!(
                "Capability {} unavailable: {}",
                cap,
                status.reason.as_deref().unwrap_or("unknown")
            );
        }

        Capabilities {
            statuses,
            environment: Arc::new(environment),
            pdfium,
        }
        .with_disabled(&config.disabled_capabilities)
    }

    /// Build a registry from known statuses. Capabilities not listed are
    /// unavailable.
    pub fn from_statuses(statuses: impl IntoIterator<Item = (Capability, CapabilityStatus)>) -> Self {
        let mut map: BTreeMap<Capability, CapabilityStatus> = Capability::ALL
            .into_iter()
            .map(|c| (c, CapabilityStatus::unavailable("not probed")))
            .collect();
        map.extend(statuses);
        Capabilities {
            statuses: map,
            environment: Arc::new(BackendEnvironment::quiet()),
            pdfium: None,
        }
    }

    /// Registry where exactly the listed capabilities are available.
    pub fn only(available: &[Capability]) -> Self {
        Self::from_statuses(
            available
                .iter()
                .map(|c| (*c, CapabilityStatus::available(None))),
        )
    }

    /// Copy with the given capabilities forced unavailable.
    pub fn with_disabled(mut self, disabled: &[Capability]) -> Self {
        for cap in disabled {
            self.statuses.insert(
                *cap,
                CapabilityStatus::unavailable("disabled by configuration"),
            );
        }
        self
    }

    pub fn is_available(&self, capability: Capability) -> bool {
        self.statuses
            .get(&capability)
            .is_some_and(|s| s.available)
    }

    pub fn status(&self, capability: Capability) -> Option<&CapabilityStatus> {
        self.statuses.get(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, &CapabilityStatus)> {
        self.statuses.iter().map(|(c, s)| (*c, s))
    }

    pub fn environment(&self) -> Arc<BackendEnvironment> {
        Arc::clone(&self.environment)
    }

    pub fn pdfium_location(&self) -> Option<&PdfiumLocation> {
        self.pdfium.as_ref()
    }
}

// ── Probes ───────────────────────────────────────────────────────────────

fn probe_one(
    cap: Capability,
    config: &ExtractionConfig,
    env: &BackendEnvironment,
) -> (CapabilityStatus, Option<PdfiumLocation>) {
    match cap.probe_kind() {
        Probe::Builtin => (
            CapabilityStatus::available(Some(env!("CARGO_PKG_VERSION").to_string())),
            None,
        ),
        Probe::SharedLibrary => match probe_pdfium(config) {
            Ok(location) => (CapabilityStatus::available(None), Some(location)),
            Err(reason) => (CapabilityStatus::unavailable(reason), None),
        },
        Probe::Executable {
            program,
            args,
            any_exit_status,
        } => (probe_executable(program, args, any_exit_status, env), None),
        Probe::PythonModule { module } => (probe_python_module(&config.python, module, env), None),
    }
}

/// Candidate libpdfium locations, most specific first.
fn pdfium_candidates(config: &ExtractionConfig) -> Vec<PdfiumLocation> {
    let mut out = Vec::new();
    if let Some(ref p) = config.pdfium_library_path {
        out.push(PdfiumLocation::Path(p.clone()));
    }
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        if !p.trim().is_empty() {
            out.push(PdfiumLocation::Path(PathBuf::from(p)));
        }
    }
    out.push(PdfiumLocation::Path(PathBuf::from(
        Pdfium::pdfium_platform_library_name_at_path("./"),
    )));
    out.push(PdfiumLocation::System);
    out
}

fn probe_pdfium(config: &ExtractionConfig) -> Result<PdfiumLocation, String> {
    let mut last_err = String::from("no candidate location");
    for location in pdfium_candidates(config) {
        match location.bind() {
            Ok(_pdfium) => {
                debug!("Bound pdfium at {:?}", location);
                return Ok(location);
            }
            Err(e) => last_err = e,
        }
    }
    Err(format!("libpdfium could not be bound: {last_err}"))
}

fn probe_executable(
    program: &str,
    args: &[&str],
    any_exit_status: bool,
    env: &BackendEnvironment,
) -> CapabilityStatus {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    env.apply_std(&mut cmd);

    match cmd.output() {
        Ok(output) if output.status.success() || any_exit_status => {
            let version = first_line(&output.stdout).or_else(|| first_line(&output.stderr));
            CapabilityStatus::available(version)
        }
        Ok(output) => CapabilityStatus::unavailable(format!(
            "`{program}` exited with {}: {}",
            output.status,
            last_line(&output.stderr).unwrap_or_default()
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CapabilityStatus::unavailable(format!("`{program}` not found on PATH"))
        }
        Err(e) => CapabilityStatus::unavailable(format!("`{program}` could not be started: {e}")),
    }
}

fn probe_python_module(python: &str, module: &str, env: &BackendEnvironment) -> CapabilityStatus {
    let mut cmd = Command::new(python);
    cmd.arg("-c")
        .arg(format!("import {module}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    env.apply_std(&mut cmd);

    match cmd.output() {
        Ok(output) if output.status.success() => CapabilityStatus::available(None),
        Ok(output) => CapabilityStatus::unavailable(
            last_line(&output.stderr).unwrap_or_else(|| format!("cannot import {module}")),
        ),
        Err(e) => CapabilityStatus::unavailable(format!("`{python}` could not be started: {e}")),
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_name(cap.as_str()), Some(cap));
        }
        assert_eq!(Capability::from_name("nope"), None);
    }

    #[test]
    fn builtins_are_builtin() {
        assert_eq!(Capability::Lopdf.probe_kind(), Probe::Builtin);
        assert_eq!(Capability::HtmlScrape.probe_kind(), Probe::Builtin);
        assert!(matches!(
            Capability::DoclingOcr.probe_kind(),
            Probe::PythonModule { .. }
        ));
    }

    #[test]
    fn missing_executable_is_unavailable_not_error() {
        let status = probe_executable(
            "polyextract-definitely-missing-tool",
            &["--version"],
            false,
            &BackendEnvironment::quiet(),
        );
        assert!(!status.available);
        assert!(status.reason.unwrap().contains("not found"));
    }

    #[test]
    fn missing_interpreter_is_unavailable() {
        let status = probe_python_module(
            "polyextract-no-such-python",
            "json",
            &BackendEnvironment::quiet(),
        );
        assert!(!status.available);
    }

    #[test]
    fn only_marks_rest_unavailable() {
        let caps = Capabilities::only(&[Capability::Lopdf]);
        assert!(caps.is_available(Capability::Lopdf));
        assert!(!caps.is_available(Capability::Docling));
        assert_eq!(caps.iter().count(), Capability::ALL.len());
    }

    #[test]
    fn disabled_overrides_probe() {
        let caps = Capabilities::only(&[Capability::Docling]).with_disabled(&[Capability::Docling]);
        assert!(!caps.is_available(Capability::Docling));
        assert_eq!(
            caps.status(Capability::Docling).unwrap().reason.as_deref(),
            Some("disabled by configuration")
        );
    }

    #[test]
    fn probe_never_panics_and_builtins_available() {
        let config = ExtractionConfig::builder()
            .python("polyextract-no-such-python")
            .disable(Capability::Pdfium)
            .build()
            .unwrap();
        let caps = Capabilities::probe(&config);
        assert!(caps.is_available(Capability::TextScrape));
        assert!(caps.is_available(Capability::Lopdf));
        assert!(!caps.is_available(Capability::DoclingOcr));
        assert!(!caps.is_available(Capability::Pdfium));
    }

    #[test]
    fn quiet_environment_silences_tensorflow() {
        let env = BackendEnvironment::quiet();
        assert!(env.vars().any(|(k, v)| k == "TF_CPP_MIN_LOG_LEVEL" && v == "3"));
    }
}
