//! Poppler's `pdftotext` as a subprocess.
//!
//! Text goes to stdout (`-`); pages are separated by form feeds.

use super::{run_tool, Backend, BackendContext, BackendId, PdfInfo, RawBackendOutput};
use crate::capability::Capability;
use crate::config::Options;
use crate::error::AdapterError;
use crate::pipeline::input::ResolvedInput;
use async_trait::async_trait;
use std::ffi::OsString;

pub struct PdftotextBackend;

/// Translate the option bag into `pdftotext` arguments.
pub fn build_args(input: &ResolvedInput, options: &Options) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if options.bool_or("layout", true) {
        args.push("-layout".into());
    }
    args.push("-enc".into());
    args.push("UTF-8".into());
    if let Some(first) = options.get_u64("first_page").filter(|p| *p > 0) {
        args.push("-f".into());
        args.push(first.to_string().into());
    }
    if let Some(last) = options.get_u64("last_page").filter(|p| *p > 0) {
        args.push("-l".into());
        args.push(last.to_string().into());
    }
    if let Some(password) = options.get_str("password") {
        args.push("-upw".into());
        args.push(password.into());
    }
    args.push(input.path().as_os_str().to_owned());
    args.push("-".into());
    args
}

/// Split `pdftotext` output into pages. The trailing form feed after the
/// last page does not start a new page.
pub fn split_pages(stdout: &str) -> Vec<String> {
    let body = stdout.strip_suffix('\u{000C}').unwrap_or(stdout);
    if body.trim().is_empty() {
        return Vec::new();
    }
    body.split('\u{000C}').map(str::to_string).collect()
}

#[async_trait]
impl Backend for PdftotextBackend {
    fn id(&self) -> BackendId {
        BackendId::Pdftotext
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Pdftotext]
    }

    async fn invoke(
        &self,
        input: &ResolvedInput,
        options: &Options,
        ctx: &BackendContext,
    ) -> Result<RawBackendOutput, AdapterError> {
        let output = run_tool(self.id(), "pdftotext", build_args(input, options), ctx).await?;
        if !output.success() {
            return Err(output.exit_failure(self.id()));
        }

        let pages = split_pages(&output.stdout_lossy());
        Ok(RawBackendOutput::PdfPages {
            pages,
            info: PdfInfo::default(),
        })
    }
}
