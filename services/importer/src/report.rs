//! Per-row diagnostics and the optional CSV report

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::SkipReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Skipped,
    WriteFailed,
    DateWarning,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Skipped => "skipped",
            DiagnosticKind::WriteFailed => "write_failed",
            DiagnosticKind::DateWarning => "date_warning",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something worth telling the operator about a single data row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub pv_code: Option<String>,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl Diagnostic {
    pub fn skipped(line: usize, pv_code: Option<&str>, reason: SkipReason) -> Self {
        Self {
            line,
            pv_code: pv_code.map(str::to_string),
            kind: DiagnosticKind::Skipped,
            detail: reason.to_string(),
        }
    }

    pub fn write_failed(line: usize, pv_code: &str, err: &anyhow::Error) -> Self {
        Self {
            line,
            pv_code: Some(pv_code.to_string()),
            kind: DiagnosticKind::WriteFailed,
            detail: format!("{:#}", err),
        }
    }

    pub fn date_warning(line: usize, pv_code: &str, detail: String) -> Self {
        Self {
            line,
            pv_code: Some(pv_code.to_string()),
            kind: DiagnosticKind::DateWarning,
            detail,
        }
    }
}

/// Write diagnostics as a `;`-delimited CSV, header row included
pub fn write_report(path: &Path, diagnostics: &[Diagnostic]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create report file {}", path.display()))?;

    for diagnostic in diagnostics {
        writer
            .serialize(diagnostic)
            .context("Failed to write report row")?;
    }
    writer.flush().context("Failed to flush report")?;

    Ok(())
}
