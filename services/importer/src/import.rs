//! Import pipeline: bytes -> text -> logical lines -> header -> rows -> upsert

use chrono::NaiveDate;
use std::path::Path;
use uuid::Uuid;

use crate::columns::ColumnMap;
use crate::decode::{decode_with_fallback, TextEncoding};
use crate::error::ImportError;
use crate::header::{locate_header, snippet, HeaderMatch};
use crate::lines::logical_lines;
use crate::model::{ImportOutcome, NormalizedRow, Schema};
use crate::normalize::normalize_rows;
use crate::reconcile::reconcile;
use crate::report::Diagnostic;
use crate::store::OrderStore;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Reference date for defaults and overdue detection
    pub today: NaiveDate,
    pub max_key_len: usize,
    pub batch_size: usize,
    /// Requester recorded on follow-up requests created by the import
    pub requester_id: Uuid,
}

/// A decoded and normalized file, before any write
#[derive(Debug)]
pub struct ParsedFile {
    pub encoding: TextEncoding,
    pub schema: Schema,
    pub header_line: usize,
    pub rows: Vec<NormalizedRow>,
    pub skipped: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct ImportSummary {
    pub encoding: TextEncoding,
    pub schema: Schema,
    pub header_line: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportSummary {
    pub fn outcome(&self) -> ImportOutcome {
        ImportOutcome::success(self.created, self.updated)
    }
}

/// Result contract for either branch of an import
pub fn outcome_of(result: &Result<ImportSummary, ImportError>) -> ImportOutcome {
    match result {
        Ok(summary) => summary.outcome(),
        Err(e) => ImportOutcome::failure(e),
    }
}

/// Read the input file. No path is `NoFile`; an unreadable path is `ReadFailed`.
pub async fn read_input(file: Option<&Path>) -> Result<Vec<u8>, ImportError> {
    let Some(path) = file else {
        return Err(ImportError::NoFile);
    };
    tokio::fs::read(path).await.map_err(|e| {
        tracing::error!(path = %path.display(), "Failed to read input file: {}", e);
        ImportError::ReadFailed(format!("{}: {}", path.display(), e))
    })
}

/// Decode, locate the header and normalize every data row.
/// This function is DETERMINISTIC for a given `today`.
pub fn parse_bytes(bytes: &[u8], today: NaiveDate, max_key_len: usize) -> Result<ParsedFile, ImportError> {
    if bytes.is_empty() {
        return Err(ImportError::NoFile);
    }

    let probe = |text: &str| {
        let lines = logical_lines(text);
        locate_header(&lines).map(|header| (lines, header))
    };

    let decoded = decode_with_fallback(bytes, probe).map_err(|text| {
        let lines = logical_lines(&text);
        let snippet = snippet(&lines);
        tracing::error!("CSV header not found. First lines:\n{}", snippet);
        ImportError::HeaderNotFound { snippet }
    })?;

    let (lines, header): (Vec<String>, HeaderMatch) = decoded.value;
    tracing::info!(
        encoding = %decoded.encoding,
        schema = %header.schema,
        header_line = header.index + 1,
        chars = decoded.text.len(),
        lines = lines.len(),
        "Format detected"
    );

    let columns = ColumnMap::from_header(&lines[header.index], header.schema);
    let output = normalize_rows(&lines, header, &columns, today, max_key_len);

    Ok(ParsedFile {
        encoding: decoded.encoding,
        schema: header.schema,
        header_line: header.index + 1,
        rows: output.rows,
        skipped: output.skipped,
        diagnostics: output.diagnostics,
    })
}

/// Run a full import of one file against `store`
pub async fn import_bytes<S: OrderStore + ?Sized>(
    store: &S,
    bytes: &[u8],
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let parsed = parse_bytes(bytes, options.today, options.max_key_len)?;
    let reconciled = reconcile(store, parsed.rows, options.requester_id, options.batch_size).await?;

    let mut diagnostics = parsed.diagnostics;
    diagnostics.extend(reconciled.diagnostics);
    diagnostics.sort_by_key(|d| d.line);

    Ok(ImportSummary {
        encoding: parsed.encoding,
        schema: parsed.schema,
        header_line: parsed.header_line,
        created: reconciled.created,
        updated: reconciled.updated,
        skipped: parsed.skipped + reconciled.skipped,
        failed: reconciled.failed,
        diagnostics,
    })
}
