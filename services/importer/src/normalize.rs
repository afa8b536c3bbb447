//! Row normalization: key validation, dates, invoicing heuristics and status derivation
//!
//! This stage is DETERMINISTIC: the reference date ("today") is an input, so the same
//! file and the same date always produce the same rows.

use chrono::NaiveDate;

use crate::columns::{ColumnMap, RowCells};
use crate::error::SkipReason;
use crate::header::HeaderMatch;
use crate::model::{NormalizedRow, OrderStatus, RequestDraft, Schema};
use crate::report::Diagnostic;

pub const DEFAULT_MAX_KEY_LEN: usize = 20;
pub const UNKNOWN_CLIENT: &str = "Cliente Desconhecido";
pub const UNKNOWN_SALESPERSON: &str = "Vendedor Desconhecido";
pub const DEFAULT_DEPT: &str = "PCP";
pub const IMPORTED_NOTE: &str = "Importado via Planilha Geral";

/// NFe numbers that mean "no invoice issued"
const NFE_PLACEHOLDERS: &[&str] = &["0", "0,00"];

/// Parse `dd/mm/yyyy`, ignoring anything after the first space (time of day).
///
/// Any other shape, or an impossible calendar date, is "no date".
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split(' ').next()?;
    let parts: Vec<&str> = date_part.split('/').collect();
    if parts.len() != 3 {
        return None;
    }

    let day: u32 = parts[0].trim().parse().ok()?;
    let month: u32 = parts[1].trim().parse().ok()?;
    let year: i32 = parts[2].trim().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Validate the order key cell. Keys with `/` are dates shifted into the wrong column.
pub fn validate_key(raw: Option<&str>, max_len: usize) -> Result<&str, SkipReason> {
    let key = raw.map(str::trim).unwrap_or("");
    if key.is_empty() {
        return Err(SkipReason::MissingKey);
    }
    if key.contains('/') {
        return Err(SkipReason::KeyLooksLikeDate);
    }
    if key.chars().count() > max_len {
        return Err(SkipReason::KeyTooLong);
    }
    Ok(key)
}

/// Status priority: invoiced, then overdue forecast, then responded, else pending
pub fn derive_status(
    invoiced: bool,
    forecast: Option<NaiveDate>,
    response: Option<NaiveDate>,
    today: NaiveDate,
) -> OrderStatus {
    if invoiced {
        OrderStatus::Concluido
    } else if forecast.is_some_and(|f| f < today) {
        OrderStatus::Atrasado
    } else if response.is_some() {
        OrderStatus::Respondido
    } else {
        OrderStatus::Pendente
    }
}

/// Drop exactly one `"` from each end when the notes are wrapped in quotes
fn strip_wrapping_quotes(notes: &str) -> &str {
    if notes.starts_with('"') && notes.ends_with('"') {
        if notes.len() == 1 {
            ""
        } else {
            &notes[1..notes.len() - 1]
        }
    } else {
        notes
    }
}

/// Invoicing signals extracted from a row
#[derive(Debug, Clone, Copy, PartialEq)]
struct Invoicing {
    invoiced: bool,
    date: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct NormalizeOutput {
    pub rows: Vec<NormalizedRow>,
    pub diagnostics: Vec<Diagnostic>,
    pub skipped: usize,
}

/// Turns data lines of one file into `NormalizedRow`s
#[derive(Debug)]
pub struct Normalizer<'a> {
    schema: Schema,
    columns: &'a ColumnMap,
    today: NaiveDate,
    max_key_len: usize,
}

impl<'a> Normalizer<'a> {
    pub fn new(schema: Schema, columns: &'a ColumnMap, today: NaiveDate, max_key_len: usize) -> Self {
        Self {
            schema,
            columns,
            today,
            max_key_len,
        }
    }

    fn date(&self, cells: &RowCells, column: Option<usize>) -> Option<NaiveDate> {
        cells.get(column).and_then(parse_date)
    }

    fn invoicing(&self, cells: &RowCells) -> Invoicing {
        let cols = self.columns;
        match self.schema {
            Schema::Old => {
                let invoiced = cells
                    .text(cols.invoiced_flag)
                    .is_some_and(|v| v.to_lowercase() == "sim");
                let date = if invoiced {
                    self.date(cells, cols.invoice_date_column())
                } else {
                    None
                };
                Invoicing { invoiced, date }
            }
            Schema::New => {
                let has_nfe = cells
                    .text(cols.nfe_number)
                    .is_some_and(|n| !NFE_PLACEHOLDERS.contains(&n));
                let departure = cells.text(cols.departure_date);
                let invoiced = has_nfe || departure.is_some();
                let date = if invoiced {
                    // Best effort: the shipment happened, so fall back to today
                    Some(
                        self.date(cells, cols.nfe_date)
                            .or_else(|| departure.and_then(parse_date))
                            .unwrap_or(self.today),
                    )
                } else {
                    None
                };
                Invoicing { invoiced, date }
            }
        }
    }

    /// Normalize one logical line; `line` is its 1-based position in the file
    pub fn normalize(&self, line: usize, raw: &str) -> Result<NormalizedRow, SkipReason> {
        let cols = self.columns;
        let cells = RowCells::split(raw.trim());

        let pv_code = validate_key(cells.get(cols.order_key), self.max_key_len)?;
        let client_name = cells.text(cols.client).unwrap_or(UNKNOWN_CLIENT);
        let salesperson = cells.text(cols.salesperson).unwrap_or(UNKNOWN_SALESPERSON);
        let order_date = self.date(&cells, cols.order_date).unwrap_or(self.today);

        let Invoicing {
            invoiced,
            date: invoiced_date,
        } = self.invoicing(&cells);
        let forecast_date = self.date(&cells, cols.forecast);

        let (response_date, request) = match self.schema {
            Schema::Old => {
                let response_date = self.date(&cells, cols.response_date);
                let draft = RequestDraft {
                    requested_dept: cells.text(cols.requested_dept).unwrap_or(DEFAULT_DEPT).to_string(),
                    request_date: self.date(&cells, cols.request_date).unwrap_or(self.today),
                    response_date,
                    forecast_date,
                    notes: strip_wrapping_quotes(cells.text(cols.notes).unwrap_or("")).to_string(),
                };
                (response_date, Some(draft))
            }
            // NEW exports have no request columns; only a forecast justifies a request
            Schema::New => {
                let draft = forecast_date.map(|forecast| RequestDraft {
                    requested_dept: DEFAULT_DEPT.to_string(),
                    request_date: order_date,
                    response_date: None,
                    forecast_date: Some(forecast),
                    notes: IMPORTED_NOTE.to_string(),
                });
                (None, draft)
            }
        };

        Ok(NormalizedRow {
            line,
            pv_code: pv_code.to_string(),
            client_name: client_name.to_string(),
            salesperson: salesperson.to_string(),
            order_date,
            invoiced,
            invoiced_date,
            forecast_date,
            status: derive_status(invoiced, forecast_date, response_date, self.today),
            request,
        })
    }

    /// Response recorded before the request was made. Kept, but worth flagging.
    fn date_warning(&self, raw: &str, row: &NormalizedRow) -> Option<Diagnostic> {
        let cells = RowCells::split(raw.trim());
        let requested = self.date(&cells, self.columns.request_date)?;
        let responded = self.date(&cells, self.columns.response_date)?;
        (responded < requested).then(|| {
            Diagnostic::date_warning(
                row.line,
                &row.pv_code,
                format!("response date {} precedes request date {}", responded, requested),
            )
        })
    }
}

/// Normalize every data line after the header. Blank lines are ignored silently.
pub fn normalize_rows<S: AsRef<str>>(
    lines: &[S],
    header: HeaderMatch,
    columns: &ColumnMap,
    today: NaiveDate,
    max_key_len: usize,
) -> NormalizeOutput {
    let normalizer = Normalizer::new(header.schema, columns, today, max_key_len);
    let mut output = NormalizeOutput::default();

    for (idx, raw) in lines.iter().enumerate().skip(header.index + 1) {
        let raw = raw.as_ref();
        if raw.trim().is_empty() {
            continue;
        }
        let line = idx + 1;

        match normalizer.normalize(line, raw) {
            Ok(row) => {
                if let Some(warning) = normalizer.date_warning(raw, &row) {
                    tracing::warn!(line, pv_code = %row.pv_code, "{}", warning.detail);
                    output.diagnostics.push(warning);
                }
                output.rows.push(row);
            }
            Err(reason) => {
                let key = RowCells::split(raw.trim())
                    .text(columns.order_key)
                    .map(str::to_string);
                tracing::debug!(line, %reason, "Skipping row");
                output
                    .diagnostics
                    .push(Diagnostic::skipped(line, key.as_deref(), reason));
                output.skipped += 1;
            }
        }
    }

    output
}
