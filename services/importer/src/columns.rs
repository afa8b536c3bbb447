//! Column mapping for the two export layouts
//!
//! Known column names are explicit, never inferred. A field missing from the header maps
//! to `None` and reads as "no data" for every row.

use csv::StringRecord;

use crate::model::Schema;

/// How a field's header cell is recognised
#[derive(Debug, Clone, Copy)]
enum HeaderName {
    Exact(&'static str),
    /// Any of the variants as a substring; decoding may leave accents mangled
    Contains(&'static [&'static str]),
}

const NEW_KEY_VARIANTS: &[&str] = &["Número", "Numero"];
const NEW_DEPARTURE_VARIANTS: &[&str] = &["Saída", "Saida"];

/// Resolved column positions for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub order_key: Option<usize>,
    pub client: Option<usize>,
    pub salesperson: Option<usize>,
    pub requested_dept: Option<usize>,
    pub request_date: Option<usize>,
    pub response_date: Option<usize>,
    pub order_date: Option<usize>,
    pub forecast: Option<usize>,
    pub notes: Option<usize>,
    /// OLD: "Faturado" (Sim/Não)
    pub invoiced_flag: Option<usize>,
    /// NEW: "Nro. Nfe."
    pub nfe_number: Option<usize>,
    /// NEW: "Dt. Nfe."
    pub nfe_date: Option<usize>,
    /// NEW: "Dt. Saída"
    pub departure_date: Option<usize>,
}

/// Split one logical record on `;`, honouring quoted fields.
///
/// Quotes around a whole field are removed and `""` inside them reads as `"`. A quote
/// that does not open a field is kept as text.
pub fn split_record(line: &str) -> StringRecord {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record,
        Ok(false) => StringRecord::new(),
        Err(e) => {
            tracing::debug!("Unreadable record, treated as empty: {}", e);
            StringRecord::new()
        }
    }
}

fn find_column(headers: &StringRecord, name: HeaderName) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim();
        match name {
            HeaderName::Exact(expected) => h == expected,
            HeaderName::Contains(variants) => variants.iter().any(|v| h.contains(v)),
        }
    })
}

impl ColumnMap {
    /// Map a header line (`;`-separated) for the detected schema
    pub fn from_header(header_line: &str, schema: Schema) -> Self {
        let headers = split_record(header_line);
        let find = |name| find_column(&headers, name);

        let map = match schema {
            Schema::Old => ColumnMap {
                order_key: find(HeaderName::Exact("PV")),
                client: find(HeaderName::Exact("Cliente")),
                salesperson: find(HeaderName::Exact("Vend.")),
                requested_dept: find(HeaderName::Exact("Solicitado")),
                request_date: find(HeaderName::Exact("Dt. Sol.")),
                response_date: find(HeaderName::Exact("Dt. Resp.")),
                order_date: find(HeaderName::Exact("Data Ped.")),
                forecast: find(HeaderName::Exact("Previsão")),
                notes: find(HeaderName::Exact("Observação")),
                invoiced_flag: find(HeaderName::Exact("Faturado")),
                ..ColumnMap::default()
            },
            Schema::New => ColumnMap {
                order_key: find(HeaderName::Contains(NEW_KEY_VARIANTS)),
                client: find(HeaderName::Exact("Cliente")),
                salesperson: find(HeaderName::Exact("Vendedor")),
                order_date: find(HeaderName::Exact("Dt. Cadastro")),
                nfe_number: find(HeaderName::Exact("Nro. Nfe.")),
                nfe_date: find(HeaderName::Exact("Dt. Nfe.")),
                departure_date: find(HeaderName::Contains(NEW_DEPARTURE_VARIANTS)),
                forecast: find(HeaderName::Exact("Dt. Prev. Fechamento")),
                ..ColumnMap::default()
            },
        };

        tracing::debug!(?schema, columns = ?map, "Column mapping resolved");
        map
    }

    /// OLD exports carry the invoice date, unlabeled, right after "Faturado"
    pub fn invoice_date_column(&self) -> Option<usize> {
        self.invoiced_flag.map(|i| i + 1)
    }
}

/// Cells of one data row, read through optional column positions
#[derive(Debug)]
pub struct RowCells {
    cells: StringRecord,
}

impl RowCells {
    pub fn split(line: &str) -> Self {
        Self {
            cells: split_record(line),
        }
    }

    /// Raw cell; `None` when the column is absent or the row is short
    pub fn get(&self, column: Option<usize>) -> Option<&str> {
        column.and_then(|i| self.cells.get(i))
    }

    /// Trimmed cell, `None` when empty
    pub fn text(&self, column: Option<usize>) -> Option<&str> {
        self.get(column).map(str::trim).filter(|s| !s.is_empty())
    }
}
