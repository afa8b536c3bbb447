//! Header row detection and schema classification

use crate::model::Schema;

/// Number of logical lines quoted back when no header is found
pub const SNIPPET_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMatch {
    pub index: usize,
    pub schema: Schema,
}

/// Classify a single line. OLD wins when a line could match both layouts.
pub fn classify(line: &str) -> Option<Schema> {
    if !line.contains("Cliente") {
        return None;
    }
    if line.contains("PV") {
        Some(Schema::Old)
    } else if line.contains("Número") || line.contains("Numero") {
        Some(Schema::New)
    } else {
        None
    }
}

/// First line that classifies as a header, skipping any preamble
pub fn locate_header<S: AsRef<str>>(lines: &[S]) -> Option<HeaderMatch> {
    lines.iter().enumerate().find_map(|(index, line)| {
        classify(line.as_ref()).map(|schema| HeaderMatch { index, schema })
    })
}

/// First lines of the file, joined for the "header not found" message
pub fn snippet<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .take(SNIPPET_LINES)
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join("\n")
}
