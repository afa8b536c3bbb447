//! Logical record reassembly for `;`-delimited exports
//!
//! Spreadsheet exports put free-text notes in quoted fields that may contain line
//! breaks. A physical line belongs to the current record while the record holds an odd
//! number of `"` characters.

/// Split on `\r\n`, `\n` or a bare `\r`. Trailing line ending yields a final empty line.
pub fn physical_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&text[start..]);

    lines
}

/// Merge physical lines into logical records, joining continuation lines with `\n`.
///
/// Quotes are assumed to pair up within a record. An unmatched quote near the end of
/// the file swallows every remaining line into one final record, which is emitted as-is.
pub fn logical_lines(text: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut quotes = 0usize;

    for line in physical_lines(text) {
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        quotes += line.matches('"').count();

        if quotes % 2 == 0 {
            records.push(std::mem::take(&mut current));
            quotes = 0;
        }
    }

    if !current.is_empty() {
        tracing::debug!(
            chars = current.len(),
            "Unterminated quoted field at end of file"
        );
        records.push(current);
    }

    records
}
