//! Byte-to-text decoding with a Latin-1 fallback
//!
//! Exports arrive either as UTF-8 (sometimes with a BOM) or as Latin-1 from older
//! spreadsheet tools. UTF-8 decoding is lossy, so a Latin-1 file still "decodes"; the
//! invalid-sequence flag and the caller's probe together decide which text is used.

use encoding_rs::{UTF_8, WINDOWS_1252};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => f.write_str("UTF-8"),
            TextEncoding::Latin1 => f.write_str("ISO-8859-1"),
        }
    }
}

/// Text accepted by the probe, with the probe's result
#[derive(Debug)]
pub struct Decoded<T> {
    pub text: String,
    pub encoding: TextEncoding,
    pub value: T,
}

/// Decode as UTF-8, stripping a leading BOM. Invalid sequences become U+FFFD and
/// the returned flag is set.
pub fn decode_utf8(bytes: &[u8]) -> (String, bool) {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
    // A BOM can survive when the file was concatenated or re-saved
    let text = match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text.into_owned(),
    };
    (text, had_errors)
}

/// Decode as Latin-1. The WHATWG `iso-8859-1` label maps to windows-1252.
pub fn decode_latin1(bytes: &[u8]) -> String {
    let (text, _had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Try UTF-8, then Latin-1, returning the first text the probe accepts.
///
/// A lossy UTF-8 decode is only accepted when the Latin-1 text is rejected too; an
/// ASCII header like `PV;Cliente` matches either way.
///
/// On failure the Latin-1 text is returned so the caller can build a diagnostic.
pub fn decode_with_fallback<T, F>(bytes: &[u8], mut probe: F) -> Result<Decoded<T>, String>
where
    F: FnMut(&str) -> Option<T>,
{
    let (utf8, had_errors) = decode_utf8(bytes);
    if !had_errors {
        if let Some(value) = probe(&utf8) {
            return Ok(Decoded {
                text: utf8,
                encoding: TextEncoding::Utf8,
                value,
            });
        }
    }

    tracing::info!(invalid_utf8 = had_errors, "Trying ISO-8859-1");
    let latin1 = decode_latin1(bytes);
    if let Some(value) = probe(&latin1) {
        return Ok(Decoded {
            text: latin1,
            encoding: TextEncoding::Latin1,
            value,
        });
    }

    if had_errors {
        if let Some(value) = probe(&utf8) {
            tracing::warn!("Invalid UTF-8 sequences replaced; header only matched as UTF-8");
            return Ok(Decoded {
                text: utf8,
                encoding: TextEncoding::Utf8,
                value,
            });
        }
    }

    Err(latin1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_bom_is_stripped() {
        let bytes = "\u{feff}PV;Cliente".as_bytes();
        assert_eq!(decode_utf8(bytes), ("PV;Cliente".to_string(), false));
    }

    #[test]
    fn test_utf8_without_bom_unchanged() {
        assert_eq!(decode_utf8("Previsão".as_bytes()), ("Previsão".to_string(), false));
    }

    #[test]
    fn test_latin1_bytes_become_replacement_chars_in_utf8() {
        // "Número" in Latin-1
        let bytes = b"N\xfamero";
        assert_eq!(decode_utf8(bytes), ("N\u{fffd}mero".to_string(), true));
        assert_eq!(decode_latin1(bytes), "Número");
    }

    #[test]
    fn test_fallback_prefers_utf8() {
        let decoded = decode_with_fallback("Número".as_bytes(), |t| {
            t.contains("Número").then_some(())
        })
        .unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
    }

    #[test]
    fn test_fallback_retries_latin1() {
        let decoded = decode_with_fallback(b"N\xfamero;Cliente", |t| {
            t.contains("Número").then_some(t.len())
        })
        .unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "Número;Cliente");
    }

    #[test]
    fn test_lossy_utf8_with_ascii_header_uses_latin1() {
        // "PV;Cliente\nPão" in Latin-1; the ASCII header matches either way
        let decoded = decode_with_fallback(b"PV;Cliente\nP\xe3o", |t| {
            t.contains("PV;Cliente").then_some(())
        })
        .unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "PV;Cliente\nPão");
    }

    #[test]
    fn test_lossy_utf8_kept_when_latin1_rejected() {
        // UTF-8 "Número" header with one stray invalid byte further down
        let mut bytes = "Número;Cliente\n".as_bytes().to_vec();
        bytes.push(0xff);
        let decoded = decode_with_fallback(&bytes, |t| t.contains("Número").then_some(())).unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
        assert!(decoded.text.ends_with('\u{fffd}'));
    }

    #[test]
    fn test_fallback_fails_with_latin1_text() {
        let result = decode_with_fallback(b"nothing here", |_| None::<()>);
        assert_eq!(result.unwrap_err(), "nothing here");
    }
}
