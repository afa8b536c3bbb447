//! Error taxonomy for the import pipeline
//!
//! Two tiers:
//! - `ImportError` aborts the import and is reported to the caller
//! - `SkipReason` drops a single row and is only counted / reported in diagnostics

use std::fmt;

/// Fatal import failures. Display text is the Portuguese message shown to users.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Nenhum arquivo enviado")]
    NoFile,

    /// A file was named but could not be read
    #[error("Leitura do arquivo falhou: {0}")]
    ReadFailed(String),

    #[error(
        "Cabeçalho não encontrado. Verifique se o arquivo tem as colunas 'PV'/'Número' e 'Cliente'.\nPrimeiras linhas:\n{snippet}"
    )]
    HeaderNotFound { snippet: String },

    /// Persistence failed in a way that invalidates the whole import
    #[error("{0}")]
    Persistence(String),
}

impl ImportError {
    pub fn persistence(err: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain on one line
        ImportError::Persistence(format!("{:#}", err))
    }
}

/// Why a data row was left out of the import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingKey,
    /// Key contains `/`, almost always a date shifted into the key column
    KeyLooksLikeDate,
    KeyTooLong,
    /// Same key already seen earlier in the file
    DuplicateKey,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingKey => "missing_key",
            SkipReason::KeyLooksLikeDate => "key_looks_like_date",
            SkipReason::KeyTooLong => "key_too_long",
            SkipReason::DuplicateKey => "duplicate_key",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
