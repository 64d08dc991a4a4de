/// Errors raised by the store.
///
/// Write operations fail fast with one of these; there is no retry inside
/// the store itself. Callers (the Supervisor, the Observation API) decide
/// whether a failure is fatal to the session.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("dataset encoding error: {0}")]
    Encoding(#[from] serde_cbor::Error),

    #[error("unrecognized schema version {version}")]
    Schema { version: f64 },

    #[error("write attempted on a read-only session")]
    ReadOnly,

    #[error("metadata not supported in currently opened database (version {version} predates v4)")]
    MetadataUnsupported { version: f64 },

    #[error("figures not supported in currently opened database (version {version} predates v4.1)")]
    FiguresUnsupported { version: f64 },

    #[error("dataset '{0}' has no recorded samples")]
    EmptyDataset(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
