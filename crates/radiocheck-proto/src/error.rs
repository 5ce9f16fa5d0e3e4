use thiserror::Error;

/// Why an adapter produced no data. Never crosses the adapter boundary:
/// each variant is logged at debug level and turned into "no data".
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("timed out")]
    Timeout,

    #[error("page structure missing: {0}")]
    MissingStructure(&'static str),

    #[error("no icy-metaint header")]
    NoMetaInt,

    #[error("invalid icy-metaint: {0}")]
    InvalidMetaInt(String),

    #[error("stream ended before a metadata block")]
    StreamEnded,

    #[error("no metadata within {0} chunks")]
    ChunkCeiling(usize),

    #[error("advertisement: {0}")]
    Advertisement(String),
}

/// Failure talking to the match sink. The caller logs it and carries on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("setting is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
