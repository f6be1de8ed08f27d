use thiserror::Error;

/// Failure of a single fetch attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),
}

impl TransportError {
    /// Whether another attempt at the same URL could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(e) => !e.is_builder(),
            TransportError::Status(code) => {
                *code >= 500 || *code == 408 || *code == 429
            }
        }
    }
}

/// Retry budget exhausted (or a non-retryable failure) for one URL.
#[derive(Debug, Error)]
#[error("giving up on {url} after {attempts} attempt(s): {last}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    #[source]
    pub last: TransportError,
}

/// The page layout does not match the schema at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no <{tag} id=\"{id}\"> container on page")]
    MissingContainer { tag: &'static str, id: &'static str },

    #[error("expected table #{index} matching {attrs:?}, page has {found} such table(s)")]
    MissingTable {
        index: usize,
        attrs: &'static [(&'static str, &'static str)],
        found: usize,
    },
}

/// A single row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("expected {expected} cells, found {found}")]
    TooFewCells { expected: usize, found: usize },

    #[error("empty {0} cell")]
    EmptyField(&'static str),

    #[error("no link in {0} cell")]
    MissingLink(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("first page must be at least 1 (got {0})")]
    FirstPageZero(u32),

    #[error("first page {first} is after last page {last}")]
    InvertedRange { first: u32, last: u32 },

    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("base url must be an absolute http(s) URL (got {0:?})")]
    BaseUrl(String),

    #[error("invalid settings: {0}")]
    Load(String),
}
