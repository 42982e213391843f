use std::time::Duration;

/// Core error type for the commenter diff bot.
///
/// Adapter crates map their transport/API errors into this type so the state
/// machine can turn any failure into a user-facing outcome.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid post reference: {0}")]
    InvalidReference(String),

    /// Upstream rejected the call for quota reasons (HTTP 429).
    #[error("quota exceeded{}", retry_hint(.retry_after))]
    QuotaExceeded { retry_after: Option<Duration> },

    /// Upstream answered without data and without a result count.
    #[error("empty response from content source: {0}")]
    EmptyResponse(String),

    #[error("failed to fetch commenters: {0}")]
    CollectionFailure(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl Error {
    /// Quota rejections are the only failures worth a delayed retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::QuotaExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
