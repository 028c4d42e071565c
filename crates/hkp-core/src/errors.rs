/// Core error type for the hitokoto runtime.
///
/// Adapter crates should map their specific errors into this type so the
/// service can tell user-correctable failures from retryable ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sentence fetch failed: {0}")]
    TransientFetch(String),

    #[error("malformed sentence response: {0}")]
    MalformedResponse(String),

    #[error("cooling down, retry in {remaining_secs:.1}s")]
    RateLimited { remaining_secs: f64 },

    #[error("no recent sentence to favorite")]
    NoRecentSentence,

    #[error("sentence is already in favorites")]
    AlreadyFavorited,

    #[error("favorites are full ({max} max)")]
    QuotaExceeded { max: usize },

    #[error("invalid page {page}, valid range is 1-{total_pages}")]
    InvalidPage { page: usize, total_pages: usize },

    #[error("invalid index {index}, valid range is 1-{len}")]
    InvalidIndex { index: usize, len: usize },

    #[error("access denied")]
    AccessDenied,

    #[error("cache warmup already running")]
    WarmupInProgress,

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Only network-level fetch failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientFetch(_))
    }

    /// Errors the end user can correct; their message is shown verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. }
                | Error::NoRecentSentence
                | Error::AlreadyFavorited
                | Error::QuotaExceeded { .. }
                | Error::InvalidPage { .. }
                | Error::InvalidIndex { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
