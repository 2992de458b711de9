use thiserror::Error;

/// Errors surfaced by upstream fetches.
///
/// Cache probe and write failures are deliberately not represented here:
/// they are swallowed at the tier that produced them and degrade to a miss.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("rate limited by upstream API")]
    RateLimited,

    #[error("upstream API returned {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("failed to fetch from upstream API: {0}")]
    Transport(String),
}

impl UpstreamError {
    /// Create a new Status error from an HTTP status code and reason phrase.
    pub fn status(status: u16, reason: impl Into<String>) -> Self {
        Self::Status {
            status,
            reason: reason.into(),
        }
    }

    /// Create a new Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Check if the failure came from the upstream's own throttling.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Convenience result type for upstream fetches.
pub type Result<T> = std::result::Result<T, UpstreamError>;
