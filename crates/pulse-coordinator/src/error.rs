use thiserror::Error;

/// Error taxonomy for the live-interaction path. Every variant maps to a
/// stable wire code reported to the originating session; none of them ever
/// tears down the connection.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    State(String),

    /// Re-voting an option the user already holds.
    #[error("you have already voted for this option")]
    DuplicateVote,

    /// Persistence failure. Logged and surfaced generically; the coordinator
    /// performs no retries.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CoordinatorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Authorization(_) => "authorization_error",
            Self::State(_) => "state_error",
            Self::DuplicateVote => "duplicate_vote",
            Self::Storage(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
