use thiserror::Error;

use studyroom_api::ApiError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("identity backend is not configured")]
    NotConfigured,

    #[error("{0}")]
    InvalidInput(&'static str),

    #[error(transparent)]
    Backend(#[from] ApiError),
}

/// Which step of ending a session failed. Both leave the room untouched and
/// the controller ready for another attempt.
#[derive(Debug, Error)]
pub enum EndSessionError {
    #[error("session is already being ended")]
    Busy,

    #[error("failed to generate session analysis: {0}")]
    Generate(#[source] ApiError),

    #[error("failed to save session analysis: {0}")]
    Save(#[source] ApiError),
}

impl EndSessionError {
    /// Blocking alert text for the user.
    pub fn alert(&self) -> &'static str {
        match self {
            Self::Busy => "The session is already being finalized.",
            Self::Generate(_) | Self::Save(_) => {
                "Failed to generate summary. Please make sure the AI service is configured."
            }
        }
    }
}
