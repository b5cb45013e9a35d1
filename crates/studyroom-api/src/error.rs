use thiserror::Error;

/// Longest slice of an error body kept for diagnostics.
const BODY_SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server answered 2xx but refused the operation in its payload.
    #[error("{0}")]
    Rejected(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("not signed in")]
    Unauthenticated,
}

impl ApiError {
    pub fn status(status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let body = text.chars().take(BODY_SNIPPET_LEN).collect();
        Self::Status { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_is_truncated() {
        let body = "x".repeat(1000);
        match ApiError::status(500, body.as_bytes()) {
            ApiError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), BODY_SNIPPET_LEN);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
