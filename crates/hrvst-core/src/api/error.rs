use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - access token rejected or expired")]
    Unauthorized,

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing access token")]
    MissingAccessToken,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            code => ApiError::Status {
                status: code,
                body: Self::truncate_body(body),
            },
        }
    }

    /// HTTP status carried by this error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_unauthorized() {
        let err = ApiError::from_status(reqwest::StatusCode::UNAUTHORIZED, "nope");
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_from_status_keeps_code() {
        let err = ApiError::from_status(reqwest::StatusCode::FORBIDDEN, "denied");
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_truncate_body() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let err = ApiError::from_status(reqwest::StatusCode::BAD_GATEWAY, &body);
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 502);
                assert!(body.contains("truncated"));
                assert!(body.len() < MAX_ERROR_BODY_LENGTH + 60);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
