use thiserror::Error;

/// Error taxonomy shared across the control plane.
///
/// Every variant maps to an HTTP status via [`PipelineError::status_code`];
/// the server layer relies on that mapping so handlers never invent codes.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing config key '{0}'")]
    MissingConfig(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingConfig(_) | Self::UnsupportedSource(_) | Self::InvalidPayload(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Upstream(_) => 502,
            Self::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(PipelineError::MissingConfig("url".into()).status_code(), 400);
        assert_eq!(PipelineError::InvalidPayload("bad json".into()).status_code(), 400);
        assert_eq!(PipelineError::UnsupportedSource("ftp".into()).status_code(), 400);
        assert_eq!(PipelineError::Unauthorized("signature".into()).status_code(), 401);
        assert_eq!(PipelineError::Forbidden("disabled".into()).status_code(), 403);
        assert_eq!(PipelineError::NotFound("task".into()).status_code(), 404);
        assert_eq!(PipelineError::Conflict("duplicate".into()).status_code(), 409);
        assert_eq!(PipelineError::Upstream("register".into()).status_code(), 502);
        assert_eq!(PipelineError::Internal("bug".into()).status_code(), 500);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = PipelineError::MissingConfig("repo_url".into());
        assert!(err.to_string().contains("repo_url"));
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PipelineError = parse_err.into();
        assert_eq!(err.status_code(), 400);
    }
}
