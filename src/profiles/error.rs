//! Error types for the profile store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document store error: {0}")]
    Backend(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to read credentials file: {0}")]
    CredentialsFile(#[from] std::io::Error),

    #[error("Failed to parse payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ProfileError {
    /// True when the target document does not exist; write paths use this
    /// to fall back to creating it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProfileError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_not_found() {
        assert!(ProfileError::NotFound("users/u1".into()).is_not_found());
        assert!(!ProfileError::Backend("NOT_FOUND".into()).is_not_found());
        assert!(!ProfileError::Validation("empty".into()).is_not_found());
    }

    #[test]
    fn io_errors_convert_into_credentials_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing key file");
        let err: ProfileError = io.into();
        assert!(matches!(err, ProfileError::CredentialsFile(_)));
        assert!(err.to_string().contains("missing key file"));
    }
}
