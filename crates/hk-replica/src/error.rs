use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),
    /// The request never produced an HTTP response.
    #[error("{message}")]
    Transport { message: String, online: bool },
    #[error("Server responded {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Integrity error: {0}")]
    Integrity(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn transport(online: bool) -> Self {
        let message = if online {
            "The server could not be reached. Please try again later."
        } else {
            "No network connection."
        };
        AppError::Transport {
            message: message.to_string(),
            online,
        }
    }

    /// The server answered and refused the request for reasons other than
    /// credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AppError::Http { .. } | AppError::NotFound(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_message_depends_on_network() {
        assert_eq!(
            AppError::transport(false).to_string(),
            "No network connection."
        );
        assert!(AppError::transport(true)
            .to_string()
            .contains("could not be reached"));
    }

    #[test]
    fn rejections_exclude_transport_and_credentials() {
        assert!(AppError::Http {
            status: 500,
            message: "boom".into()
        }
        .is_rejection());
        assert!(AppError::NotFound("task 3".into()).is_rejection());
        assert!(!AppError::Unauthorized("expired".into()).is_rejection());
        assert!(!AppError::transport(true).is_rejection());
    }
}
