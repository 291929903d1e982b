//! Client error types

/// Error type for client SDK operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server returned error: code={code}, message={message}")]
    ServerError { code: i32, message: String },

    #[error("connection not ready")]
    NotConnected,

    #[error("request timeout")]
    Timeout,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no available instance: {0}")]
    NoAvailableInstance(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn server(code: i32, message: &str) -> Self {
        ClientError::ServerError {
            code,
            message: message.to_string(),
        }
    }

    /// The server error code, if this is a server-side rejection.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            ClientError::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::NotConnected;
        assert_eq!(err.to_string(), "connection not ready");

        let err = ClientError::server(20005, "resource conflict");
        assert_eq!(
            err.to_string(),
            "server returned error: code=20005, message=resource conflict"
        );
        assert_eq!(err.server_code(), Some(20005));
    }
}
