use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid hardware manager URL: {0}")]
    Url(String),

    #[error("request to hardware manager failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("unexpected response to {operation}: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("resource group {0} already exists")]
    AlreadyExists(String),

    #[error("resource group {group} does not match request: {reason}")]
    Mismatch { group: String, reason: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}
