use thiserror::Error;

/// Failures surfaced by the client core.
///
/// Setup code (database bootstrap, settings files, the binary) keeps using
/// `anyhow`; everything a view or the composition root can observe at runtime
/// resolves to one of these variants.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error("credential storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("live connection accessed before start()")]
    NotInitialized,

    #[error("stream transport failed: {0}")]
    Transport(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("request rejected as unauthorized")]
    Unauthorized,

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("malformed payload: {0}")]
    Decode(String),
}

impl MonitorError {
    /// 401 is the only server-driven trigger for a forced logout.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, MonitorError::Unauthorized)
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            return Self::Decode(value.to_string());
        }
        match value.status() {
            Some(status) if status.as_u16() == 401 => Self::Unauthorized,
            Some(status) => Self::Http {
                status: status.as_u16(),
            },
            None => Self::Transport(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
