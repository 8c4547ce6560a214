use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// The caller tried to reach another party's data or an admin-only tool.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Malformed or disallowed input: query text, tool name, metric, identifiers.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The text-completion provider failed, timed out or returned garbage.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "providers")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AnalyticsError {
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
