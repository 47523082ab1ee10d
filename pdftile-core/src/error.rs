use thiserror::Error;

/// Failure to open a document source.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("document is encrypted and a password is required")]
    PasswordRequired,
    #[error("the supplied password was rejected")]
    InvalidPassword,
    #[error("failed to open document: {source}")]
    Document {
        #[source]
        source: anyhow::Error,
    },
}

impl OpenError {
    pub fn document(source: impl Into<anyhow::Error>) -> Self {
        Self::Document {
            source: source.into(),
        }
    }

    /// Whether the caller may retry the open with different credentials.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PasswordRequired | Self::InvalidPassword)
    }
}

#[derive(Debug, Clone, Error)]
#[error("page {page} could not be rendered: {reason}")]
pub struct PageRenderingError {
    pub page: usize,
    pub reason: String,
}

impl PageRenderingError {
    pub fn new(page: usize, reason: impl Into<String>) -> Self {
        Self {
            page,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot allocate a {width}x{height} bitmap")]
pub struct BitmapAllocationError {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised synchronously by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no document is loaded")]
    NotLoaded,
    #[error("render worker could not be started: {0}")]
    Worker(#[source] std::io::Error),
}
