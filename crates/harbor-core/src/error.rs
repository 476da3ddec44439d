use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Data handle {0} is open read only")]
    ReadOnlyViolation(String),

    #[error("Partial write for {0}: {1}")]
    PartialWrite(String, String),

    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Invalid id: {0:?}")]
    InvalidId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable tag, used in job records and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::UnknownPlugin(_) => "unknown_plugin",
            Error::Inference(_) => "inference",
            Error::VectorStore(_) => "vector_store",
            Error::NotFound(_) => "not_found",
            Error::ReadOnlyViolation(_) => "read_only",
            Error::PartialWrite(_, _) => "partial_write",
            Error::DuplicateField(_) => "duplicate_field",
            Error::InvalidId(_) => "invalid_id",
            Error::Io(_) => "io",
            Error::Serde(_) => "serde",
        }
    }

    pub fn vector_store(e: impl std::fmt::Display) -> Self {
        Error::VectorStore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
