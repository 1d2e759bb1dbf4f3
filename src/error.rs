use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("duplicate schema version: {kind} v{version}")]
    DuplicateVersion { kind: String, version: u32 },

    #[error("malformed batch envelope: {0}")]
    MalformedEnvelope(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// Stable label used on failure metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::UnknownSchema(_) => "unknown_schema",
            PipelineError::DuplicateVersion { .. } => "duplicate_version",
            PipelineError::MalformedEnvelope(_) => "malformed_envelope",
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
            PipelineError::Toml(_) => "toml",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
