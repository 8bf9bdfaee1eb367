use crate::schema::Violation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Unsupported content type for extension '{0}' (expected .csv, .geojson or .json)")]
    UnsupportedContentType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Raw store error: {message}")]
    Storage { message: String },

    #[error("Schema configuration error: {0}")]
    SchemaConfig(String),

    #[error("Event validation failed with {} violation(s): {}", .0.len(), render_violations(.0))]
    Validation(Vec<Violation>),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Source stream error: {0}")]
    Stream(String),
}

/// How far a failure reaches: the current unit of work, or the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

impl IngestError {
    pub fn storage(message: impl Into<String>) -> Self {
        IngestError::Storage { message: message.into() }
    }

    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Publish { topic: topic.into(), message: message.into() }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IngestError::Config(_) | IngestError::SchemaConfig(_) | IngestError::Validation(_) => {
                Severity::Fatal
            }
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            IngestError::Validation(_) => 2,
            _ => 1,
        }
    }
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, IngestError>;
