use std::io;
use std::string::FromUtf8Error;
use std::time::Duration;
use thiserror::Error;

/// Rejections produced before anything is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid value for {}", .0.join(", "))]
    InvalidParameters(Vec<&'static str>),
    #[error("missing code")]
    MissingCode,
    #[error("request body must be a JSON object")]
    MalformedBody,
}

impl ValidationError {
    /// Keys rejected by the whitelist, in validation order.
    pub fn keys(&self) -> &[&'static str] {
        match self {
            ValidationError::InvalidParameters(keys) => keys,
            _ => &[],
        }
    }
}

/// Failures of the sandbox itself. A tool that ran and exited non-zero is not
/// one of these.
#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("process execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("tool diagnostics are not valid UTF-8: {0}")]
    InvalidDiagnostics(#[from] FromUtf8Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid syntax definition: {0}")]
    Syntax(#[from] syntect::parsing::ParseSyntaxError),
    #[error("execution task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, PlaygroundError>;
