use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FusionError {
    /// Empty result list, empty method identifier, non-finite confidence.
    InvalidInput(String),
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad weight, threshold out of range, etc.).
    ConfigValidation(String),
    /// CSV or JSON ingestion error.
    Parse { format: &'static str, message: String },
    /// IO error (file read, etc.).
    Io(String),
}

impl FusionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn csv(msg: impl fmt::Display) -> Self {
        Self::Parse {
            format: "csv",
            message: msg.to_string(),
        }
    }

    pub(crate) fn json(msg: impl fmt::Display) -> Self {
        Self::Parse {
            format: "json",
            message: msg.to_string(),
        }
    }
}

impl fmt::Display for FusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::Parse { format, message } => write!(f, "{format} parse error: {message}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for FusionError {}
