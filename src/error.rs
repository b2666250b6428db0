use thiserror::Error;

/// Errors surfaced by the optimizers, the spectral extractor and the
/// request layer around them.
#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Need at least {required} samples for spectral features, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PortfolioError {
    /// Type name reported to callers in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            PortfolioError::InsufficientData { .. } => "InsufficientDataError",
            PortfolioError::ShapeMismatch(_) => "ShapeMismatchError",
            PortfolioError::InvalidParameter { .. } => "InvalidParameterError",
            PortfolioError::InvalidInput(_) => "InvalidInputError",
            PortfolioError::Config(_) => "ConfigError",
            PortfolioError::Io(_) => "IoError",
            PortfolioError::Json(_) => "JsonError",
        }
    }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
