use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No dialect matched document")]
    NoDialectMatched,

    #[error("No profile registered for dialect: {0}")]
    NoProfileForDialect(String),

    #[error("Invalid profile {profile}: {reason}")]
    InvalidProfile { profile: String, reason: String },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn invalid_profile(profile: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            profile: profile.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<roxmltree::Error> for Error {
    fn from(e: roxmltree::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
