use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Token used in a datetime format list to request RFC 3339 parsing.
pub const RFC3339: &str = "rfc3339";

/// How extracted text is coerced into typed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoercionConfig {
    /// Tried in order, first success wins
    pub date_formats: Vec<String>,
    /// Tried in order; `rfc3339` selects RFC 3339 parsing
    pub datetime_formats: Vec<String>,
    /// Case-insensitive
    pub true_tokens: Vec<String>,
    /// Case-insensitive
    pub false_tokens: Vec<String>,
}

impl Default for CoercionConfig {
    fn default() -> Self {
        Self {
            date_formats: ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"]
                .map(String::from)
                .to_vec(),
            datetime_formats: [
                RFC3339,
                "%Y-%m-%dT%H:%M:%S",
                "%Y-%m-%d %H:%M:%S",
                "%Y%m%d%H%M%S",
                "%Y%m%d %H%M%S",
            ]
            .map(String::from)
            .to_vec(),
            true_tokens: ["true", "yes", "y", "t", "1", "on"].map(String::from).to_vec(),
            false_tokens: ["false", "no", "n", "f", "0", "off"].map(String::from).to_vec(),
        }
    }
}

impl CoercionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.date_formats.is_empty() {
            return Err(Error::Config("date_formats must not be empty".into()));
        }
        if self.datetime_formats.is_empty() {
            return Err(Error::Config("datetime_formats must not be empty".into()));
        }
        if let Some(shared) = self
            .true_tokens
            .iter()
            .find(|t| self.false_tokens.iter().any(|f| f.eq_ignore_ascii_case(t)))
        {
            return Err(Error::Config(format!(
                "boolean token '{shared}' is both true and false"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn parse_bool(&self, text: &str) -> Option<bool> {
        let text = text.trim();
        if self.true_tokens.iter().any(|t| t.eq_ignore_ascii_case(text)) {
            Some(true)
        } else if self.false_tokens.iter().any(|t| t.eq_ignore_ascii_case(text)) {
            Some(false)
        } else {
            None
        }
    }
}

/// Text markers used when flat records are rendered as plain cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// The dialect does not define the field
    pub absent_marker: String,
    /// The field is defined but was left blank
    pub empty_marker: String,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            absent_marker: "#N/A".to_string(),
            empty_marker: "MISSING".to_string(),
        }
    }
}

impl ProjectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.absent_marker.is_empty() || self.empty_marker.is_empty() {
            return Err(Error::Config("sentinel markers must not be empty".into()));
        }
        if self.absent_marker == self.empty_marker {
            return Err(Error::Config(format!(
                "absent and empty markers must differ (both '{}')",
                self.absent_marker
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub coercion: CoercionConfig,
    pub projection: ProjectionConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.coercion.validate()?;
        self.projection.validate()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads TOML for `.toml` files and JSON for anything else.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }
}
