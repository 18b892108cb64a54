//! Ordered value transforms applied between extraction and coercion.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CoercionConfig;
use crate::error::Error;
use crate::value::{parse_date, parse_datetime, Value};

/// A compiled regular expression that serializes as its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, Error> {
        Ok(Self(Regex::new(source)?))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub const fn regex(&self) -> &Regex {
        &self.0
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        Self::new(&s)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_group() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    Trim,
    CollapseWhitespace,
    Lowercase,
    Uppercase,
    RegexExtract {
        pattern: Pattern,
        #[serde(default = "default_group")]
        group: usize,
    },
    Replace {
        pattern: Pattern,
        with: String,
    },
    /// Empty `formats` falls back to the configured date formats.
    ParseDate {
        #[serde(default)]
        formats: Vec<String>,
    },
    ParseDatetime {
        #[serde(default)]
        formats: Vec<String>,
    },
    ToNumber,
    Round {
        digits: u32,
    },
    Concat {
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
    },
}

/// Rounding past this many fractional digits exceeds `f64` precision.
pub const MAX_ROUND_DIGITS: u32 = 15;

impl Transform {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Trim => "trim",
            Self::CollapseWhitespace => "collapse_whitespace",
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
            Self::RegexExtract { .. } => "regex_extract",
            Self::Replace { .. } => "replace",
            Self::ParseDate { .. } => "parse_date",
            Self::ParseDatetime { .. } => "parse_datetime",
            Self::ToNumber => "to_number",
            Self::Round { .. } => "round",
            Self::Concat { .. } => "concat",
        }
    }

    pub fn apply(&self, value: Value, cfg: &CoercionConfig) -> Result<Value, TransformError> {
        if value.is_empty() {
            return Ok(value);
        }

        match self {
            Self::Trim => self.map_text(&value, |t| t.trim().to_string()),
            Self::CollapseWhitespace => {
                self.map_text(&value, |t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            }
            Self::Lowercase => self.map_text(&value, str::to_lowercase),
            Self::Uppercase => self.map_text(&value, str::to_uppercase),
            Self::Concat { prefix, suffix } => {
                self.map_text(&value, |t| format!("{prefix}{t}{suffix}"))
            }
            Self::Replace { pattern, with } => self.map_text(&value, |t| {
                pattern.regex().replace_all(t, with.as_str()).into_owned()
            }),
            Self::RegexExtract { pattern, group } => {
                let text = self.text_of(&value)?;
                let caps = pattern
                    .regex()
                    .captures(&text)
                    .ok_or_else(|| TransformError::NoMatch {
                        pattern: pattern.to_string(),
                        input: text.clone(),
                    })?;
                let m = caps.get(*group).ok_or(TransformError::MissingGroup {
                    group: *group,
                    pattern: pattern.to_string(),
                })?;
                Ok(Value::String(m.as_str().to_string()))
            }
            Self::ParseDate { formats } => match value {
                Value::Date(_) => Ok(value),
                Value::DateTime(dt) => Ok(Value::Date(dt.date())),
                other => {
                    let text = self.text_of(&other)?;
                    let formats = if formats.is_empty() {
                        &cfg.date_formats
                    } else {
                        formats
                    };
                    parse_date(&text, formats)
                        .map(Value::Date)
                        .ok_or(TransformError::Unparseable {
                            transform: self.name(),
                            input: text,
                        })
                }
            },
            Self::ParseDatetime { formats } => match value {
                Value::DateTime(_) => Ok(value),
                other => {
                    let text = self.text_of(&other)?;
                    let formats = if formats.is_empty() {
                        &cfg.datetime_formats
                    } else {
                        formats
                    };
                    parse_datetime(&text, formats)
                        .map(Value::DateTime)
                        .ok_or(TransformError::Unparseable {
                            transform: self.name(),
                            input: text,
                        })
                }
            },
            Self::ToNumber => match value {
                Value::Integer(_) | Value::Float(_) => Ok(value),
                other => {
                    let text = self.text_of(&other)?;
                    let trimmed = text.trim();
                    if let Ok(i) = trimmed.parse::<i64>() {
                        return Ok(Value::Integer(i));
                    }
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Value::Float)
                        .ok_or(TransformError::NotNumeric { input: text })
                }
            },
            Self::Round { digits } => {
                let number = match value {
                    Value::Integer(_) => return Ok(value),
                    Value::Float(f) => f,
                    ref other => {
                        let text = self.text_of(other)?;
                        text.trim()
                            .parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite())
                            .ok_or(TransformError::NotNumeric { input: text })?
                    }
                };
                let digits = (*digits).min(MAX_ROUND_DIGITS);
                let scale = 10f64.powi(i32::try_from(digits).unwrap_or_default());
                let scaled = number * scale;
                if !scaled.is_finite() {
                    // already coarser than the requested precision
                    return Ok(Value::Float(number));
                }
                Ok(Value::Float(scaled.round() / scale))
            }
        }
    }

    fn text_of(&self, value: &Value) -> Result<String, TransformError> {
        value
            .as_text()
            .map(std::borrow::Cow::into_owned)
            .ok_or(TransformError::NotScalar {
                transform: self.name(),
                found: value.type_name(),
            })
    }

    fn map_text(&self, value: &Value, f: impl FnOnce(&str) -> String) -> Result<Value, TransformError> {
        let text = self.text_of(value)?;
        Ok(Value::String(f(&text)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("pattern /{pattern}/ did not match '{input}'")]
    NoMatch { pattern: String, input: String },
    #[error("pattern /{pattern}/ has no capture group {group}")]
    MissingGroup { group: usize, pattern: String },
    #[error("{transform}: cannot parse '{input}'")]
    Unparseable {
        transform: &'static str,
        input: String,
    },
    #[error("'{input}' is not numeric")]
    NotNumeric { input: String },
    #[error("{transform}: expected a scalar, found {found}")]
    NotScalar {
        transform: &'static str,
        found: &'static str,
    },
}

/// Which step of a pipeline rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transform #{step} ({name}) failed: {error}")]
pub struct TransformFailure {
    pub step: usize,
    pub name: &'static str,
    pub error: TransformError,
}

/// Applies `transforms` in exactly the given order. The first failure aborts
/// the pipeline for this value.
pub fn apply(
    value: Value,
    transforms: &[Transform],
    cfg: &CoercionConfig,
) -> Result<Value, TransformFailure> {
    transforms
        .iter()
        .enumerate()
        .try_fold(value, |acc, (step, t)| {
            t.apply(acc, cfg).map_err(|error| TransformFailure {
                step,
                name: t.name(),
                error,
            })
        })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn run(value: &str, transforms: &[Transform]) -> Result<Value, TransformFailure> {
        apply(
            Value::String(value.to_string()),
            transforms,
            &CoercionConfig::default(),
        )
    }

    fn pattern(p: &str) -> Pattern {
        Pattern::new(p).unwrap()
    }

    #[test]
    fn order_is_respected() {
        let upper_then_concat = run(
            " ab ",
            &[
                Transform::Trim,
                Transform::Uppercase,
                Transform::Concat {
                    prefix: "<".into(),
                    suffix: "x>".into(),
                },
            ],
        )
        .unwrap();
        assert_eq!(upper_then_concat, Value::String("<ABx>".into()));

        let concat_then_upper = run(
            " ab ",
            &[
                Transform::Trim,
                Transform::Concat {
                    prefix: "<".into(),
                    suffix: "x>".into(),
                },
                Transform::Uppercase,
            ],
        )
        .unwrap();
        assert_eq!(concat_then_upper, Value::String("<ABX>".into()));
    }

    #[test]
    fn regex_extract_group() {
        let out = run(
            "Nodule 007",
            &[Transform::RegexExtract {
                pattern: pattern(r"Nodule\s+(\d+)"),
                group: 1,
            }],
        )
        .unwrap();
        assert_eq!(out, Value::String("007".into()));
    }

    #[test]
    fn regex_without_match_fails_at_its_step() {
        let err = run(
            "none",
            &[
                Transform::Trim,
                Transform::RegexExtract {
                    pattern: pattern(r"(\d+)"),
                    group: 1,
                },
                Transform::Uppercase,
            ],
        )
        .unwrap_err();
        assert_eq!(err.step, 1);
        assert_eq!(err.name, "regex_extract");
        assert!(matches!(err.error, TransformError::NoMatch { .. }));
    }

    #[test]
    fn parse_date_uses_given_formats_then_defaults() {
        let out = run(
            "03/02/2001",
            &[Transform::ParseDate {
                formats: vec!["%d/%m/%Y".into()],
            }],
        )
        .unwrap();
        assert_eq!(out, Value::Date(NaiveDate::from_ymd_opt(2001, 2, 3).unwrap()));

        let out = run("20010203", &[Transform::ParseDate { formats: vec![] }]).unwrap();
        assert_eq!(out, Value::Date(NaiveDate::from_ymd_opt(2001, 2, 3).unwrap()));

        assert!(run("not a date", &[Transform::ParseDate { formats: vec![] }]).is_err());
    }

    #[test]
    fn numbers_and_rounding() {
        assert_eq!(run("42", &[Transform::ToNumber]).unwrap(), Value::Integer(42));
        assert_eq!(run("4.25", &[Transform::ToNumber]).unwrap(), Value::Float(4.25));
        assert_eq!(
            run("2.346", &[Transform::Round { digits: 2 }]).unwrap(),
            Value::Float(2.35)
        );
        assert!(run("x", &[Transform::ToNumber]).is_err());
    }

    #[test]
    fn round_stays_finite_for_extreme_inputs() {
        assert_eq!(
            run("2.5", &[Transform::Round { digits: 400 }]).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            run("1e300", &[Transform::Round { digits: 15 }]).unwrap(),
            Value::Float(1e300)
        );
    }

    #[test]
    fn replace_and_collapse() {
        let out = run(
            "a   b\t c",
            &[
                Transform::CollapseWhitespace,
                Transform::Replace {
                    pattern: pattern(" "),
                    with: "_".into(),
                },
            ],
        )
        .unwrap();
        assert_eq!(out, Value::String("a_b_c".into()));
    }

    #[test]
    fn empty_passes_through() {
        let out = apply(Value::Empty, &[Transform::ToNumber], &CoercionConfig::default()).unwrap();
        assert_eq!(out, Value::Empty);
    }

    #[test]
    fn deserializes_tagged_transforms() {
        let parsed: Vec<Transform> = serde_json::from_str(
            r#"[{"kind": "trim"}, {"kind": "regex_extract", "pattern": "(\\d+)"}, {"kind": "round", "digits": 1}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0], Transform::Trim);
        assert_eq!(
            parsed[1],
            Transform::RegexExtract {
                pattern: pattern(r"(\d+)"),
                group: 1
            }
        );
        assert!(serde_json::from_str::<Transform>(r#"{"kind": "regex_extract", "pattern": "("}"#).is_err());
    }
}
