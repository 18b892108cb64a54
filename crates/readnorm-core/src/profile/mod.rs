//! Declarative extraction profiles.
//!
//! A profile is plain data: it can come from JSON on disk or from the
//! built-in definitions in [`builtin`], and both paths go through the same
//! validation before a registry accepts it.

pub mod builtin;
mod registry;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::Selector;
use crate::transform::{Pattern, Transform, MAX_ROUND_DIGITS};
use crate::value::{DataType, Value};

pub use registry::{ProfileRegistry, ProfileResolver, RegistryBuilder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_path: Selector,
    pub target_path: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_mappings: Option<Vec<FieldMapping>>,
}

impl FieldMapping {
    pub fn new(source: &str, target: &str, data_type: DataType) -> Result<Self> {
        Ok(Self {
            source_path: Selector::parse(source)?,
            target_path: target.to_string(),
            data_type,
            required: false,
            default_value: None,
            transformations: Vec::new(),
            nested_mappings: None,
        })
    }

    pub fn array(source: &str, target: &str, nested: Vec<Self>) -> Result<Self> {
        let mut mapping = Self::new(source, target, DataType::Array)?;
        mapping.nested_mappings = Some(nested);
        Ok(mapping)
    }

    pub fn object(source: &str, target: &str, nested: Vec<Self>) -> Result<Self> {
        let mut mapping = Self::new(source, target, DataType::Object)?;
        mapping.nested_mappings = Some(nested);
        Ok(mapping)
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transformations.push(transform);
        self
    }

    #[must_use]
    pub fn nested(&self) -> &[Self] {
        self.nested_mappings.as_deref().unwrap_or_default()
    }

    fn validate(&self, profile: &str, prefix: &str) -> Result<()> {
        let here = join(prefix, &self.target_path);
        if self.target_path.is_empty() || self.target_path.split('.').any(str::is_empty) {
            return Err(Error::invalid_profile(
                profile,
                format!("malformed target path '{here}'"),
            ));
        }

        if let Some(digits) = self.transformations.iter().find_map(|t| match t {
            Transform::Round { digits } if *digits > MAX_ROUND_DIGITS => Some(digits),
            _ => None,
        }) {
            return Err(Error::invalid_profile(
                profile,
                format!("'{here}' rounds to {digits} digits; at most {MAX_ROUND_DIGITS} are supported"),
            ));
        }

        match (&self.nested_mappings, self.data_type.is_container()) {
            (Some(nested), true) => {
                if nested.is_empty() {
                    return Err(Error::invalid_profile(
                        profile,
                        format!("'{here}' has an empty nested mapping list"),
                    ));
                }
                validate_level(nested, profile, &here)
            }
            (None, true) => Err(Error::invalid_profile(
                profile,
                format!("'{here}' is {} but has no nested mappings", self.data_type),
            )),
            (Some(_), false) => Err(Error::invalid_profile(
                profile,
                format!("'{here}' is {} and cannot have nested mappings", self.data_type),
            )),
            (None, false) => Ok(()),
        }
    }
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}.{path}")
    }
}

/// Sibling targets must be unique and must not shadow each other
/// (`a` alongside `a.b`).
fn validate_level(mappings: &[FieldMapping], profile: &str, prefix: &str) -> Result<()> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for mapping in mappings {
        mapping.validate(profile, prefix)?;
        let target = mapping.target_path.as_str();
        let clash = seen.iter().find(|other| {
            **other == target
                || target.starts_with(&format!("{other}."))
                || other.starts_with(&format!("{target}."))
        });
        if let Some(other) = clash {
            return Err(Error::invalid_profile(
                profile,
                format!(
                    "target '{}' conflicts with '{}'",
                    join(prefix, target),
                    join(prefix, other)
                ),
            ));
        }
        seen.insert(target);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Assertion {
    Range {
        path: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    OneOf {
        path: String,
        values: Vec<String>,
    },
    Pattern {
        path: String,
        regex: Pattern,
    },
}

impl Assertion {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Range { path, .. } | Self::OneOf { path, .. } | Self::Pattern { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub required_paths: Vec<String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// Readings sharing a key value form one cluster.
    Key,
    /// Readings within `tolerance` of a cluster centroid join it.
    #[default]
    Proximity,
    /// Key first, confirmed by position when both sides have one.
    KeyOrProximity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRule {
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<String>,
}

const fn default_tolerance() -> f64 {
    10.0
}

fn default_cluster_prefix() -> String {
    "cluster-".to_string()
}

/// Which nested mapping yields clusterable readings and how to group them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRules {
    /// Top-level array target holding one element per annotator session
    pub sessions_path: String,
    /// Array inside each session holding that annotator's readings
    pub readings_path: String,
    /// Session field naming the annotator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator_key: Option<String>,
    #[serde(default)]
    pub grouping: Grouping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionRule>,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Reading paths that get consensus statistics; empty means every
    /// numeric scalar leaf
    #[serde(default)]
    pub characteristics: Vec<String>,
    #[serde(default = "default_cluster_prefix")]
    pub cluster_id_prefix: String,
}

impl EntityRules {
    #[must_use]
    pub fn new(sessions_path: &str, readings_path: &str) -> Self {
        Self {
            sessions_path: sessions_path.to_string(),
            readings_path: readings_path.to_string(),
            annotator_key: None,
            grouping: Grouping::default(),
            key_path: None,
            position: None,
            tolerance: default_tolerance(),
            characteristics: Vec::new(),
            cluster_id_prefix: default_cluster_prefix(),
        }
    }

    fn validate(&self, profile: &str, mappings: &[FieldMapping]) -> Result<()> {
        let sessions = mappings
            .iter()
            .find(|m| m.target_path == self.sessions_path && m.data_type == DataType::Array)
            .ok_or_else(|| {
                Error::invalid_profile(
                    profile,
                    format!("entity sessions_path '{}' is not an array mapping", self.sessions_path),
                )
            })?;
        if !sessions
            .nested()
            .iter()
            .any(|m| m.target_path == self.readings_path && m.data_type == DataType::Array)
        {
            return Err(Error::invalid_profile(
                profile,
                format!(
                    "entity readings_path '{}' is not an array inside '{}'",
                    self.readings_path, self.sessions_path
                ),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::invalid_profile(
                profile,
                "entity tolerance must be a non-negative number",
            ));
        }
        match self.grouping {
            Grouping::Key if self.key_path.is_none() => Err(Error::invalid_profile(
                profile,
                "key grouping needs key_path",
            )),
            Grouping::Proximity if self.position.is_none() => Err(Error::invalid_profile(
                profile,
                "proximity grouping needs a position rule",
            )),
            Grouping::KeyOrProximity if self.key_path.is_none() && self.position.is_none() => {
                Err(Error::invalid_profile(
                    profile,
                    "key_or_proximity grouping needs key_path or position",
                ))
            }
            _ => Ok(()),
        }
    }
}

const fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Name of the dialect this profile normalizes
    pub dialect: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_rules: Option<EntityRules>,
}

impl Profile {
    #[must_use]
    pub fn new(name: &str, dialect: &str, mappings: Vec<FieldMapping>) -> Self {
        Self {
            name: name.to_string(),
            version: default_version(),
            dialect: dialect.to_string(),
            description: String::new(),
            mappings,
            validation: ValidationRules::default(),
            entity_rules: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ValidationRules) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn with_entity_rules(mut self, rules: EntityRules) -> Self {
        self.entity_rules = Some(rules);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_profile("<unnamed>", "profile name is empty"));
        }
        if self.dialect.trim().is_empty() {
            return Err(Error::invalid_profile(&self.name, "dialect is empty"));
        }
        if self.mappings.is_empty() {
            return Err(Error::invalid_profile(&self.name, "profile has no mappings"));
        }
        validate_level(&self.mappings, &self.name, "")?;

        if let Some(path) = self
            .validation
            .required_paths
            .iter()
            .map(String::as_str)
            .chain(self.validation.assertions.iter().map(Assertion::path))
            .find(|p| p.is_empty() || p.split('.').any(str::is_empty))
        {
            return Err(Error::invalid_profile(
                &self.name,
                format!("malformed validation path '{path}'"),
            ));
        }

        if let Some(rules) = &self.entity_rules {
            rules.validate(&self.name, &self.mappings)?;
        }
        Ok(())
    }

    /// Every target path the profile can produce with its type, nested
    /// levels joined with dots (array elements are not indexed).
    #[must_use]
    pub fn target_paths(&self) -> BTreeMap<String, DataType> {
        fn walk(mappings: &[FieldMapping], prefix: &str, out: &mut BTreeMap<String, DataType>) {
            for m in mappings {
                let here = join(prefix, &m.target_path);
                walk(m.nested(), &here, out);
                out.insert(here, m.data_type);
            }
        }
        let mut out = BTreeMap::new();
        walk(&self.mappings, "", &mut out);
        out
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }
}
