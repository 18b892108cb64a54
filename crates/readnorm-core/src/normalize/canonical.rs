use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityCluster;
use crate::value::Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    FieldExtraction,
    Transformation,
    TypeCoercion,
    Validation,
    EntityClusteringAmbiguity,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FieldExtraction => "field_extraction",
            Self::Transformation => "transformation",
            Self::TypeCoercion => "type_coercion",
            Self::Validation => "validation",
            Self::EntityClusteringAmbiguity => "entity_clustering_ambiguity",
        })
    }
}

/// A field-scoped problem that did not stop normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub target_path: String,
    pub severity: Severity,
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(
        kind: WarningKind,
        severity: Severity,
        target_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            severity,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {}: {}",
            self.severity, self.kind, self.target_path, self.message
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub dialect: String,
    pub profile: String,
    pub profile_version: u32,
    /// Values mapped to `metadata.*` targets
    #[serde(default)]
    pub header: Object,
}

/// The normalized form of one input document. Only the engine builds one;
/// afterwards it is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    metadata: DocumentMetadata,
    fields: Object,
    entities: Vec<EntityCluster>,
    warnings: Vec<Warning>,
}

impl CanonicalDocument {
    #[must_use]
    pub const fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    #[must_use]
    pub const fn fields(&self) -> &Object {
        &self.fields
    }

    #[must_use]
    pub fn entities(&self) -> &[EntityCluster] {
        &self.entities
    }

    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.document_id
    }
}

/// Mutable accumulator the engine fills before freezing.
#[derive(Debug, Default)]
pub(crate) struct DocumentBuilder {
    pub metadata: DocumentMetadata,
    pub fields: Object,
    pub entities: Vec<EntityCluster>,
    pub warnings: Vec<Warning>,
}

impl DocumentBuilder {
    pub fn new(metadata: DocumentMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn freeze(self) -> CanonicalDocument {
        CanonicalDocument {
            metadata: self.metadata,
            fields: self.fields,
            entities: self.entities,
            warnings: self.warnings,
        }
    }
}
