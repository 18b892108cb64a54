pub mod classify;
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod normalize;
pub mod path;
pub mod pipeline;
pub mod profile;
pub mod project;
pub mod transform;
pub mod value;

pub use classify::{
    Check, Classification, ClassifierConfig, DialectClassifier, DialectSignature,
    DocumentSignals, SignalConfig,
};
pub use config::{CoercionConfig, EngineConfig, ProjectionConfig};
pub use document::{Element, RawDocument};
pub use entity::{Consensus, EntityCluster, EntityExtractor, Reading};
pub use error::{Error, Result};
pub use normalize::{
    CanonicalDocument, DocumentMetadata, NormalizationEngine, Severity, Warning, WarningKind,
};
pub use path::{Match, PathExtractor, Selector};
pub use pipeline::{BatchResult, Outcome, Pipeline, QualityReport};
pub use profile::{
    Assertion, EntityRules, FieldMapping, Grouping, PositionRule, Profile, ProfileRegistry,
    ProfileResolver, RegistryBuilder, ValidationRules,
};
pub use project::{final_records, regroup, Cell, FlatRecord, LegacyProjector, LegacySchema};
pub use transform::{Pattern, Transform, TransformError, TransformFailure};
pub use value::{DataType, Object, Value};
