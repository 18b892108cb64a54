use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::classify::{self, Classification, DialectClassifier};
use crate::config::EngineConfig;
use crate::document::RawDocument;
use crate::error::{Error, Result};
use crate::normalize::{CanonicalDocument, NormalizationEngine, Severity, WarningKind};
use crate::profile::{self, ProfileResolver};
use crate::project::{FlatRecord, LegacyProjector, LegacySchema};

#[derive(Debug)]
pub enum Outcome {
    Processed {
        document: CanonicalDocument,
        records: Vec<FlatRecord>,
    },
    /// Parsed and classified, but without a readable session.
    NoData { document_id: String },
}

impl Outcome {
    #[must_use]
    pub fn document_id(&self) -> &str {
        match self {
            Self::Processed { document, .. } => document.id(),
            Self::NoData { document_id } => document_id,
        }
    }

    #[must_use]
    pub fn records(&self) -> &[FlatRecord] {
        match self {
            Self::Processed { records, .. } => records,
            Self::NoData { .. } => &[],
        }
    }

    #[must_use]
    pub const fn document(&self) -> Option<&CanonicalDocument> {
        match self {
            Self::Processed { document, .. } => Some(document),
            Self::NoData { .. } => None,
        }
    }
}

/// Warning counts across a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub documents: usize,
    pub no_data: usize,
    pub failed: usize,
    pub records: usize,
    pub by_kind: BTreeMap<WarningKind, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Keyed by target path with array indices removed
    pub by_path: BTreeMap<String, usize>,
}

impl QualityReport {
    fn add_document(&mut self, document: &CanonicalDocument, records: usize) {
        self.documents += 1;
        self.records += records;
        for warning in document.warnings() {
            *self.by_kind.entry(warning.kind).or_default() += 1;
            *self.by_severity.entry(warning.severity).or_default() += 1;
            *self
                .by_path
                .entry(strip_indices(&warning.target_path))
                .or_default() += 1;
        }
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.by_kind.values().sum()
    }
}

/// `sessions[2].readings[0].z` becomes `sessions.readings.z`.
fn strip_indices(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut depth = 0usize;
    for c in path.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub successful: Vec<Outcome>,
    pub failed: Vec<(String, Error)>,
    pub report: QualityReport,
}

impl BatchResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add_success(&mut self, outcome: Outcome) {
        match &outcome {
            Outcome::Processed { document, records } => {
                self.report.add_document(document, records.len());
            }
            Outcome::NoData { .. } => self.report.no_data += 1,
        }
        self.successful.push(outcome);
    }

    fn add_failure(&mut self, id: String, error: Error) {
        self.report.failed += 1;
        self.failed.push((id, error));
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Every flat record of the batch, in input order.
    pub fn records(&self) -> impl Iterator<Item = &FlatRecord> {
        self.successful.iter().flat_map(Outcome::records)
    }

    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.successful.is_empty() && !self.failed.is_empty()
    }
}

/// Classification, resolution, normalization and projection for one
/// document at a time. Holds no per-document state, so a shared reference
/// can serve many threads.
pub struct Pipeline {
    classifier: DialectClassifier,
    resolver: Box<dyn ProfileResolver>,
    engine: NormalizationEngine,
    projector: LegacyProjector,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        classifier: DialectClassifier,
        resolver: Box<dyn ProfileResolver>,
        engine: NormalizationEngine,
        projector: LegacyProjector,
    ) -> Self {
        Self {
            classifier,
            resolver,
            engine,
            projector,
        }
    }

    /// Built-in dialects and profiles with the given engine configuration.
    /// Records carry the columns of every built-in profile.
    pub fn builtin(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = profile::builtin::registry()?;
        let schema = LegacySchema::from_profiles(registry.latest());
        Ok(Self::new(
            classify::builtin::classifier()?,
            Box::new(registry),
            NormalizationEngine::new(config.coercion.clone()),
            LegacyProjector::new(config.projection.clone()).with_schema(schema),
        ))
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: DialectClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn ProfileResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_projector(mut self, projector: LegacyProjector) -> Self {
        self.projector = projector;
        self
    }

    #[must_use]
    pub const fn classifier(&self) -> &DialectClassifier {
        &self.classifier
    }

    #[must_use]
    pub const fn projector(&self) -> &LegacyProjector {
        &self.projector
    }

    pub fn process(&self, document_id: &str, xml: &str) -> Result<Outcome> {
        let doc = RawDocument::parse(xml)?;
        let dialect = match self.classifier.classify(&doc)? {
            Classification::Dialect(name) => name,
            Classification::NoData => {
                return Ok(Outcome::NoData {
                    document_id: document_id.to_string(),
                })
            }
        };
        let profile = self.resolver.resolve(&dialect)?;
        debug!(document = document_id, %dialect, profile = %profile.name, "Resolved profile");

        let document = self.engine.normalize(document_id, &dialect, &doc, &profile);
        let records = self.projector.project(&document);
        Ok(Outcome::Processed { document, records })
    }

    pub fn process_file(&self, path: &Path) -> Result<Outcome> {
        let xml = std::fs::read_to_string(path)?;
        self.process(&path.display().to_string(), &xml)
    }

    /// Processes `(id, xml)` pairs in parallel. A failing document is
    /// recorded and the rest continue; output keeps input order.
    pub fn process_batch(&self, documents: &[(String, String)]) -> BatchResult {
        let results: Vec<(String, Result<Outcome>)> = documents
            .par_iter()
            .map(|(id, xml)| (id.clone(), self.process(id, xml)))
            .collect();
        collect_batch(results)
    }

    /// Like [`Pipeline::process_batch`], reading each file on the worker.
    pub fn process_files(&self, paths: &[PathBuf]) -> BatchResult {
        let results: Vec<(String, Result<Outcome>)> = paths
            .par_iter()
            .map(|path| (path.display().to_string(), self.process_file(path)))
            .collect();
        collect_batch(results)
    }
}

fn collect_batch(results: Vec<(String, Result<Outcome>)>) -> BatchResult {
    let mut batch = BatchResult::new();
    for (id, result) in results {
        match result {
            Ok(outcome) => batch.add_success(outcome),
            Err(e) => {
                debug!(document = %id, error = %e, "Document failed");
                batch.add_failure(id, e);
            }
        }
    }
    debug!(
        succeeded = batch.success_count(),
        failed = batch.failure_count(),
        "Batch finished"
    );
    batch
}
