//! Flattening of canonical documents into row records.
//!
//! One [`FlatRecord`] is emitted per cluster member. Cells keep the
//! difference between a field the dialect never defines
//! ([`Cell::StructurallyAbsent`]) and one it defines but left blank
//! ([`Cell::EmptyValue`]).

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::ProjectionConfig;
use crate::entity::{EntityCluster, Reading};
use crate::normalize::CanonicalDocument;
use crate::profile::Profile;
use crate::value::{self, DataType, Lookup, Object, Value};

pub const METADATA_PREFIX: &str = "metadata.";
pub const FIELD_PREFIX: &str = "fields.";
pub const READING_PREFIX: &str = "reading.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Value(Value),
    /// The active profile does not map this column.
    StructurallyAbsent,
    /// The column is mapped but the document left it blank.
    EmptyValue,
}

impl Cell {
    #[must_use]
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        match lookup {
            Lookup::Missing => Self::StructurallyAbsent,
            Lookup::Empty | Lookup::Found(Value::Empty) => Self::EmptyValue,
            Lookup::Found(v) => Self::Value(v.clone()),
        }
    }

    /// Text form, with the configured markers for the two sentinels.
    #[must_use]
    pub fn render<'a>(&'a self, config: &'a ProjectionConfig) -> Cow<'a, str> {
        match self {
            Self::Value(v) => v
                .as_text()
                .unwrap_or_else(|| Cow::Owned(serde_json::to_string(v).unwrap_or_default())),
            Self::StructurallyAbsent => Cow::Borrowed(&config.absent_marker),
            Self::EmptyValue => Cow::Borrowed(&config.empty_marker),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub document_id: String,
    pub cluster_id: String,
    pub annotator_id: String,
    pub annotator_index: usize,
    /// Last annotator in the cluster, by declared order
    pub is_final: bool,
    pub cells: BTreeMap<String, Cell>,
}

impl FlatRecord {
    #[must_use]
    pub fn render(&self, config: &ProjectionConfig) -> BTreeMap<String, String> {
        self.cells
            .iter()
            .map(|(k, c)| (k.clone(), c.render(config).into_owned()))
            .collect()
    }

    /// Rebuilds the reading carried by the `reading.*` cells. Absent cells
    /// are skipped; empty cells come back as [`Value::Empty`].
    #[must_use]
    pub fn reading(&self) -> Reading {
        let mut values = Object::new();
        for (column, cell) in &self.cells {
            let Some(path) = column.strip_prefix(READING_PREFIX) else {
                continue;
            };
            match cell {
                Cell::Value(v) => value::insert(&mut values, path, v.clone()),
                Cell::EmptyValue => value::insert(&mut values, path, Value::Empty),
                Cell::StructurallyAbsent => {}
            }
        }
        Reading {
            annotator_id: self.annotator_id.clone(),
            annotator_index: self.annotator_index,
            values,
        }
    }
}

/// Fixed column layout for consumers that need the same columns from every
/// dialect. Paths are relative to their section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacySchema {
    pub metadata: Vec<String>,
    pub fields: Vec<String>,
    pub reading: Vec<String>,
}

impl LegacySchema {
    /// Union of the columns the given profiles can produce. Projecting with
    /// it gives every row of a mixed-dialect batch the same columns, so a
    /// field the active profile does not define comes out as
    /// [`Cell::StructurallyAbsent`] instead of a missing key.
    pub fn from_profiles<'a>(profiles: impl IntoIterator<Item = &'a Profile>) -> Self {
        let mut metadata = BTreeSet::new();
        let mut fields = BTreeSet::new();
        let mut reading = BTreeSet::new();

        for profile in profiles {
            let targets = profile.target_paths();
            for (path, data_type) in leaves(&targets) {
                match path.strip_prefix(METADATA_PREFIX) {
                    Some(key) => {
                        metadata.insert(key.to_string());
                    }
                    None if data_type != DataType::Array => {
                        fields.insert(path.to_string());
                    }
                    None => {}
                }
            }

            let Some(rules) = &profile.entity_rules else {
                continue;
            };
            let prefix = format!("{}.{}.", rules.sessions_path, rules.readings_path);
            let relative: BTreeMap<String, DataType> = targets
                .iter()
                .filter_map(|(path, t)| path.strip_prefix(&prefix).map(|rel| (rel.to_string(), *t)))
                .collect();
            reading.extend(leaves(&relative).map(|(path, _)| path.to_string()));
        }

        Self {
            metadata: metadata.into_iter().collect(),
            fields: fields.into_iter().collect(),
            reading: reading.into_iter().collect(),
        }
    }
}

/// Targets that flatten to a cell: objects are walked through, arrays are
/// kept whole, so nothing below an array counts.
fn leaves(targets: &BTreeMap<String, DataType>) -> impl Iterator<Item = (&str, DataType)> {
    targets.iter().filter_map(|(path, &data_type)| {
        let under_array = path
            .match_indices('.')
            .any(|(i, _)| targets.get(&path[..i]) == Some(&DataType::Array));
        (data_type != DataType::Object && !under_array).then_some((path.as_str(), data_type))
    })
}

#[derive(Debug, Clone, Default)]
pub struct LegacyProjector {
    config: ProjectionConfig,
    schema: Option<LegacySchema>,
}

impl LegacyProjector {
    #[must_use]
    pub const fn new(config: ProjectionConfig) -> Self {
        Self {
            config,
            schema: None,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: LegacySchema) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn project(&self, doc: &CanonicalDocument) -> Vec<FlatRecord> {
        let header = &doc.metadata().header;
        let fields = doc.fields();

        let (metadata_cols, field_cols, reading_cols) = match &self.schema {
            Some(schema) => (
                schema.metadata.clone(),
                schema.fields.clone(),
                schema.reading.clone(),
            ),
            None => (
                value::flatten(header).into_keys().collect(),
                scalar_paths(fields),
                reading_paths(doc.entities()),
            ),
        };

        let mut shared = BTreeMap::new();
        for col in &metadata_cols {
            shared.insert(
                format!("{METADATA_PREFIX}{col}"),
                Cell::from_lookup(value::lookup(header, col)),
            );
        }
        for col in &field_cols {
            shared.insert(
                format!("{FIELD_PREFIX}{col}"),
                Cell::from_lookup(value::lookup(fields, col)),
            );
        }

        let mut records = Vec::new();
        for cluster in doc.entities() {
            let last = cluster.final_reading().map(|r| r.annotator_index);
            for reading in cluster.member_readings() {
                let mut cells = shared.clone();
                for col in &reading_cols {
                    cells.insert(
                        format!("{READING_PREFIX}{col}"),
                        Cell::from_lookup(value::lookup(&reading.values, col)),
                    );
                }
                records.push(FlatRecord {
                    document_id: doc.id().to_string(),
                    cluster_id: cluster.cluster_id().to_string(),
                    annotator_id: reading.annotator_id.clone(),
                    annotator_index: reading.annotator_index,
                    is_final: last == Some(reading.annotator_index),
                    cells,
                });
            }
        }
        records
    }
}

/// Document-level scalar leaves; arrays are not cell material.
fn scalar_paths(fields: &Object) -> Vec<String> {
    value::flatten(fields)
        .into_iter()
        .filter(|(_, v)| !matches!(v, Value::Array(_)))
        .map(|(k, _)| k)
        .collect()
}

/// Union of reading leaves across every cluster, so all rows of a document
/// share one column set.
fn reading_paths(clusters: &[EntityCluster]) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for reading in clusters.iter().flat_map(EntityCluster::member_readings) {
        paths.extend(value::flatten(&reading.values).into_keys());
    }
    paths.into_iter().collect()
}

/// The rows tagged as the final reading of their cluster.
#[must_use]
pub fn final_records(records: &[FlatRecord]) -> Vec<&FlatRecord> {
    records.iter().filter(|r| r.is_final).collect()
}

/// Re-aggregates flat rows into clusters, keyed by document and cluster id
/// in first-seen order. Consensus is recomputed over `characteristics`
/// (empty means every numeric reading leaf).
#[must_use]
pub fn regroup(records: &[FlatRecord], characteristics: &[String]) -> Vec<EntityCluster> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut members: BTreeMap<(&str, &str), Vec<Reading>> = BTreeMap::new();
    for record in records {
        let key = (record.document_id.as_str(), record.cluster_id.as_str());
        members
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(record.reading());
    }

    order
        .into_iter()
        .filter_map(|key| {
            members
                .remove(&key)
                .map(|readings| EntityCluster::new(key.1.to_string(), readings, characteristics))
        })
        .collect()
}
