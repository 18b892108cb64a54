//! Clustering of per-annotator readings into entities with consensus.
//!
//! Readings are visited in session order, then reading order. Each one
//! either joins an existing cluster or opens a new one; a session never
//! contributes two readings to the same cluster.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::{Severity, Warning, WarningKind};
use crate::profile::{EntityRules, Grouping};
use crate::value::{self, Lookup, Object, Value};

/// Distances closer than this are treated as equal.
pub const TIE_EPSILON: f64 = 1e-9;

/// One annotator's reading of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub annotator_id: String,
    /// Position of the annotator's session in the document
    pub annotator_index: usize,
    pub values: Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub count: usize,
    pub mean: Option<f64>,
    /// Population standard deviation; undefined below two readings
    pub std_dev: Option<f64>,
}

impl Consensus {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: None,
                std_dev: None,
            };
        }
        let n = count as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = (count >= 2)
            .then(|| (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt());
        Self {
            count,
            mean: Some(mean),
            std_dev,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCluster {
    cluster_id: String,
    member_readings: Vec<Reading>,
    consensus: BTreeMap<String, Consensus>,
}

impl EntityCluster {
    /// Finalizes a cluster. Consensus covers `characteristics`, or every
    /// numeric leaf any member carries when the list is empty.
    #[must_use]
    pub fn new(cluster_id: String, member_readings: Vec<Reading>, characteristics: &[String]) -> Self {
        let paths: Vec<String> = if characteristics.is_empty() {
            numeric_leaves(&member_readings)
        } else {
            characteristics.to_vec()
        };

        let consensus = paths
            .into_iter()
            .map(|path| {
                let values: Vec<f64> = member_readings
                    .iter()
                    .filter_map(|r| match value::lookup(&r.values, &path) {
                        Lookup::Found(v @ (Value::Integer(_) | Value::Float(_))) => v.as_f64(),
                        _ => None,
                    })
                    .collect();
                (path, Consensus::from_values(&values))
            })
            .collect();

        Self {
            cluster_id,
            member_readings,
            consensus,
        }
    }

    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    #[must_use]
    pub fn member_readings(&self) -> &[Reading] {
        &self.member_readings
    }

    #[must_use]
    pub const fn consensus(&self) -> &BTreeMap<String, Consensus> {
        &self.consensus
    }

    pub fn annotators(&self) -> impl Iterator<Item = &str> {
        self.member_readings.iter().map(|r| r.annotator_id.as_str())
    }

    /// The reading of the last annotator in declared order.
    #[must_use]
    pub fn final_reading(&self) -> Option<&Reading> {
        self.member_readings.iter().max_by_key(|r| r.annotator_index)
    }
}

fn numeric_leaves(readings: &[Reading]) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for reading in readings {
        for (path, v) in value::flatten(&reading.values) {
            if matches!(v, Value::Integer(_) | Value::Float(_)) {
                paths.insert(path);
            }
        }
    }
    paths.into_iter().collect()
}

type Point = [f64; 3];

fn distance(a: Point, b: Point) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

struct Candidate {
    reading: Reading,
    key: Option<String>,
    position: Option<Point>,
    label: String,
}

#[derive(Default)]
struct Building {
    members: Vec<Reading>,
    /// Session ordinals already present; ids may repeat across sessions
    sessions: BTreeSet<usize>,
    key: Option<String>,
    sum: Point,
    positioned: usize,
}

impl Building {
    fn accepts(&self, session: usize) -> bool {
        !self.sessions.contains(&session)
    }

    #[allow(clippy::cast_precision_loss)]
    fn centroid(&self) -> Option<Point> {
        (self.positioned > 0).then(|| {
            let n = self.positioned as f64;
            [self.sum[0] / n, self.sum[1] / n, self.sum[2] / n]
        })
    }

    fn push(&mut self, candidate: Candidate) {
        if self.key.is_none() {
            self.key = candidate.key;
        }
        if let Some(p) = candidate.position {
            for (s, v) in self.sum.iter_mut().zip(p) {
                *s += v;
            }
            self.positioned += 1;
        }
        self.sessions.insert(candidate.reading.annotator_index);
        self.members.push(candidate.reading);
    }
}

/// Groups the readings a profile's [`EntityRules`] point at.
#[derive(Debug, Clone, Copy)]
pub struct EntityExtractor<'r> {
    rules: &'r EntityRules,
}

impl<'r> EntityExtractor<'r> {
    #[must_use]
    pub const fn new(rules: &'r EntityRules) -> Self {
        Self { rules }
    }

    /// Moves every session's readings out of `fields` and clusters them.
    /// Ambiguous joins are resolved and reported in `warnings`.
    pub fn extract(&self, fields: &mut Object, warnings: &mut Vec<Warning>) -> Vec<EntityCluster> {
        let candidates = self.gather(fields);
        let total = candidates.len();

        let mut clusters: Vec<Building> = Vec::new();
        for candidate in candidates {
            match self.assign(&clusters, &candidate, warnings) {
                Some(index) => clusters[index].push(candidate),
                None => {
                    let mut cluster = Building::default();
                    cluster.push(candidate);
                    clusters.push(cluster);
                }
            }
        }

        debug!(readings = total, clusters = clusters.len(), "Clustered readings");
        clusters
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                EntityCluster::new(
                    format!("{}{:03}", self.rules.cluster_id_prefix, i + 1),
                    c.members,
                    &self.rules.characteristics,
                )
            })
            .collect()
    }

    fn gather(&self, fields: &mut Object) -> Vec<Candidate> {
        let mut out = Vec::new();
        let Some(Value::Array(sessions)) = value::lookup_mut(fields, &self.rules.sessions_path)
        else {
            return out;
        };

        for (si, session) in sessions.iter_mut().enumerate() {
            let Value::Object(session) = session else {
                continue;
            };
            let annotator_id = self
                .rules
                .annotator_key
                .as_deref()
                .and_then(|key| match value::lookup(session, key) {
                    Lookup::Found(v) => v.as_text().map(Cow::into_owned),
                    _ => None,
                })
                .unwrap_or_else(|| format!("annotator-{}", si + 1));

            let Some(Value::Array(readings)) = value::remove(session, &self.rules.readings_path)
            else {
                continue;
            };
            for (ri, reading) in readings.into_iter().enumerate() {
                let Value::Object(values) = reading else {
                    continue;
                };
                out.push(Candidate {
                    key: self.key_of(&values),
                    position: self.position_of(&values),
                    label: format!(
                        "{}[{si}].{}[{ri}]",
                        self.rules.sessions_path, self.rules.readings_path
                    ),
                    reading: Reading {
                        annotator_id: annotator_id.clone(),
                        annotator_index: si,
                        values,
                    },
                });
            }
        }
        out
    }

    fn key_of(&self, values: &Object) -> Option<String> {
        let path = self.rules.key_path.as_deref()?;
        match value::lookup(values, path) {
            Lookup::Found(v) => v.as_text().map(Cow::into_owned),
            _ => None,
        }
    }

    /// Mean of every numeric value reached by each axis path.
    #[allow(clippy::cast_precision_loss)]
    fn position_of(&self, values: &Object) -> Option<Point> {
        let rule = self.rules.position.as_ref()?;
        let axis = |path: &str| -> Option<f64> {
            let found: Vec<f64> = value::collect(values, path)
                .into_iter()
                .filter_map(|l| match l {
                    Lookup::Found(v) => v.as_f64(),
                    _ => None,
                })
                .collect();
            (!found.is_empty()).then(|| found.iter().sum::<f64>() / found.len() as f64)
        };
        let z = match rule.z.as_deref() {
            Some(path) => axis(path)?,
            None => 0.0,
        };
        Some([axis(&rule.x)?, axis(&rule.y)?, z])
    }

    fn assign(
        &self,
        clusters: &[Building],
        candidate: &Candidate,
        warnings: &mut Vec<Warning>,
    ) -> Option<usize> {
        let session = candidate.reading.annotator_index;
        match self.rules.grouping {
            Grouping::Key => self.by_key(clusters, candidate, session, false),
            Grouping::Proximity => self.nearest(clusters, candidate, session, warnings),
            Grouping::KeyOrProximity => self
                .by_key(clusters, candidate, session, true)
                .or_else(|| self.nearest(clusters, candidate, session, warnings)),
        }
    }

    /// Earliest open cluster sharing the reading's key. With `confirm`, a
    /// cluster whose centroid is out of tolerance is skipped.
    fn by_key(
        &self,
        clusters: &[Building],
        candidate: &Candidate,
        session: usize,
        confirm: bool,
    ) -> Option<usize> {
        let key = candidate.key.as_ref()?;
        clusters.iter().position(|c| {
            c.key.as_ref() == Some(key)
                && c.accepts(session)
                && (!confirm
                    || match (candidate.position, c.centroid()) {
                        (Some(p), Some(centroid)) => distance(p, centroid) <= self.rules.tolerance,
                        _ => true,
                    })
        })
    }

    fn nearest(
        &self,
        clusters: &[Building],
        candidate: &Candidate,
        session: usize,
        warnings: &mut Vec<Warning>,
    ) -> Option<usize> {
        let position = candidate.position?;
        let in_range: Vec<(usize, f64)> = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.accepts(session))
            .filter_map(|(i, c)| c.centroid().map(|centroid| (i, distance(position, centroid))))
            .filter(|&(_, d)| d <= self.rules.tolerance)
            .collect();

        let best = in_range.iter().map(|&(_, d)| d).reduce(f64::min)?;
        let tied: Vec<usize> = in_range
            .iter()
            .filter(|&&(_, d)| d - best <= TIE_EPSILON)
            .map(|&(i, _)| i)
            .collect();

        // fewer members first, then the earlier cluster
        let chosen = tied
            .iter()
            .copied()
            .min_by_key(|&i| (clusters[i].members.len(), i))?;

        if tied.len() > 1 {
            warnings.push(Warning::new(
                WarningKind::EntityClusteringAmbiguity,
                Severity::Warning,
                candidate.label.clone(),
                format!(
                    "reading is equidistant ({best:.3}) from {} clusters; joined the one with {} member(s)",
                    tied.len(),
                    clusters[chosen].members.len()
                ),
            ));
        }
        Some(chosen)
    }
}
