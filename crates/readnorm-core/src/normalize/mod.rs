//! The profile interpreter.
//!
//! [`NormalizationEngine::normalize`] walks a profile's mappings against one
//! parsed document. Every field-level problem becomes a [`Warning`]; nothing
//! below the document level aborts the pass.

mod canonical;
mod validate;

use tracing::debug;

pub use canonical::{CanonicalDocument, DocumentMetadata, Severity, Warning, WarningKind};

use canonical::DocumentBuilder;

use crate::config::CoercionConfig;
use crate::document::{Element, RawDocument};
use crate::entity::EntityExtractor;
use crate::path::{Match, PathExtractor};
use crate::profile::{FieldMapping, Profile};
use crate::transform;
use crate::value::{self, Coerced, CoercionIssue, DataType, Object, Value};

/// Top-level targets under this key land in the document header.
pub const METADATA_KEY: &str = "metadata";

fn join(at: &str, target: &str) -> String {
    if at.is_empty() {
        target.to_string()
    } else {
        format!("{at}.{target}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationEngine {
    coercion: CoercionConfig,
}

impl NormalizationEngine {
    #[must_use]
    pub const fn new(coercion: CoercionConfig) -> Self {
        Self { coercion }
    }

    #[must_use]
    pub const fn coercion(&self) -> &CoercionConfig {
        &self.coercion
    }

    /// Builds the canonical form of `doc`. The result depends only on the
    /// inputs, so repeated calls produce identical documents.
    #[must_use]
    pub fn normalize(
        &self,
        document_id: &str,
        dialect: &str,
        doc: &RawDocument,
        profile: &Profile,
    ) -> CanonicalDocument {
        let extractor = PathExtractor::new(doc);
        let mut builder = DocumentBuilder::new(DocumentMetadata {
            document_id: document_id.to_string(),
            dialect: dialect.to_string(),
            profile: profile.name.clone(),
            profile_version: profile.version,
            header: Object::new(),
        });

        let mut mapped = Object::new();
        self.map_level(
            &extractor,
            Some(doc.root()),
            &profile.mappings,
            "",
            &mut mapped,
            &mut builder.warnings,
        );
        if let Some(Value::Object(header)) = mapped.remove(METADATA_KEY) {
            builder.metadata.header = header;
        }
        builder.fields = mapped;

        validate::check(
            &profile.validation,
            &builder.metadata.header,
            &builder.fields,
            &mut builder.warnings,
        );

        if let Some(rules) = &profile.entity_rules {
            builder.entities =
                EntityExtractor::new(rules).extract(&mut builder.fields, &mut builder.warnings);
        }

        debug!(
            document = document_id,
            profile = %profile.name,
            entities = builder.entities.len(),
            warnings = builder.warnings.len(),
            "Normalized document"
        );
        builder.freeze()
    }

    /// Evaluates one level of mappings. `context` is `None` when the parent
    /// matched nothing; every mapping then behaves as an empty match.
    fn map_level<'d>(
        &self,
        extractor: &PathExtractor<'d>,
        context: Option<&'d Element>,
        mappings: &[FieldMapping],
        at: &str,
        out: &mut Object,
        warnings: &mut Vec<Warning>,
    ) {
        for mapping in mappings {
            let path = join(at, &mapping.target_path);
            let matches = context
                .map(|c| extractor.extract(c, &mapping.source_path))
                .unwrap_or_default();

            let value = match mapping.data_type {
                DataType::Array => self.map_array(extractor, mapping, &matches, &path, warnings),
                DataType::Object => self.map_object(extractor, mapping, &matches, &path, warnings),
                _ => self.map_scalar(mapping, &matches, &path, warnings),
            };
            value::insert(out, &mapping.target_path, value);
        }
    }

    fn map_array<'d>(
        &self,
        extractor: &PathExtractor<'d>,
        mapping: &FieldMapping,
        matches: &[Match<'d>],
        path: &str,
        warnings: &mut Vec<Warning>,
    ) -> Value {
        if matches.is_empty() {
            if mapping.required {
                warnings.push(missing_warning(path, mapping, "has no matches"));
            }
            return mapping
                .default_value
                .clone()
                .unwrap_or_else(|| Value::Array(Vec::new()));
        }

        let mut items = Vec::with_capacity(matches.len());
        for (i, m) in matches.iter().enumerate() {
            let here = format!("{path}[{i}]");
            let element = m.as_element();
            if element.is_none() {
                warnings.push(Warning::new(
                    WarningKind::FieldExtraction,
                    Severity::Warning,
                    here.clone(),
                    format!("'{}' matched text, not an element", mapping.source_path),
                ));
            }
            let mut item = Object::new();
            self.map_level(extractor, element, mapping.nested(), &here, &mut item, warnings);
            items.push(Value::Object(item));
        }
        Value::Array(items)
    }

    fn map_object<'d>(
        &self,
        extractor: &PathExtractor<'d>,
        mapping: &FieldMapping,
        matches: &[Match<'d>],
        path: &str,
        warnings: &mut Vec<Warning>,
    ) -> Value {
        let element = matches.first().and_then(Match::as_element);
        if element.is_none() {
            if mapping.required {
                warnings.push(missing_warning(path, mapping, "has no match"));
            }
            if let Some(default) = &mapping.default_value {
                return default.clone();
            }
        } else if matches.len() > 1 {
            warnings.push(extra_matches(path, mapping, matches.len()));
        }

        let mut object = Object::new();
        self.map_level(extractor, element, mapping.nested(), path, &mut object, warnings);
        Value::Object(object)
    }

    fn map_scalar(
        &self,
        mapping: &FieldMapping,
        matches: &[Match<'_>],
        path: &str,
        warnings: &mut Vec<Warning>,
    ) -> Value {
        let Some(first) = matches.first() else {
            return self.fallback(mapping, path, "has no match", warnings);
        };
        if matches.len() > 1 {
            warnings.push(extra_matches(path, mapping, matches.len()));
        }

        let text = first.text();
        if text.is_empty() {
            return self.fallback(mapping, path, "is blank", warnings);
        }

        let raw = Value::String(text.to_string());
        let transformed = match transform::apply(raw.clone(), &mapping.transformations, &self.coercion)
        {
            Ok(v) => v,
            Err(failure) => {
                warnings.push(Warning::new(
                    WarningKind::Transformation,
                    Severity::Warning,
                    path,
                    failure.to_string(),
                ));
                mapping.default_value.clone().unwrap_or(raw)
            }
        };
        if matches!(&transformed, Value::String(s) if s.trim().is_empty()) || transformed.is_empty() {
            return self.fallback(mapping, path, "is blank after transforms", warnings);
        }

        self.coerce(transformed, mapping, path, warnings)
    }

    fn coerce(
        &self,
        value: Value,
        mapping: &FieldMapping,
        path: &str,
        warnings: &mut Vec<Warning>,
    ) -> Value {
        let Coerced { value, issue } = value::coerce(value, mapping.data_type, &self.coercion);
        if let Some(issue) = issue {
            let severity = match issue {
                CoercionIssue::Truncated { .. } => Severity::Info,
                CoercionIssue::Fallback { .. } => Severity::Warning,
            };
            warnings.push(Warning::new(
                WarningKind::TypeCoercion,
                severity,
                path,
                issue.to_string(),
            ));
        }
        value
    }

    /// Value for a scalar with nothing usable in the document: the default
    /// when one is declared, otherwise `Empty`.
    fn fallback(
        &self,
        mapping: &FieldMapping,
        path: &str,
        reason: &str,
        warnings: &mut Vec<Warning>,
    ) -> Value {
        if mapping.required {
            warnings.push(missing_warning(path, mapping, reason));
        }
        match mapping.default_value.clone() {
            Some(default) => self.coerce(default, mapping, path, warnings),
            None => Value::Empty,
        }
    }
}

fn missing_warning(path: &str, mapping: &FieldMapping, reason: &str) -> Warning {
    let message = if mapping.default_value.is_some() {
        format!("required field {reason} ('{}'); default used", mapping.source_path)
    } else {
        format!("required field {reason} ('{}')", mapping.source_path)
    };
    Warning::new(WarningKind::FieldExtraction, Severity::Warning, path, message)
}

fn extra_matches(path: &str, mapping: &FieldMapping, count: usize) -> Warning {
    Warning::new(
        WarningKind::FieldExtraction,
        Severity::Info,
        path,
        format!("'{}' matched {count} times; first used", mapping.source_path),
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::transform::{Pattern, Transform};

    fn doc(xml: &str) -> RawDocument {
        RawDocument::parse(xml).unwrap()
    }

    fn scalar(source: &str, target: &str, data_type: DataType) -> FieldMapping {
        FieldMapping::new(source, target, data_type).unwrap()
    }

    fn run(xml: &str, mappings: Vec<FieldMapping>) -> CanonicalDocument {
        let profile = Profile::new("test", "test_dialect", mappings);
        profile.validate().unwrap();
        NormalizationEngine::default().normalize("doc-1", "test_dialect", &doc(xml), &profile)
    }

    #[test]
    fn metadata_targets_land_in_header() {
        let out = run(
            "<Msg><Header><Uid>1.2.3</Uid><Site>A</Site></Header></Msg>",
            vec![
                scalar("Header/Uid", "metadata.uid", DataType::String),
                scalar("Header/Site", "site", DataType::String),
            ],
        );
        assert_eq!(out.metadata().header["uid"], Value::String("1.2.3".into()));
        assert_eq!(out.fields()["site"], Value::String("A".into()));
        assert!(!out.fields().contains_key("metadata"));
        assert_eq!(out.metadata().profile, "test");
        assert_eq!(out.id(), "doc-1");
    }

    #[test]
    fn namespaced_document_needs_no_uri_in_profile() {
        let out = run(
            r#"<Msg xmlns="http://www.nih.gov"><Header><Uid>9</Uid></Header></Msg>"#,
            vec![scalar("/Msg/Header/Uid", "uid", DataType::Integer)],
        );
        assert_eq!(out.fields()["uid"], Value::Integer(9));
    }

    #[test]
    fn missing_required_field_warns_and_stays_empty() {
        let out = run(
            "<Msg/>",
            vec![
                scalar("Uid", "uid", DataType::String).required(),
                scalar("Site", "site", DataType::String),
            ],
        );
        assert_eq!(out.fields()["uid"], Value::Empty);
        assert_eq!(out.fields()["site"], Value::Empty);
        let w: Vec<_> = out.warnings_of(WarningKind::FieldExtraction).collect();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].target_path, "uid");
    }

    #[test]
    fn default_used_for_missing_field() {
        let out = run(
            "<Msg/>",
            vec![scalar("Count", "count", DataType::Integer)
                .required()
                .with_default(Value::Integer(0))],
        );
        assert_eq!(out.fields()["count"], Value::Integer(0));
        assert!(out.warnings()[0].message.contains("default used"));
    }

    #[test]
    fn mistyped_default_is_reported() {
        let out = run(
            "<Msg/>",
            vec![scalar("Count", "count", DataType::Integer)
                .with_default(Value::String("none".into()))],
        );
        assert_eq!(out.fields()["count"], Value::String("none".into()));
        let w: Vec<_> = out.warnings_of(WarningKind::TypeCoercion).collect();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].target_path, "count");
        assert_eq!(w[0].severity, Severity::Warning);
    }

    #[test]
    fn whitespace_text_is_empty() {
        let out = run(
            "<Msg><Site>   </Site></Msg>",
            vec![scalar("Site", "site", DataType::String)],
        );
        assert_eq!(out.fields()["site"], Value::Empty);
        assert!(out.warnings().is_empty());
    }

    #[test]
    fn malformed_date_falls_back_to_string() {
        let out = run(
            "<Msg><Seen>2005-13-45</Seen><Done>2005-11-07</Done><Score>3.0</Score></Msg>",
            vec![
                scalar("Seen", "seen", DataType::Date),
                scalar("Done", "done", DataType::Date),
                scalar("Score", "score", DataType::Integer),
            ],
        );
        assert_eq!(out.fields()["seen"], Value::String("2005-13-45".into()));
        assert_eq!(
            out.fields()["done"],
            Value::Date(NaiveDate::from_ymd_opt(2005, 11, 7).unwrap())
        );
        assert_eq!(out.fields()["score"], Value::Integer(3));
        assert_eq!(out.warnings().len(), 1);
        assert_eq!(out.warnings()[0].kind, WarningKind::TypeCoercion);
        assert_eq!(out.warnings()[0].target_path, "seen");
    }

    #[test]
    fn failed_transform_keeps_pre_transform_value() {
        let out = run(
            "<Msg><Id>Nodule 007</Id><Other>abc</Other></Msg>",
            vec![
                scalar("Id", "id", DataType::Integer).with_transform(Transform::RegexExtract {
                    pattern: Pattern::new(r"(\d+)").unwrap(),
                    group: 1,
                }),
                scalar("Other", "other", DataType::String).with_transform(
                    Transform::RegexExtract {
                        pattern: Pattern::new(r"(\d+)").unwrap(),
                        group: 1,
                    },
                ),
            ],
        );
        assert_eq!(out.fields()["id"], Value::Integer(7));
        assert_eq!(out.fields()["other"], Value::String("abc".into()));
        let w: Vec<_> = out.warnings_of(WarningKind::Transformation).collect();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].target_path, "other");
    }

    #[test]
    fn array_has_one_element_per_match() {
        let out = run(
            "<Msg><Item><V>1</V></Item><Item><V>x</V></Item><Item/></Msg>",
            vec![FieldMapping::array(
                "Item",
                "items",
                vec![scalar("V", "v", DataType::Integer).required()],
            )
            .unwrap()],
        );
        let items = out.fields()["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_object().unwrap()["v"], Value::Integer(1));
        assert_eq!(items[1].as_object().unwrap()["v"], Value::String("x".into()));
        assert_eq!(items[2].as_object().unwrap()["v"], Value::Empty);

        let paths: Vec<&str> = out.warnings().iter().map(|w| w.target_path.as_str()).collect();
        assert_eq!(paths, vec!["items[1].v", "items[2].v"]);
    }

    #[test]
    fn single_match_still_yields_array() {
        let out = run(
            "<Msg><Item><V>1</V></Item></Msg>",
            vec![FieldMapping::array("Item", "items", vec![scalar("V", "v", DataType::Integer)])
                .unwrap()],
        );
        assert_eq!(out.fields()["items"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn absent_object_keeps_shape_with_empty_leaves() {
        let out = run(
            "<Msg/>",
            vec![FieldMapping::object(
                "Chars",
                "chars",
                vec![
                    scalar("A", "a", DataType::Integer).required(),
                    scalar("B", "b", DataType::Integer),
                ],
            )
            .unwrap()],
        );
        let chars = out.fields()["chars"].as_object().unwrap();
        assert_eq!(chars["a"], Value::Empty);
        assert_eq!(chars["b"], Value::Empty);
        assert_eq!(out.warnings().len(), 1);
        assert_eq!(out.warnings()[0].target_path, "chars.a");
    }

    #[test]
    fn multiple_scalar_matches_use_first() {
        let out = run(
            "<Msg><V>1</V><V>2</V></Msg>",
            vec![scalar("V", "v", DataType::Integer)],
        );
        assert_eq!(out.fields()["v"], Value::Integer(1));
        assert_eq!(out.warnings()[0].severity, Severity::Info);
    }

    #[test]
    fn attribute_selectors_extract_text() {
        let out = run(
            r#"<Msg uid="42"><Flag on="yes"/></Msg>"#,
            vec![
                scalar("@uid", "uid", DataType::Integer),
                scalar("Flag/@on", "on", DataType::Boolean),
            ],
        );
        assert_eq!(out.fields()["uid"], Value::Integer(42));
        assert_eq!(out.fields()["on"], Value::Boolean(true));
    }

    #[test]
    fn normalize_is_idempotent() {
        let xml = "<Msg><Item><V>1.5</V></Item><Item><V>2</V></Item><D>bad</D></Msg>";
        let mappings = vec![
            FieldMapping::array("Item", "items", vec![scalar("V", "v", DataType::Integer)])
                .unwrap(),
            scalar("D", "d", DataType::Date),
        ];
        let first = run(xml, mappings.clone());
        let second = run(xml, mappings);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
