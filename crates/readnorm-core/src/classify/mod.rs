//! Priority-ordered dialect classification.
//!
//! Dialects are data: each [`DialectSignature`] is a conjunction of
//! [`Check`]s over [`DocumentSignals`]. Adding a dialect never touches the
//! evaluation loop.

pub mod builtin;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::document::RawDocument;
use crate::error::{Error, Result};

/// Which element names carry the structural signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub session_elements: Vec<String>,
    pub annotation_elements: Vec<String>,
    /// Container whose children are counted as characteristic attributes
    pub characteristics_element: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            session_elements: vec!["readingSession".into(), "CXRreadingSession".into()],
            annotation_elements: vec!["unblindedReadNodule".into(), "unblindedRead".into()],
            characteristics_element: "characteristics".into(),
        }
    }
}

/// Structural facts about one document, computed in a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentSignals {
    pub root: String,
    pub namespace: Option<String>,
    pub element_counts: BTreeMap<String, usize>,
    /// Sessions with at least one child element
    pub sessions: usize,
    pub annotations: usize,
    /// Characteristic names rated anywhere in the document
    pub attribute_names: BTreeSet<String>,
    /// Rated characteristics in the richest single characteristics block
    pub max_attributes: usize,
}

impl DocumentSignals {
    #[must_use]
    pub fn collect(doc: &RawDocument, config: &SignalConfig) -> Self {
        let root = doc.root();
        let mut signals = Self {
            root: root.name().to_string(),
            namespace: doc.default_namespace().map(str::to_string),
            ..Self::default()
        };

        for element in root.descendants() {
            let name = element.name();
            *signals.element_counts.entry(name.to_string()).or_default() += 1;

            if config.session_elements.iter().any(|s| s == name)
                && !element.children().is_empty()
            {
                signals.sessions += 1;
            }
            if config.annotation_elements.iter().any(|a| a == name) {
                signals.annotations += 1;
            }
            if name == config.characteristics_element {
                let rated: Vec<&str> = element
                    .children()
                    .iter()
                    .filter(|c| !c.text().trim().is_empty())
                    .map(|c| c.name())
                    .collect();
                signals.max_attributes = signals.max_attributes.max(rated.len());
                signals
                    .attribute_names
                    .extend(rated.into_iter().map(str::to_string));
            }
        }
        signals
    }

    #[must_use]
    pub fn count(&self, element: &str) -> usize {
        self.element_counts.get(element).copied().unwrap_or(0)
    }
}

fn within(value: usize, min: Option<usize>, max: Option<usize>) -> bool {
    min.is_none_or(|m| value >= m) && max.is_none_or(|m| value <= m)
}

/// One structural predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Check {
    RootIs {
        name: String,
    },
    NamespaceIs {
        uri: String,
    },
    ElementPresent {
        element: String,
    },
    ElementAbsent {
        element: String,
    },
    ElementCount {
        element: String,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    SessionCount {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    AnnotationCount {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    MinAttributeCount {
        count: usize,
    },
    MaxAttributeCount {
        count: usize,
    },
    AttributePresent {
        name: String,
    },
}

impl Check {
    #[must_use]
    pub fn matches(&self, signals: &DocumentSignals) -> bool {
        match self {
            Self::RootIs { name } => signals.root == *name,
            Self::NamespaceIs { uri } => signals.namespace.as_deref() == Some(uri.as_str()),
            Self::ElementPresent { element } => signals.count(element) > 0,
            Self::ElementAbsent { element } => signals.count(element) == 0,
            Self::ElementCount { element, min, max } => within(signals.count(element), *min, *max),
            Self::SessionCount { min, max } => within(signals.sessions, *min, *max),
            Self::AnnotationCount { min, max } => within(signals.annotations, *min, *max),
            Self::MinAttributeCount { count } => signals.max_attributes >= *count,
            Self::MaxAttributeCount { count } => signals.max_attributes <= *count,
            Self::AttributePresent { name } => signals.attribute_names.contains(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectSignature {
    pub name: String,
    /// Higher is checked first
    #[serde(default)]
    pub priority: i32,
    /// Broad document type, used for profile fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    pub checks: Vec<Check>,
}

impl DialectSignature {
    #[must_use]
    pub fn new(name: &str, priority: i32, checks: Vec<Check>) -> Self {
        Self {
            name: name.to_string(),
            priority,
            family: None,
            checks,
        }
    }

    #[must_use]
    pub fn with_family(mut self, family: &str) -> Self {
        self.family = Some(family.to_string());
        self
    }

    /// Short-circuiting conjunction of every check.
    #[must_use]
    pub fn matches(&self, signals: &DocumentSignals) -> bool {
        self.checks.iter().all(|c| c.matches(signals))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub signals: SignalConfig,
    pub signatures: Vec<DialectSignature>,
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.signatures.is_empty() {
            return Err(Error::Config("no dialect signatures configured".into()));
        }
        let mut names = BTreeSet::new();
        for signature in &self.signatures {
            if signature.name.trim().is_empty() {
                return Err(Error::Config("dialect signature with empty name".into()));
            }
            if signature.checks.is_empty() {
                return Err(Error::Config(format!(
                    "dialect '{}' has no checks",
                    signature.name
                )));
            }
            if !names.insert(signature.name.as_str()) {
                return Err(Error::Config(format!(
                    "dialect '{}' declared twice",
                    signature.name
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "dialect", rename_all = "snake_case")]
pub enum Classification {
    Dialect(String),
    /// The document parsed but holds no readable session.
    NoData,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dialect(name) => f.write_str(name),
            Self::NoData => f.write_str("no_data"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DialectClassifier {
    signals: SignalConfig,
    ordered: Vec<DialectSignature>,
}

impl DialectClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        config.validate()?;
        let mut ordered = config.signatures;
        // stable: equal priorities keep declaration order
        ordered.sort_by_key(|s| Reverse(s.priority));
        Ok(Self {
            signals: config.signals,
            ordered,
        })
    }

    /// Signatures in evaluation order.
    #[must_use]
    pub fn signatures(&self) -> &[DialectSignature] {
        &self.ordered
    }

    /// `(dialect, family)` for every signature that declares a family.
    pub fn families(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ordered
            .iter()
            .filter_map(|s| s.family.as_deref().map(|f| (s.name.as_str(), f)))
    }

    #[must_use]
    pub fn signals(&self, doc: &RawDocument) -> DocumentSignals {
        DocumentSignals::collect(doc, &self.signals)
    }

    pub fn classify(&self, doc: &RawDocument) -> Result<Classification> {
        let signals = self.signals(doc);
        trace!(?signals, "Document signals");

        if signals.sessions == 0 {
            debug!(root = %signals.root, "No readable sessions");
            return Ok(Classification::NoData);
        }

        let matched = self
            .ordered
            .iter()
            .find(|s| s.matches(&signals))
            .ok_or(Error::NoDialectMatched)?;
        debug!(dialect = %matched.name, priority = matched.priority, "Classified document");
        Ok(Classification::Dialect(matched.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> RawDocument {
        RawDocument::parse(xml).unwrap()
    }

    fn classifier(signatures: Vec<DialectSignature>) -> DialectClassifier {
        DialectClassifier::new(ClassifierConfig {
            signals: SignalConfig::default(),
            signatures,
        })
        .unwrap()
    }

    #[test]
    fn signals_count_sessions_and_attributes() {
        let d = doc(r"<Msg>
            <readingSession>
              <unblindedReadNodule><characteristics>
                <subtlety>3</subtlety><margin>2</margin><texture> </texture>
              </characteristics></unblindedReadNodule>
              <unblindedReadNodule><characteristics>
                <malignancy>4</malignancy>
              </characteristics></unblindedReadNodule>
            </readingSession>
            <readingSession/>
          </Msg>");
        let s = DocumentSignals::collect(&d, &SignalConfig::default());
        assert_eq!(s.root, "Msg");
        assert_eq!(s.sessions, 1);
        assert_eq!(s.annotations, 2);
        assert_eq!(s.max_attributes, 2);
        assert_eq!(
            s.attribute_names.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["malignancy", "margin", "subtlety"]
        );
        assert_eq!(s.count("readingSession"), 2);
    }

    #[test]
    fn higher_priority_checked_first() {
        let c = classifier(vec![
            DialectSignature::new("low", 1, vec![Check::RootIs { name: "Msg".into() }]),
            DialectSignature::new(
                "high",
                10,
                vec![Check::ElementPresent {
                    element: "readingSession".into(),
                }],
            ),
        ]);
        let d = doc("<Msg><readingSession><x/></readingSession></Msg>");
        assert_eq!(c.classify(&d).unwrap(), Classification::Dialect("high".into()));
    }

    #[test]
    fn equal_priority_keeps_declaration_order() {
        let any = || vec![Check::SessionCount { min: Some(1), max: None }];
        let c = classifier(vec![
            DialectSignature::new("first", 5, any()),
            DialectSignature::new("second", 5, any()),
        ]);
        let d = doc("<Msg><readingSession><x/></readingSession></Msg>");
        assert_eq!(c.classify(&d).unwrap(), Classification::Dialect("first".into()));
    }

    #[test]
    fn no_match_is_an_error() {
        let c = classifier(vec![DialectSignature::new(
            "other",
            1,
            vec![Check::RootIs { name: "Other".into() }],
        )]);
        let d = doc("<Msg><readingSession><x/></readingSession></Msg>");
        assert!(matches!(c.classify(&d), Err(Error::NoDialectMatched)));
    }

    #[test]
    fn zero_sessions_is_no_data() {
        let c = classifier(vec![DialectSignature::new(
            "any",
            1,
            vec![Check::RootIs { name: "Msg".into() }],
        )]);
        let d = doc("<Msg><readingSession/><ResponseHeader/></Msg>");
        assert_eq!(c.classify(&d).unwrap(), Classification::NoData);
    }

    #[test]
    fn bounds_are_inclusive() {
        let d = doc("<Msg><readingSession><a/></readingSession><readingSession><a/></readingSession></Msg>");
        let s = DocumentSignals::collect(&d, &SignalConfig::default());
        assert!(Check::SessionCount { min: Some(2), max: Some(2) }.matches(&s));
        assert!(!Check::SessionCount { min: Some(3), max: None }.matches(&s));
        assert!(Check::ElementCount {
            element: "a".into(),
            min: None,
            max: Some(2)
        }
        .matches(&s));
    }

    #[test]
    fn namespace_check_uses_declared_default() {
        let d = doc(r#"<Msg xmlns="http://www.nih.gov"><readingSession><a/></readingSession></Msg>"#);
        let s = DocumentSignals::collect(&d, &SignalConfig::default());
        assert!(Check::NamespaceIs { uri: "http://www.nih.gov".into() }.matches(&s));
        assert_eq!(s.sessions, 1);
    }

    #[test]
    fn config_rejects_duplicates_and_empty_checks() {
        let dup = ClassifierConfig {
            signals: SignalConfig::default(),
            signatures: vec![
                DialectSignature::new("a", 1, vec![Check::RootIs { name: "x".into() }]),
                DialectSignature::new("a", 2, vec![Check::RootIs { name: "y".into() }]),
            ],
        };
        assert!(matches!(dup.validate(), Err(Error::Config(_))));

        let empty = ClassifierConfig {
            signals: SignalConfig::default(),
            signatures: vec![DialectSignature::new("a", 1, vec![])],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn config_loads_from_json() {
        let config = ClassifierConfig::from_json_str(
            r#"{"signatures": [
                {"name": "tiny", "priority": 3, "family": "lidc",
                 "checks": [{"check": "root_is", "name": "Msg"},
                            {"check": "session_count", "min": 1}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.signals, SignalConfig::default());
        let c = DialectClassifier::new(config).unwrap();
        assert_eq!(c.families().collect::<Vec<_>>(), vec![("tiny", "lidc")]);
    }
}
