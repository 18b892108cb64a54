//! Namespace-aware hierarchical selectors.
//!
//! Grammar: `/a/b` (absolute), `a/b` (relative), `.` (context), `//`
//! (descendants at any depth), `*` (any name), `p:name` (declared prefix),
//! `name[2]` (1-based position), trailing `@attr` or `text()`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::{Element, RawDocument};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Named {
        prefix: Option<String>,
        local: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NameTest,
    position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Attribute(String),
    Text,
}

/// A compiled selector. Serializes back to the text it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
    terminal: Option<Terminal>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSelector {
            selector: source.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty selector"));
        }

        let absolute = trimmed.starts_with('/');
        let mut axis = Axis::Child;
        let rest = if let Some(r) = trimmed.strip_prefix("//") {
            axis = Axis::Descendant;
            r
        } else {
            trimmed.strip_prefix('/').unwrap_or(trimmed)
        };
        if rest.is_empty() {
            return Err(invalid("selector has no steps"));
        }

        let pieces: Vec<&str> = rest.split('/').collect();
        let last = pieces.len() - 1;
        let mut steps = Vec::new();
        let mut terminal = None;

        for (i, piece) in pieces.iter().enumerate() {
            let piece = piece.trim();
            if piece.is_empty() {
                if i == last {
                    return Err(invalid("trailing '/'"));
                }
                axis = Axis::Descendant;
                continue;
            }

            if piece == "." {
                if axis == Axis::Descendant {
                    return Err(invalid("'.' cannot follow '//'"));
                }
                continue;
            }
            if piece == ".." {
                return Err(invalid("parent steps are not supported"));
            }

            if let Some(attr) = piece.strip_prefix('@') {
                if i != last || attr.is_empty() {
                    return Err(invalid("attribute step must be last and named"));
                }
                if axis == Axis::Descendant {
                    steps.push(Step {
                        axis,
                        test: NameTest::Any,
                        position: None,
                    });
                }
                terminal = Some(Terminal::Attribute(attr.to_string()));
                break;
            }

            if piece == "text()" {
                if i != last {
                    return Err(invalid("text() must be the last step"));
                }
                terminal = Some(Terminal::Text);
                break;
            }

            steps.push(parse_step(piece, axis).map_err(|r| invalid(&r))?);
            axis = Axis::Child;
        }

        Ok(Self {
            source: source.to_string(),
            absolute,
            steps,
            terminal,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub const fn is_absolute(&self) -> bool {
        self.absolute
    }
}

fn parse_step(piece: &str, axis: Axis) -> std::result::Result<Step, String> {
    let (name, position) = match piece.split_once('[') {
        Some((name, pred)) => {
            let index = pred
                .strip_suffix(']')
                .ok_or_else(|| format!("unterminated predicate in '{piece}'"))?;
            let n: usize = index
                .trim()
                .parse()
                .map_err(|_| format!("position predicate must be a number: '{index}'"))?;
            if n == 0 {
                return Err("positions are 1-based".to_string());
            }
            (name, Some(n))
        }
        None => (piece, None),
    };

    let test = if name == "*" {
        NameTest::Any
    } else {
        let (prefix, local) = match name.split_once(':') {
            Some((p, l)) => (Some(p.to_string()), l),
            None => (None, name),
        };
        if local.is_empty() || local.contains(|c: char| c.is_whitespace() || c == '@') {
            return Err(format!("invalid element name '{name}'"));
        }
        NameTest::Named {
            prefix,
            local: local.to_string(),
        }
    };

    Ok(Step {
        axis,
        test,
        position,
    })
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Selector {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Selector> for String {
    fn from(s: Selector) -> Self {
        s.source
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match<'d> {
    Node(&'d Element),
    Text(&'d str),
}

impl<'d> Match<'d> {
    /// Trimmed text of the match. Elements contribute their direct text.
    #[must_use]
    pub fn text(&self) -> &'d str {
        match *self {
            Self::Node(e) => e.text().trim(),
            Self::Text(t) => t.trim(),
        }
    }

    #[must_use]
    pub const fn as_element(&self) -> Option<&'d Element> {
        match *self {
            Self::Node(e) => Some(e),
            Self::Text(_) => None,
        }
    }
}

/// Evaluates selectors against one document. The namespace context is
/// resolved once at construction and reused for every extraction.
#[derive(Debug, Clone, Copy)]
pub struct PathExtractor<'d> {
    doc: &'d RawDocument,
    default_namespace: Option<&'d str>,
}

impl<'d> PathExtractor<'d> {
    #[must_use]
    pub fn new(doc: &'d RawDocument) -> Self {
        Self {
            doc,
            default_namespace: doc.default_namespace(),
        }
    }

    /// Every match of `selector`, in document order. Relative selectors are
    /// evaluated against `context`; absolute ones ignore it.
    #[must_use]
    pub fn extract(&self, context: &'d Element, selector: &Selector) -> Vec<Match<'d>> {
        let mut current: Vec<&'d Element> = if selector.absolute {
            Vec::new()
        } else {
            vec![context]
        };

        for (i, step) in selector.steps.iter().enumerate() {
            current = if selector.absolute && i == 0 {
                self.root_step(step)
            } else {
                self.apply_step(&current, step)
            };
            if current.is_empty() {
                return Vec::new();
            }
        }

        if selector.absolute && selector.steps.is_empty() {
            current = vec![self.doc.root()];
        }

        match &selector.terminal {
            None => current.into_iter().map(Match::Node).collect(),
            Some(Terminal::Text) => current.into_iter().map(|e| Match::Text(e.text())).collect(),
            Some(Terminal::Attribute(name)) => current
                .into_iter()
                .filter_map(|e| e.attribute(name))
                .map(Match::Text)
                .collect(),
        }
    }

    /// Convenience for absolute selectors or root-relative lookups.
    #[must_use]
    pub fn extract_from_root(&self, selector: &Selector) -> Vec<Match<'d>> {
        self.extract(self.doc.root(), selector)
    }

    fn root_step(&self, step: &Step) -> Vec<&'d Element> {
        let root = self.doc.root();
        let candidates: Vec<&'d Element> = match step.axis {
            Axis::Child => vec![root],
            Axis::Descendant => root.descendants().collect(),
        };
        self.filter(candidates, step)
    }

    fn apply_step(&self, parents: &[&'d Element], step: &Step) -> Vec<&'d Element> {
        let mut out: Vec<&'d Element> = Vec::new();
        for &parent in parents {
            let candidates: Vec<&'d Element> = match step.axis {
                Axis::Child => parent.children().iter().collect(),
                Axis::Descendant => parent.descendants().skip(1).collect(),
            };
            for el in self.filter(candidates, step) {
                if !out.iter().any(|seen| std::ptr::eq(*seen, el)) {
                    out.push(el);
                }
            }
        }
        out
    }

    fn filter(&self, candidates: Vec<&'d Element>, step: &Step) -> Vec<&'d Element> {
        let matched = candidates.into_iter().filter(|e| self.name_matches(e, &step.test));
        match step.position {
            Some(n) => matched.skip(n - 1).take(1).collect(),
            None => matched.collect(),
        }
    }

    fn name_matches(&self, element: &Element, test: &NameTest) -> bool {
        match test {
            NameTest::Any => true,
            NameTest::Named { prefix, local } => {
                if element.name() != local {
                    return false;
                }
                let expected = match prefix {
                    Some(p) => match self.doc.resolve_prefix(p) {
                        Some(uri) => Some(uri),
                        None => return false,
                    },
                    None => self.default_namespace,
                };
                element.namespace() == expected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<LidcReadMessage xmlns="http://www.nih.gov" xmlns:e="urn:ext">
  <ResponseHeader>
    <SeriesInstanceUid>1.2.3</SeriesInstanceUid>
  </ResponseHeader>
  <readingSession>
    <servicingRadiologistID>r1</servicingRadiologistID>
    <unblindedReadNodule>
      <noduleID>n1</noduleID>
      <roi><imageZposition>-10.5</imageZposition></roi>
      <roi><imageZposition>-12.0</imageZposition></roi>
    </unblindedReadNodule>
  </readingSession>
  <readingSession>
    <servicingRadiologistID>r2</servicingRadiologistID>
    <unblindedReadNodule><noduleID>n9</noduleID></unblindedReadNodule>
  </readingSession>
  <e:extra code="42">x</e:extra>
</LidcReadMessage>"#;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    fn texts(doc: &RawDocument, s: &str) -> Vec<String> {
        let px = PathExtractor::new(doc);
        px.extract_from_root(&sel(s))
            .iter()
            .map(|m| m.text().to_string())
            .collect()
    }

    #[test]
    fn absolute_path_matches_root_first() {
        let doc = RawDocument::parse(DOC).unwrap();
        assert_eq!(
            texts(&doc, "/LidcReadMessage/ResponseHeader/SeriesInstanceUid"),
            vec!["1.2.3"]
        );
        assert!(texts(&doc, "/ResponseHeader").is_empty());
    }

    #[test]
    fn relative_path_returns_all_matches() {
        let doc = RawDocument::parse(DOC).unwrap();
        assert_eq!(
            texts(&doc, "readingSession/servicingRadiologistID"),
            vec!["r1", "r2"]
        );
    }

    #[test]
    fn descendant_axis() {
        let doc = RawDocument::parse(DOC).unwrap();
        assert_eq!(texts(&doc, "//noduleID"), vec!["n1", "n9"]);
        assert_eq!(
            texts(&doc, "readingSession//imageZposition"),
            vec!["-10.5", "-12.0"]
        );
    }

    #[test]
    fn position_predicate_is_per_parent() {
        let doc = RawDocument::parse(DOC).unwrap();
        assert_eq!(
            texts(&doc, "readingSession[2]/servicingRadiologistID"),
            vec!["r2"]
        );
        assert_eq!(
            texts(&doc, "//unblindedReadNodule/roi[1]/imageZposition"),
            vec!["-10.5"]
        );
    }

    #[test]
    fn prefixed_steps_and_attributes() {
        let doc = RawDocument::parse(DOC).unwrap();
        assert_eq!(texts(&doc, "e:extra/@code"), vec!["42"]);
        assert_eq!(texts(&doc, "e:extra/text()"), vec!["x"]);
        // unprefixed steps are bound to the default namespace only
        assert!(texts(&doc, "extra").is_empty());
        assert!(texts(&doc, "zz:extra").is_empty());
    }

    #[test]
    fn relative_to_context_element() {
        let doc = RawDocument::parse(DOC).unwrap();
        let px = PathExtractor::new(&doc);
        let sessions = px.extract_from_root(&sel("readingSession"));
        let second = sessions[1].as_element().unwrap();
        let ids: Vec<&str> = px
            .extract(second, &sel("unblindedReadNodule/noduleID"))
            .iter()
            .map(Match::text)
            .collect();
        assert_eq!(ids, vec!["n9"]);

        let own = px.extract(second, &sel("."));
        assert_eq!(own.len(), 1);
        assert!(std::ptr::eq(own[0].as_element().unwrap(), second));
    }

    #[test]
    fn unnamespaced_document() {
        let doc = RawDocument::parse("<a><b>1</b><b>2</b></a>").unwrap();
        assert_eq!(texts(&doc, "b"), vec!["1", "2"]);
        assert_eq!(texts(&doc, "*"), vec!["1", "2"]);
    }

    #[test]
    fn zero_matches_is_not_an_error() {
        let doc = RawDocument::parse(DOC).unwrap();
        assert!(texts(&doc, "readingSession/nonNodule").is_empty());
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in ["", "/", "a/", "a/@", "@x/b", "a[0]", "a[x]", "a[1", "../a", "text()/a"] {
            assert!(Selector::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn serializes_as_source_text() {
        let s = sel("readingSession//noduleID");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"readingSession//noduleID\"");
        let back: Selector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        assert!(serde_json::from_str::<Selector>("\"a/\"").is_err());
    }
}
