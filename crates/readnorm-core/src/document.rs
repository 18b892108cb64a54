//! Owned, immutable XML tree handed to the classifier and the engine.
//!
//! Parsing happens once, upstream of every engine stage. The tree keeps
//! resolved namespace URIs on each element so path evaluation never needs the
//! original text again.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Concatenated direct text children, untrimmed.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Depth-first walk in document order, starting with `self`.
    #[must_use]
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let mut text = String::new();
        let mut children = Vec::new();
        for child in node.children() {
            if child.is_element() {
                children.push(Self::from_node(child));
            } else if child.is_text() {
                if let Some(t) = child.text() {
                    text.push_str(t);
                }
            }
        }

        Self {
            name: node.tag_name().name().to_string(),
            namespace: node.tag_name().namespace().map(String::from),
            attributes: node
                .attributes()
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect(),
            text,
            children,
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    root: Element,
    default_namespace: Option<String>,
    prefixes: BTreeMap<String, String>,
}

impl RawDocument {
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(Error::Parse("empty document".into()));
        }

        let doc = roxmltree::Document::parse(text)?;
        let root = doc.root_element();

        let default_namespace = root.lookup_namespace_uri(None).map(String::from);
        let prefixes: BTreeMap<String, String> = root
            .namespaces()
            .filter_map(|ns| ns.name().map(|p| (p.to_string(), ns.uri().to_string())))
            .filter(|(p, _)| p != "xml")
            .collect();

        Ok(Self {
            root: Element::from_node(root),
            default_namespace,
            prefixes,
        })
    }

    #[must_use]
    pub const fn root(&self) -> &Element {
        &self.root
    }

    #[must_use]
    pub fn default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    #[must_use]
    pub const fn prefixes(&self) -> &BTreeMap<String, String> {
        &self.prefixes
    }

    #[must_use]
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }
}

impl std::str::FromStr for RawDocument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
