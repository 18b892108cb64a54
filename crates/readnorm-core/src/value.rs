//! Typed canonical values and the coercion rules that produce them.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::config::{CoercionConfig, RFC3339};

pub type Object = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Array(Vec<Value>),
    Object(Object),
    /// Mapped by the profile, but blank or missing in the document.
    Empty,
}

impl Value {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Empty => "empty",
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Object(_) | Self::Empty)
    }

    /// Text form of a scalar; `None` for containers and `Empty`.
    #[must_use]
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::String(s) => Some(Cow::Borrowed(s)),
            Self::Integer(i) => Some(Cow::Owned(i.to_string())),
            Self::Float(f) => Some(Cow::Owned(f.to_string())),
            Self::Boolean(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            Self::Date(d) => Some(Cow::Owned(d.format("%Y-%m-%d").to_string())),
            Self::DateTime(dt) => Some(Cow::Owned(dt.format("%Y-%m-%dT%H:%M:%S").to_string())),
            Self::Array(_) | Self::Object(_) | Self::Empty => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Empty => Ok(()),
            scalar => f.write_str(&scalar.as_text().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    #[serde(alias = "int")]
    Integer,
    Float,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    #[serde(alias = "date_time")]
    Datetime,
    Array,
    Object,
}

impl DataType {
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Array | Self::Object)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, if anything, while coercing a scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercionIssue {
    /// A fractional number was truncated toward zero.
    Truncated { from: f64 },
    /// The value could not be coerced; the verbatim text was kept.
    Fallback { expected: DataType, text: String },
}

impl fmt::Display for CoercionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { from } => write!(f, "fractional value {from} truncated to integer"),
            Self::Fallback { expected, text } => {
                write!(f, "cannot coerce '{text}' to {expected}; kept as string")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: Value,
    pub issue: Option<CoercionIssue>,
}

impl Coerced {
    const fn clean(value: Value) -> Self {
        Self { value, issue: None }
    }

    fn fallback(text: &str, expected: DataType) -> Self {
        Self {
            value: Value::String(text.to_string()),
            issue: Some(CoercionIssue::Fallback {
                expected,
                text: text.to_string(),
            }),
        }
    }
}

/// Coerces a scalar into `target`. Containers and `Empty` pass through
/// untouched; container targets are shaped by the engine, not here.
#[must_use]
pub fn coerce(value: Value, target: DataType, cfg: &CoercionConfig) -> Coerced {
    if !value.is_scalar() || target.is_container() {
        return Coerced::clean(value);
    }

    match (target, value) {
        (DataType::String, v @ Value::String(_)) => Coerced::clean(v),
        (DataType::String, v) => Coerced::clean(Value::String(
            v.as_text().map(Cow::into_owned).unwrap_or_default(),
        )),

        (DataType::Integer, v @ Value::Integer(_)) => Coerced::clean(v),
        (DataType::Integer, Value::Float(f)) => truncate(f, &f.to_string()),
        (DataType::Integer, Value::String(s)) => coerce_integer_text(&s),

        (DataType::Float, v @ Value::Float(_)) => Coerced::clean(v),
        (DataType::Float, Value::Integer(i)) => {
            #[allow(clippy::cast_precision_loss)]
            let f = i as f64;
            Coerced::clean(Value::Float(f))
        }
        (DataType::Float, Value::String(s)) => match parse_float(&s) {
            Some(f) => Coerced::clean(Value::Float(f)),
            None => Coerced::fallback(&s, DataType::Float),
        },

        (DataType::Boolean, v @ Value::Boolean(_)) => Coerced::clean(v),
        (DataType::Boolean, v @ (Value::String(_) | Value::Integer(_))) => {
            let text = v.as_text().map(Cow::into_owned).unwrap_or_default();
            match cfg.parse_bool(&text) {
                Some(b) => Coerced::clean(Value::Boolean(b)),
                None => Coerced::fallback(&text, DataType::Boolean),
            }
        }

        (DataType::Date, v @ Value::Date(_)) => Coerced::clean(v),
        (DataType::Date, Value::DateTime(dt)) => Coerced::clean(Value::Date(dt.date())),
        (DataType::Date, Value::String(s)) => match parse_date(&s, &cfg.date_formats) {
            Some(d) => Coerced::clean(Value::Date(d)),
            None => Coerced::fallback(&s, DataType::Date),
        },

        (DataType::Datetime, v @ Value::DateTime(_)) => Coerced::clean(v),
        (DataType::Datetime, Value::Date(d)) => {
            Coerced::clean(Value::DateTime(d.and_time(NaiveTime::MIN)))
        }
        (DataType::Datetime, Value::String(s)) => {
            match parse_datetime(&s, &cfg.datetime_formats)
                .or_else(|| parse_date(&s, &cfg.date_formats).map(|d| d.and_time(NaiveTime::MIN)))
            {
                Some(dt) => Coerced::clean(Value::DateTime(dt)),
                None => Coerced::fallback(&s, DataType::Datetime),
            }
        }

        (expected, other) => {
            let text = other.as_text().map(Cow::into_owned).unwrap_or_default();
            Coerced::fallback(&text, expected)
        }
    }
}

fn coerce_integer_text(text: &str) -> Coerced {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Coerced::clean(Value::Integer(i));
    }
    match parse_float(trimmed) {
        Some(f) => truncate(f, text),
        None => Coerced::fallback(text, DataType::Integer),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn truncate(f: f64, text: &str) -> Coerced {
    if !f.is_finite() || f.abs() >= i64::MAX as f64 {
        return Coerced::fallback(text, DataType::Integer);
    }
    let truncated = f.trunc();
    let issue = (truncated != f).then_some(CoercionIssue::Truncated { from: f });
    Coerced {
        value: Value::Integer(truncated as i64),
        issue,
    }
}

fn parse_float(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// First format in `formats` that parses `text` wins.
#[must_use]
pub fn parse_date(text: &str, formats: &[String]) -> Option<NaiveDate> {
    let text = text.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// First format in `formats` that parses `text` wins. The `rfc3339` token
/// keeps the wall-clock time of the offset given in the text.
#[must_use]
pub fn parse_datetime(text: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let text = text.trim();
    formats.iter().find_map(|fmt| {
        if fmt == RFC3339 {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_local())
        } else {
            NaiveDateTime::parse_from_str(text, fmt).ok()
        }
    })
}

/// Result of looking up a dotted path in a value tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// No such key anywhere along the path.
    Missing,
    /// The path (or one of its prefixes) is mapped but empty.
    Empty,
    Found(&'a Value),
}

/// Walks `path` (dot-delimited) through nested objects.
#[must_use]
pub fn lookup<'a>(root: &'a Object, path: &str) -> Lookup<'a> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Lookup::Missing;
    };
    let Some(mut current) = root.get(first) else {
        return Lookup::Missing;
    };
    for segment in segments {
        current = match current {
            Value::Empty => return Lookup::Empty,
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return Lookup::Missing,
            },
            _ => return Lookup::Missing,
        };
    }
    if current.is_empty() {
        Lookup::Empty
    } else {
        Lookup::Found(current)
    }
}

/// Like [`lookup`], but fans out across arrays met along the way, returning
/// one result per reachable leaf.
#[must_use]
pub fn collect<'a>(root: &'a Object, path: &str) -> Vec<Lookup<'a>> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    match root.get(segments[0]) {
        Some(v) => collect_from(v, &segments[1..], &mut out),
        None => out.push(Lookup::Missing),
    }
    out
}

fn collect_from<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<Lookup<'a>>) {
    match value {
        Value::Array(items) if !rest.is_empty() => {
            for item in items {
                collect_from(item, rest, out);
            }
        }
        Value::Empty => out.push(Lookup::Empty),
        _ if rest.is_empty() => out.push(Lookup::Found(value)),
        Value::Object(map) => match map.get(rest[0]) {
            Some(v) => collect_from(v, &rest[1..], out),
            None => out.push(Lookup::Missing),
        },
        _ => out.push(Lookup::Missing),
    }
}

/// Inserts `value` at dotted `path`, creating intermediate objects. An
/// intermediate that is not an object is replaced.
pub fn insert(root: &mut Object, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            root.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Object::new()));
            if !matches!(slot, Value::Object(_)) {
                *slot = Value::Object(Object::new());
            }
            if let Value::Object(child) = slot {
                insert(child, rest, value);
            }
        }
    }
}

/// Mutable counterpart of [`lookup`] without the empty/missing distinction.
pub fn lookup_mut<'a>(root: &'a mut Object, path: &str) -> Option<&'a mut Value> {
    match path.split_once('.') {
        None => root.get_mut(path),
        Some((head, rest)) => match root.get_mut(head)? {
            Value::Object(child) => lookup_mut(child, rest),
            _ => None,
        },
    }
}

/// Removes and returns the value at dotted `path`.
pub fn remove(root: &mut Object, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => root.remove(path),
        Some((parent, key)) => match lookup_mut(root, parent)? {
            Value::Object(child) => child.remove(key),
            _ => None,
        },
    }
}

/// Flattens nested objects into dotted keys. Arrays stay as leaf values.
#[must_use]
pub fn flatten(root: &Object) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into("", root, &mut out);
    out
}

fn flatten_into(prefix: &str, map: &Object, out: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(child) => flatten_into(&path, child, out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CoercionConfig {
        CoercionConfig::default()
    }

    fn s(text: &str) -> Value {
        Value::String(text.to_string())
    }

    #[test]
    fn integer_accepts_integral_floats() {
        let c = coerce(s("3.0"), DataType::Integer, &cfg());
        assert_eq!(c.value, Value::Integer(3));
        assert_eq!(c.issue, None);
    }

    #[test]
    fn integer_truncates_fractions_with_note() {
        let c = coerce(s("4.7"), DataType::Integer, &cfg());
        assert_eq!(c.value, Value::Integer(4));
        assert_eq!(c.issue, Some(CoercionIssue::Truncated { from: 4.7 }));

        let c = coerce(s("-2.5"), DataType::Integer, &cfg());
        assert_eq!(c.value, Value::Integer(-2));
    }

    #[test]
    fn unparseable_number_falls_back_to_string() {
        let c = coerce(s("abc"), DataType::Integer, &cfg());
        assert_eq!(c.value, s("abc"));
        assert!(matches!(c.issue, Some(CoercionIssue::Fallback { .. })));

        let c = coerce(s("NaN"), DataType::Float, &cfg());
        assert_eq!(c.value, s("NaN"));
    }

    #[test]
    fn boolean_token_set() {
        assert_eq!(coerce(s("Yes"), DataType::Boolean, &cfg()).value, Value::Boolean(true));
        assert_eq!(coerce(s("FALSE"), DataType::Boolean, &cfg()).value, Value::Boolean(false));
        assert_eq!(
            coerce(Value::Integer(1), DataType::Boolean, &cfg()).value,
            Value::Boolean(true)
        );
        let c = coerce(s("perhaps"), DataType::Boolean, &cfg());
        assert_eq!(c.value, s("perhaps"));
        assert!(c.issue.is_some());
    }

    #[test]
    fn date_formats_tried_in_order() {
        let expected = NaiveDate::from_ymd_opt(2001, 2, 3).unwrap();
        for text in ["2001-02-03", "20010203", "02/03/2001", "03.02.2001"] {
            assert_eq!(
                coerce(s(text), DataType::Date, &cfg()).value,
                Value::Date(expected),
                "{text}"
            );
        }
    }

    #[test]
    fn malformed_date_keeps_verbatim_text() {
        let c = coerce(s("2001-13-45"), DataType::Date, &cfg());
        assert_eq!(c.value, s("2001-13-45"));
        assert_eq!(
            c.issue,
            Some(CoercionIssue::Fallback {
                expected: DataType::Date,
                text: "2001-13-45".into()
            })
        );
    }

    #[test]
    fn datetime_accepts_rfc3339_and_plain_dates() {
        let c = coerce(s("2004-05-06T07:08:09-05:00"), DataType::Datetime, &cfg());
        let expected = NaiveDate::from_ymd_opt(2004, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(c.value, Value::DateTime(expected));

        let c = coerce(s("2004-05-06"), DataType::Datetime, &cfg());
        assert_eq!(
            c.value,
            Value::DateTime(NaiveDate::from_ymd_opt(2004, 5, 6).unwrap().and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn string_target_renders_scalars() {
        assert_eq!(coerce(Value::Integer(7), DataType::String, &cfg()).value, s("7"));
        assert_eq!(coerce(Value::Float(2.5), DataType::String, &cfg()).value, s("2.5"));
    }

    #[test]
    fn empty_passes_through() {
        let c = coerce(Value::Empty, DataType::Integer, &cfg());
        assert_eq!(c.value, Value::Empty);
        assert_eq!(c.issue, None);
    }

    #[test]
    fn lookup_distinguishes_missing_and_empty() {
        let mut root = Object::new();
        insert(&mut root, "characteristics.subtlety", Value::Integer(5));
        insert(&mut root, "characteristics.margin", Value::Empty);
        insert(&mut root, "notes", Value::Empty);

        assert_eq!(
            lookup(&root, "characteristics.subtlety"),
            Lookup::Found(&Value::Integer(5))
        );
        assert_eq!(lookup(&root, "characteristics.margin"), Lookup::Empty);
        assert_eq!(lookup(&root, "notes.inner"), Lookup::Empty);
        assert_eq!(lookup(&root, "characteristics.texture"), Lookup::Missing);
        assert_eq!(lookup(&root, "absent"), Lookup::Missing);
    }

    #[test]
    fn collect_fans_out_over_arrays() {
        let mut a = Object::new();
        insert(&mut a, "v", Value::Integer(1));
        let mut b = Object::new();
        insert(&mut b, "v", Value::Empty);
        let mut root = Object::new();
        root.insert(
            "items".into(),
            Value::Array(vec![Value::Object(a), Value::Object(b)]),
        );

        let found = collect(&root, "items.v");
        assert_eq!(found, vec![Lookup::Found(&Value::Integer(1)), Lookup::Empty]);
    }

    #[test]
    fn flatten_uses_dotted_keys() {
        let mut root = Object::new();
        insert(&mut root, "a.b.c", Value::Integer(1));
        insert(&mut root, "a.d", Value::Array(vec![]));
        let flat = flatten(&root);
        assert_eq!(flat.get("a.b.c"), Some(&Value::Integer(1)));
        assert_eq!(flat.get("a.d"), Some(&Value::Array(vec![])));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn remove_nested_leaves_siblings() {
        let mut root = Object::new();
        insert(&mut root, "s.readings", Value::Array(vec![Value::Integer(1)]));
        insert(&mut root, "s.id", s("r1"));
        assert_eq!(
            remove(&mut root, "s.readings"),
            Some(Value::Array(vec![Value::Integer(1)]))
        );
        assert_eq!(lookup(&root, "s.readings"), Lookup::Missing);
        assert_eq!(lookup(&root, "s.id"), Lookup::Found(&s("r1")));
        assert_eq!(remove(&mut root, "s.id.x"), None);
    }

    #[test]
    fn data_type_aliases() {
        let t: DataType = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(t, DataType::Integer);
        let t: DataType = serde_json::from_str("\"datetime\"").unwrap();
        assert_eq!(t, DataType::Datetime);
    }
}
