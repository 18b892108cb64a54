use crate::profile::{Assertion, ValidationRules};
use crate::value::{self, Lookup, Object};

use super::{Severity, Warning, WarningKind};

/// Looks a validation path up in the header (`metadata.*`) or the field
/// bag, fanning out across arrays.
fn resolve<'a>(header: &'a Object, fields: &'a Object, path: &str) -> Vec<Lookup<'a>> {
    match path.strip_prefix("metadata.") {
        Some(rest) => value::collect(header, rest),
        None => value::collect(fields, path),
    }
}

fn invalid(path: &str, message: String) -> Warning {
    Warning::new(WarningKind::Validation, Severity::Warning, path, message)
}

pub(super) fn check(
    rules: &ValidationRules,
    header: &Object,
    fields: &Object,
    warnings: &mut Vec<Warning>,
) {
    for path in &rules.required_paths {
        let found = resolve(header, fields, path);
        if found.iter().any(|l| matches!(l, Lookup::Missing)) {
            warnings.push(invalid(path, "required path is not mapped".to_string()));
        } else if found.is_empty() || found.iter().any(|l| matches!(l, Lookup::Empty)) {
            // an empty array along the way leaves nothing to satisfy the path
            warnings.push(invalid(path, "required path is empty".to_string()));
        }
    }

    for assertion in &rules.assertions {
        let path = assertion.path();
        for lookup in resolve(header, fields, path) {
            let Lookup::Found(v) = lookup else {
                continue;
            };
            match assertion {
                Assertion::Range { min, max, .. } => match v.as_f64() {
                    Some(n) if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) => {
                        warnings.push(invalid(
                            path,
                            format!("{n} outside [{}, {}]", bound(*min), bound(*max)),
                        ));
                    }
                    Some(_) => {}
                    None => warnings.push(invalid(
                        path,
                        format!("range check needs a number, found {}", v.type_name()),
                    )),
                },
                Assertion::OneOf { values, .. } => {
                    let text = v.as_text().unwrap_or_default();
                    if !values.iter().any(|allowed| *allowed == text) {
                        warnings.push(invalid(
                            path,
                            format!("'{text}' is not one of {}", values.join(", ")),
                        ));
                    }
                }
                Assertion::Pattern { regex, .. } => {
                    let text = v.as_text().unwrap_or_default();
                    if !regex.regex().is_match(&text) {
                        warnings.push(invalid(
                            path,
                            format!("'{text}' does not match /{}/", regex.as_str()),
                        ));
                    }
                }
            }
        }
    }
}

fn bound(b: Option<f64>) -> String {
    b.map_or_else(|| "-".to_string(), |v| v.to_string())
}
