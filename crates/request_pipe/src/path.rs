//! Path template interpolation (`/api/user/:id`).

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::PipeError;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"))
}

/// Replace every `:name` placeholder in `template` with the matching entry of `params`.
///
/// Each value is percent-encoded as a single path segment, so `/`, `?` or `#`
/// inside a value cannot change the route. Numbers and booleans use their
/// JSON text.
/// A placeholder without a value (or with a `null`, object or array value)
/// fails with [`PipeError::MissingPathParam`].
pub fn interpolate(template: &str, params: Option<&Value>) -> Result<String, PipeError> {
    let mut missing: Option<String> = None;

    let resolved = placeholder().replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match params.and_then(|p| p.get(name)).and_then(segment) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(param) => Err(PipeError::MissingPathParam {
            param,
            template: template.to_string(),
        }),
        None => Ok(resolved.into_owned()),
    }
}

fn segment(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(urlencoding::encode(&text).into_owned())
}
