//! Command template rendering.
//!
//! Templates reference job specification fields with `{{ .Section.Field }}`.
//! Path segments are matched against the serialized field names ignoring case
//! and underscores, so `{{ .Recipe.GitRef }}` and `{{ .recipe.git_ref }}` both
//! resolve to `recipe.git_ref`. Anything else inside the braces is a syntax error.

use serde_json::Value;

use super::JobSpec;
use crate::error::{Error, Result};

/// Renders `template` against the job specification.
///
/// Pure function: no I/O, no side effects.
///
/// # Errors
///
/// Returns [`Error::Template`] on an unclosed action, a malformed field
/// reference, or a reference to a field absent from the job specification.
pub fn render(template: &str, spec: &JobSpec) -> Result<String> {
    // Fast path; most commands carry no template actions.
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    let context = serde_json::to_value(spec)
        .map_err(|e| Error::Template { message: format!("failed to build context: {e}") })?;
    render_value(template, &context)
}

fn render_value(template: &str, context: &Value) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (literal, tail) = rest.split_at(start);
        out.push_str(literal);
        let tail = &tail[2..];
        let end = tail.find("}}").ok_or_else(|| syntax(template, "unclosed action"))?;
        let expr = tail[..end].trim();
        out.push_str(&lookup(expr, context, template)?);
        rest = &tail[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(expr: &str, context: &Value, template: &str) -> Result<String> {
    let path = expr
        .strip_prefix('.')
        .filter(|p| !p.is_empty())
        .ok_or_else(|| syntax(template, &format!("unsupported action {expr:?}")))?;

    let mut current = context;
    for segment in path.split('.') {
        if segment.is_empty() || !segment.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(syntax(template, &format!("bad field reference {expr:?}")));
        }
        current = current
            .as_object()
            .and_then(|map| {
                let wanted = fold(segment);
                map.iter().find(|(k, _)| fold(k) == wanted).map(|(_, v)| v)
            })
            .ok_or_else(|| Error::Template {
                message: format!("can't evaluate field {segment} in {expr:?}"),
            })?;
    }

    Ok(match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => current.to_string(),
        Value::Array(_) | Value::Object(_) => {
            return Err(Error::Template {
                message: format!("field {expr:?} is not a scalar value"),
            })
        }
    })
}

fn fold(name: &str) -> String {
    name.chars().filter(|c| *c != '_' && *c != '-').flat_map(char::to_lowercase).collect()
}

fn syntax(template: &str, detail: &str) -> Error {
    Error::Template { message: format!("{detail} in {template:?}") }
}
