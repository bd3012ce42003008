//! Reference template syntax: `{{ resource:path }}` expressions and `'literal'` strings.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SchemaError;
use crate::property::PropertyReference;

/// Opening tag of a reference template.
pub const TEMPLATE_OPEN: &str = "{{";
/// Closing tag of a reference template.
pub const TEMPLATE_CLOSE: &str = "}}";

static STRING_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^'(.+)'$").expect("string pattern should compile"));

/// Returns true when the whole value is a single `{{ ... }}` template.
pub fn is_template(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with(TEMPLATE_OPEN) && trimmed.ends_with(TEMPLATE_CLOSE) && trimmed.len() >= TEMPLATE_OPEN.len() + TEMPLATE_CLOSE.len()
}

/// Returns the content of a `'quoted'` string literal.
pub fn string_literal(value: &str) -> Option<&str> {
    STRING_PATTERN
        .captures(value.trim())
        .and_then(|captures| captures.get(1))
        .map(|content| content.as_str())
}

/// Parse a single `{{ resource:path }}` template into a reference.
pub fn parse_reference(value: &str) -> Result<PropertyReference, SchemaError> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix(TEMPLATE_OPEN)
        .and_then(|rest| rest.strip_suffix(TEMPLATE_CLOSE))
        .unwrap_or(trimmed);
    inner.trim().parse()
}

/// Extract every template expression embedded in a larger text, without delimiters.
pub fn extract_expressions(value: &str) -> Vec<String> {
    let mut expressions = Vec::new();
    let mut remainder = value;

    while let Some(start) = remainder.find(TEMPLATE_OPEN) {
        let after_start = &remainder[start + TEMPLATE_OPEN.len()..];
        let Some(end) = after_start.find(TEMPLATE_CLOSE) else {
            break;
        };
        let expression = after_start[..end].trim();
        if !expression.is_empty() {
            expressions.push(expression.to_string());
        }
        remainder = &after_start[end + TEMPLATE_CLOSE.len()..];
    }

    expressions
}

/// Parse every reference embedded in an expression such as `{{ input:id }} == {{ first:id }}`.
pub fn references_in(value: &str) -> Result<Vec<PropertyReference>, SchemaError> {
    extract_expressions(value).iter().map(|expression| expression.parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reference_strips_template_delimiters() {
        let reference = parse_reference("{{ first.header:x-id }}").expect("reference");
        assert_eq!(reference.resource, "first.header");
        assert_eq!(reference.path, "x-id");
        assert!(is_template(" {{ input:id }} "));
        assert!(!is_template("input:id"));
    }

    #[test]
    fn references_in_collects_each_embedded_template() {
        let references = references_in("({{ input:id }} == {{ first:id }}) || {{ input:name }}").expect("references");
        let rendered: Vec<String> = references.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["input:id", "first:id", "input:name"]);
    }

    #[test]
    fn references_in_rejects_malformed_templates() {
        assert!(references_in("{{ not a reference }}").is_err());
        assert!(references_in("no templates here").expect("empty").is_empty());
    }

    #[test]
    fn string_literal_requires_quotes() {
        assert_eq!(string_literal("'hello'"), Some("hello"));
        assert_eq!(string_literal("hello"), None);
    }
}
