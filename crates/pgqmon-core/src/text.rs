//! Literal redaction for captured SQL text.
//!
//! Replaces single-quoted strings, unsigned integers and double-quoted
//! identifiers with `?` in one left-to-right pass. The placeholder contains
//! none of the matched syntax, so the function is idempotent.

use std::sync::LazyLock;

use regex::Regex;

/// Token substituted for every redacted literal.
pub const PLACEHOLDER: &str = "?";

static LITERALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)'[^']*'|\d+|".*?""#).expect("valid literal regex"));

/// Redacts literal values from `sql`.
pub fn anonymize(sql: &str) -> String {
    LITERALS.replace_all(sql, PLACEHOLDER).into_owned()
}

/// Anonymizes an optional text field in place.
pub(crate) fn anonymize_in_place(field: &mut Option<String>) {
    if let Some(text) = field.as_mut() {
        *text = anonymize(text);
    }
}
