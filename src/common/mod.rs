//! Common utilities shared by the harness core, transports and runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

use serde_json::Value;

/// Truncate text for error messages, respecting char boundaries
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// String form of a JSON value: strings unquoted, `null` empty
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("abcdef", 3), "abc");
        assert_eq!(preview("ab", 3), "ab");
        assert_eq!(preview("ééé", 2), "éé");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&Value::from("abc")), "abc");
        assert_eq!(value_to_text(&Value::Null), "");
        assert_eq!(value_to_text(&Value::from(42)), "42");
        assert_eq!(value_to_text(&Value::from(true)), "true");
    }
}
