//! Canonical skill keys

use serde_json::Value;

/// Normalize a raw stored skill entry into its canonical key.
///
/// Only strings normalize; numbers, nulls, objects and arrays yield `None`.
pub fn normalize(raw: &Value) -> Option<String> {
    match raw {
        Value::String(label) => normalize_label(label),
        _ => None,
    }
}

/// Trim, collapse whitespace runs to one space and lowercase.
///
/// Labels without a single alphanumeric character are rejected.
pub fn normalize_label(label: &str) -> Option<String> {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(collapsed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collapses_and_lowercases() {
        assert_eq!(
            normalize(&json!("  Bayes   Theorem ")),
            Some("bayes theorem".to_string())
        );
        assert_eq!(
            normalize_label("Linear\tAlgebra\n"),
            Some("linear algebra".to_string())
        );
    }

    #[test]
    fn rejects_labels_without_alphanumerics() {
        assert_eq!(normalize(&json!("!!!")), None);
        assert_eq!(normalize(&json!("   ")), None);
        assert_eq!(normalize(&json!("")), None);
        assert_eq!(normalize(&json!("- / -")), None);
    }

    #[test]
    fn non_strings_yield_none() {
        assert_eq!(normalize(&json!(42)), None);
        assert_eq!(normalize(&json!(null)), None);
        assert_eq!(normalize(&json!(["probability"])), None);
        assert_eq!(normalize(&json!({"skill": "probability"})), None);
    }

    #[test]
    fn keeps_inner_punctuation() {
        assert_eq!(normalize_label("C++ Basics"), Some("c++ basics".to_string()));
    }
}
