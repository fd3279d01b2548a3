//! Shared coercion utilities for untrusted model output.
//!
//! Every AI response is treated as an untyped, partially-trusted payload:
//! each field is individually type-checked, range-clamped, and defaulted
//! rather than rejected. All four coercion sites (analysis, semantic
//! validation, route classification, structured payload) build on these
//! helpers.

use serde_json::Value;

/// Clamps a confidence-like value into `[0, 1]`.
pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Reads a string field, or `None` when absent or not a string.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reads a string field, rejecting empty/whitespace-only values.
pub fn non_empty_str_field(value: &Value, key: &str) -> Option<String> {
    str_field(value, key).filter(|s| !s.trim().is_empty())
}

/// Reads a finite numeric field.
pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
}

/// Reads a boolean field, treating anything non-boolean as `false`.
pub fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Reads a confidence field: clamped when numeric, `default` otherwise.
pub fn confidence_field(value: &Value, key: &str, default: f64) -> f64 {
    match f64_field(value, key) {
        Some(n) => clamp01(n),
        None => default,
    }
}

/// Reads an array of strings, silently dropping non-string entries.
pub fn str_array_field(value: &Value, key: &str) -> Option<Vec<String>> {
    value.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Normalizes a date to `YYYY-MM-DD` where derivable.
///
/// Accepts ISO dates as-is and rearranges `DD/MM/YYYY`; anything else is
/// unknown and becomes `None` (never a guess).
pub fn normalize_date(value: &Value) -> Option<String> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() || !raw.is_ascii() {
        return None;
    }

    let bytes = raw.as_bytes();
    if raw.len() == 10 && bytes[4] == b'-' && bytes[7] == b'-' {
        if all_digits(&raw[..4]) && all_digits(&raw[5..7]) && all_digits(&raw[8..10]) {
            return Some(raw.to_string());
        }
    }

    if raw.len() == 10 && bytes[2] == b'/' && bytes[5] == b'/' {
        let (dd, mm, yyyy) = (&raw[..2], &raw[3..5], &raw[6..10]);
        if all_digits(dd) && all_digits(mm) && all_digits(yyyy) {
            return Some(format!("{}-{}-{}", yyyy, mm, dd));
        }
    }

    None
}

/// Normalizes an amount to a finite `f64`.
///
/// Numbers pass through; strings are read as Brazilian-formatted values
/// (`1.234,56`) with any currency symbols stripped.
pub fn normalize_amount(value: &Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return n.is_finite().then_some(n);
    }

    let raw = value.as_str()?;
    let normalized: String = raw
        .replace('.', "")
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamp01_bounds() {
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp01(0.42), 0.42);
        assert_eq!(clamp01(3.7), 1.0);
    }

    #[test]
    fn test_confidence_field_defaults_on_non_numeric() {
        let value = json!({"confidence": "alta"});
        assert_eq!(confidence_field(&value, "confidence", 0.5), 0.5);
        let value = json!({"confidence": 1.8});
        assert_eq!(confidence_field(&value, "confidence", 0.5), 1.0);
        let value = json!({});
        assert_eq!(confidence_field(&value, "confidence", 0.3), 0.3);
    }

    #[test]
    fn test_str_field_rejects_non_strings() {
        let value = json!({"name": 42, "bank": "Banco X"});
        assert_eq!(str_field(&value, "name"), None);
        assert_eq!(str_field(&value, "bank"), Some("Banco X".to_string()));
    }

    #[test]
    fn test_non_empty_str_field() {
        let value = json!({"a": "  ", "b": "x"});
        assert_eq!(non_empty_str_field(&value, "a"), None);
        assert_eq!(non_empty_str_field(&value, "b"), Some("x".to_string()));
    }

    #[test]
    fn test_str_array_field_drops_non_strings() {
        let value = json!({"tags": ["a", 1, null, "b"]});
        assert_eq!(
            str_array_field(&value, "tags"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_normalize_date_iso_passthrough() {
        assert_eq!(
            normalize_date(&json!("2026-03-15")),
            Some("2026-03-15".to_string())
        );
    }

    #[test]
    fn test_normalize_date_brazilian_format() {
        assert_eq!(
            normalize_date(&json!("15/03/2026")),
            Some("2026-03-15".to_string())
        );
    }

    #[test]
    fn test_normalize_date_rejects_other_shapes() {
        assert_eq!(normalize_date(&json!("March 15, 2026")), None);
        assert_eq!(normalize_date(&json!("2026/03/15")), None);
        assert_eq!(normalize_date(&json!(20260315)), None);
        assert_eq!(normalize_date(&json!("")), None);
    }

    #[test]
    fn test_normalize_amount_number_passthrough() {
        assert_eq!(normalize_amount(&json!(1234.56)), Some(1234.56));
        assert_eq!(normalize_amount(&json!(-10)), Some(-10.0));
    }

    #[test]
    fn test_normalize_amount_brazilian_string() {
        assert_eq!(normalize_amount(&json!("1.234,56")), Some(1234.56));
        assert_eq!(normalize_amount(&json!("R$ 99,90")), Some(99.90));
        assert_eq!(normalize_amount(&json!("-1.000,00")), Some(-1000.0));
    }

    #[test]
    fn test_normalize_amount_rejects_garbage() {
        assert_eq!(normalize_amount(&json!("n/a")), None);
        assert_eq!(normalize_amount(&json!(null)), None);
    }
}
