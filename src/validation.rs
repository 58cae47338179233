//! Field-level validation of JSON request bodies.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Field name → human-readable messages, serialized as-is in 400 responses.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub const REQUIRED: &str = "This field is required.";
pub const NOT_NULL: &str = "This field may not be null.";
pub const NOT_BLANK: &str = "This field may not be blank.";
pub const INVALID_NUMBER: &str = "A valid number is required.";
pub const INVALID_STRING: &str = "Not a valid string.";

pub fn add_error(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_owned())
        .or_default()
        .push(message.into());
}

/// One field of a request body, distinguishing "not sent" from "sent as null".
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Missing,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Patch::Missing)
    }

    /// `Missing` → `None`, `Null` → `Some(None)`, `Value(v)` → `Some(Some(v))`.
    pub fn into_change(self) -> Option<Option<T>> {
        match self {
            Patch::Missing => None,
            Patch::Null => Some(None),
            Patch::Value(v) => Some(Some(v)),
        }
    }

    /// Like `into_change`, but an explicit null reads as "not supplied".
    pub fn into_value(self) -> Option<T> {
        match self {
            Patch::Value(v) => Some(v),
            Patch::Missing | Patch::Null => None,
        }
    }
}

/// Adds a "required" error when the field was not supplied at all.
pub fn require<T>(patch: &Patch<T>, field: &str, errors: &mut FieldErrors) {
    if patch.is_missing() {
        add_error(errors, field, REQUIRED);
    }
}

/// Non-null, non-blank text of at most `max_len` characters, trimmed.
/// Numbers are accepted and converted to their decimal form.
pub fn text_field(
    body: &Map<String, Value>,
    field: &str,
    max_len: usize,
    errors: &mut FieldErrors,
) -> Patch<String> {
    let raw = match body.get(field) {
        None => return Patch::Missing,
        Some(Value::Null) => {
            add_error(errors, field, NOT_NULL);
            return Patch::Null;
        }
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            add_error(errors, field, INVALID_STRING);
            return Patch::Missing;
        }
    };

    if raw.is_empty() {
        add_error(errors, field, NOT_BLANK);
        return Patch::Missing;
    }
    if raw.chars().count() > max_len {
        add_error(
            errors,
            field,
            format!("Ensure this field has no more than {max_len} characters."),
        );
        return Patch::Missing;
    }

    Patch::Value(raw)
}

/// Nullable finite number. Numeric strings are accepted.
pub fn number_field(body: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> Patch<f64> {
    let parsed = match body.get(field) {
        None => return Patch::Missing,
        Some(Value::Null) => return Patch::Null,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed.filter(|v| v.is_finite()) {
        Some(v) => Patch::Value(v),
        None => {
            add_error(errors, field, INVALID_NUMBER);
            Patch::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn text_field_states() {
        let mut errors = FieldErrors::new();
        let b = body(json!({ "name": "  System 1 ", "count": 12 }));

        assert_eq!(
            text_field(&b, "name", 512, &mut errors),
            Patch::Value("System 1".to_owned())
        );
        assert_eq!(
            text_field(&b, "count", 512, &mut errors),
            Patch::Value("12".to_owned())
        );
        assert_eq!(text_field(&b, "absent", 512, &mut errors), Patch::Missing);
        assert!(errors.is_empty());
    }

    #[test]
    fn text_field_rejects_null_blank_long_and_wrong_type() {
        let mut errors = FieldErrors::new();
        let b = body(json!({
            "a": null,
            "b": "   ",
            "c": "abcdef",
            "d": true,
        }));

        text_field(&b, "a", 5, &mut errors);
        text_field(&b, "b", 5, &mut errors);
        text_field(&b, "c", 5, &mut errors);
        text_field(&b, "d", 5, &mut errors);

        assert_eq!(errors["a"], vec![NOT_NULL]);
        assert_eq!(errors["b"], vec![NOT_BLANK]);
        assert_eq!(
            errors["c"],
            vec!["Ensure this field has no more than 5 characters."]
        );
        assert_eq!(errors["d"], vec![INVALID_STRING]);
    }

    #[test]
    fn number_field_states() {
        let mut errors = FieldErrors::new();
        let b = body(json!({ "ph": 6.5, "tds": "500", "temperature": null }));

        assert_eq!(number_field(&b, "ph", &mut errors), Patch::Value(6.5));
        assert_eq!(number_field(&b, "tds", &mut errors), Patch::Value(500.0));
        assert_eq!(number_field(&b, "temperature", &mut errors), Patch::Null);
        assert_eq!(number_field(&b, "missing", &mut errors), Patch::Missing);
        assert!(errors.is_empty());
    }

    #[test]
    fn number_field_rejects_garbage() {
        let mut errors = FieldErrors::new();
        let b = body(json!({ "ph": "acidic", "tds": [1], "temperature": "NaN" }));

        number_field(&b, "ph", &mut errors);
        number_field(&b, "tds", &mut errors);
        number_field(&b, "temperature", &mut errors);

        assert_eq!(errors.len(), 3);
        assert!(errors.values().all(|m| m == &vec![INVALID_NUMBER]));
    }

    #[test]
    fn patch_conversions() {
        assert_eq!(Patch::<f64>::Missing.into_change(), None);
        assert_eq!(Patch::<f64>::Null.into_change(), Some(None));
        assert_eq!(Patch::Value(1.0).into_change(), Some(Some(1.0)));
        assert_eq!(Patch::<f64>::Null.into_value(), None);
    }

    #[test]
    fn require_flags_missing_only() {
        let mut errors = FieldErrors::new();
        require(&Patch::<i64>::Missing, "hydroponics", &mut errors);
        require(&Patch::Value(1), "other", &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["hydroponics"], vec![REQUIRED]);
    }
}
