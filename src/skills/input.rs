//! Field checks shared by skill `validate` implementations.

use serde_json::Value;

use crate::skills::skill::{FieldError, ValidationResult};

/// Look up a dotted path (`financials.monthly_cost`) in a JSON value.
pub fn lookup<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(input, |value, key| value.get(key))
        .filter(|value| !value.is_null())
}

/// Read a number, also accepting numeric strings like `"1,250.00"` or `"$80"`.
pub fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| *c != '$' && *c != ',').collect();
            cleaned.trim().parse().ok()
        }
        _ => None,
    }
}

/// Accumulates field errors against one input document.
pub struct FieldChecks<'a> {
    input: &'a Value,
    errors: Vec<FieldError>,
}

impl<'a> FieldChecks<'a> {
    pub fn new(input: &'a Value) -> Self {
        let mut errors = Vec::new();
        if !input.is_object() {
            errors.push(FieldError::new("input", "must be an object", "INVALID_TYPE"));
        }
        Self { input, errors }
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Required finite number.
    pub fn number(&mut self, path: &str) -> Option<f64> {
        match lookup(self.input, path) {
            None => {
                self.errors.push(FieldError::required(path));
                None
            }
            Some(value) => match value.as_f64().filter(|n| n.is_finite()) {
                Some(n) => Some(n),
                None => {
                    self.errors
                        .push(FieldError::new(path, "must be a number", "INVALID_TYPE"));
                    None
                }
            },
        }
    }

    /// Optional finite number; present but non-numeric is an error.
    pub fn optional_number(&mut self, path: &str) -> Option<f64> {
        lookup(self.input, path)?;
        self.number(path)
    }

    /// Required number strictly greater than zero.
    pub fn positive(&mut self, path: &str) -> Option<f64> {
        let n = self.number(path)?;
        if n <= 0.0 {
            self.errors
                .push(FieldError::new(path, "must be positive", "OUT_OF_RANGE"));
            return None;
        }
        Some(n)
    }

    /// Required number that is zero or more.
    pub fn non_negative(&mut self, path: &str) -> Option<f64> {
        let n = self.number(path)?;
        if n < 0.0 {
            self.errors
                .push(FieldError::new(path, "must not be negative", "OUT_OF_RANGE"));
            return None;
        }
        Some(n)
    }

    /// Required number within `min..=max`.
    pub fn within(&mut self, path: &str, min: f64, max: f64) -> Option<f64> {
        let n = self.number(path)?;
        if n < min || n > max {
            self.errors.push(FieldError::new(
                path,
                format!("must be between {min} and {max}"),
                "OUT_OF_RANGE",
            ));
            return None;
        }
        Some(n)
    }

    /// Required non-empty string.
    pub fn string(&mut self, path: &str) -> Option<&'a str> {
        match lookup(self.input, path) {
            None => {
                self.errors.push(FieldError::required(path));
                None
            }
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            Some(Value::String(_)) => {
                self.errors.push(FieldError::required(path));
                None
            }
            Some(_) => {
                self.errors
                    .push(FieldError::new(path, "must be a string", "INVALID_TYPE"));
                None
            }
        }
    }

    /// Optional array; present but not an array is an error.
    pub fn optional_array(&mut self, path: &str) -> Option<&'a Vec<Value>> {
        match lookup(self.input, path)? {
            Value::Array(items) => Some(items),
            _ => {
                self.errors
                    .push(FieldError::new(path, "must be an array", "INVALID_TYPE"));
                None
            }
        }
    }

    /// Optional boolean; present but not a boolean is an error.
    pub fn optional_bool(&mut self, path: &str) -> Option<bool> {
        match lookup(self.input, path)? {
            Value::Bool(b) => Some(*b),
            _ => {
                self.errors
                    .push(FieldError::new(path, "must be a boolean", "INVALID_TYPE"));
                None
            }
        }
    }

    /// Optional string that must be one of `allowed` (ASCII case-insensitive).
    pub fn optional_one_of(&mut self, path: &str, allowed: &[&str]) -> Option<&'a str> {
        match lookup(self.input, path)? {
            Value::String(s) if allowed.iter().any(|a| a.eq_ignore_ascii_case(s)) => Some(s.as_str()),
            _ => {
                self.errors.push(FieldError::new(
                    path,
                    format!("must be one of: {}", allowed.join(", ")),
                    "INVALID_VALUE",
                ));
                None
            }
        }
    }

    pub fn finish(self) -> ValidationResult {
        ValidationResult::from_errors(self.errors)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dotted_lookup() {
        let input = json!({"a": {"b": {"c": 3}}, "n": null});
        assert_eq!(lookup(&input, "a.b.c"), Some(&json!(3)));
        assert!(lookup(&input, "a.x").is_none());
        assert!(lookup(&input, "n").is_none());
    }

    #[test]
    fn amounts_accept_strings() {
        assert_eq!(as_amount(&json!("1,250.00")), Some(1250.0));
        assert_eq!(as_amount(&json!("$80")), Some(80.0));
        assert_eq!(as_amount(&json!(12.5)), Some(12.5));
        assert_eq!(as_amount(&json!("n/a")), None);
    }

    #[test]
    fn collects_every_problem() {
        let input = json!({"units": 0, "name": "", "fee": "x", "docs": 3});
        let mut checks = FieldChecks::new(&input);
        checks.positive("units");
        checks.string("name");
        checks.number("fee");
        checks.number("missing");
        checks.optional_array("docs");
        assert!(checks.optional_number("absent").is_none());
        let result = checks.finish();
        assert!(!result.is_valid());
        let codes: Vec<&str> = result.errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["OUT_OF_RANGE", "REQUIRED", "INVALID_TYPE", "REQUIRED", "INVALID_TYPE"]
        );
    }

    #[test]
    fn one_of_ignores_case_and_rejects_others() {
        let input = json!({"frequency": "Seasonal", "kind": "weekly"});
        let mut checks = FieldChecks::new(&input);
        assert_eq!(checks.optional_one_of("frequency", &["seasonal", "consistent"]), Some("Seasonal"));
        assert_eq!(checks.optional_one_of("kind", &["seasonal", "consistent"]), None);
        assert_eq!(checks.optional_one_of("missing", &["seasonal"]), None);

        let result = checks.finish();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "INVALID_VALUE");
    }

    #[test]
    fn non_object_input_is_invalid() {
        assert!(!FieldChecks::new(&json!([1, 2])).finish().is_valid());
    }
}
