//! Input validation against schema descriptors.
//!
//! # Responsibilities
//! - Walk the whole value and collect every issue (no fail-fast)
//! - Produce the normalized value: unknown keys stripped, coerced scalars
//! - Convert the normalized value into a typed Rust value on request

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::descriptor::{NumberRules, ObjectSchema, Schema, StringRules, UnknownKeys};

/// Machine-readable reason for an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    Required,
    TooSmall,
    TooBig,
    InvalidEnumValue,
    UnrecognizedKeys,
    InvalidJson,
    /// A response used a status code with no declared schema.
    UndeclaredStatus,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::InvalidType => "invalid_type",
            IssueCode::Required => "required",
            IssueCode::TooSmall => "too_small",
            IssueCode::TooBig => "too_big",
            IssueCode::InvalidEnumValue => "invalid_enum_value",
            IssueCode::UnrecognizedKeys => "unrecognized_keys",
            IssueCode::InvalidJson => "invalid_json",
            IssueCode::UndeclaredStatus => "undeclared_status",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found in a value. `path` is empty for the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
    pub code: IssueCode,
}

impl Issue {
    pub fn new(path: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "(root)" } else { &self.path };
        write!(f, "{}: {} ({})", path, self.message, self.code)
    }
}

pub(crate) fn render_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A rejected value with the full list of issues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation failed with {} issue(s):\n{}", .issues.len(), render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid(Value),
    Invalid(Vec<Issue>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn into_result(self) -> Result<Value, ValidationError> {
        match self {
            ValidationResult::Valid(value) => Ok(value),
            ValidationResult::Invalid(issues) => Err(ValidationError { issues }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Accept string forms of numbers and booleans, and a lone value where an
    /// array is expected. Query strings and path params arrive this way.
    pub coerce_strings: bool,
}

impl ValidateOptions {
    pub fn coercing() -> Self {
        Self { coerce_strings: true }
    }
}

pub fn validate(schema: &Schema, raw: &Value) -> ValidationResult {
    validate_with(schema, raw, ValidateOptions::default())
}

pub fn validate_with(schema: &Schema, raw: &Value, options: ValidateOptions) -> ValidationResult {
    let mut walker = Walker {
        options,
        issues: Vec::new(),
    };
    let normalized = walker.check(schema, raw, "");
    match normalized {
        Some(value) if walker.issues.is_empty() => ValidationResult::Valid(value),
        _ => ValidationResult::Invalid(walker.issues),
    }
}

/// Validate, then deserialize the normalized value into `T`.
pub fn validate_as<T: DeserializeOwned>(
    schema: &Schema,
    raw: &Value,
    options: ValidateOptions,
) -> Result<T, ValidationError> {
    let value = validate_with(schema, raw, options).into_result()?;
    serde_json::from_value(value).map_err(|e| ValidationError {
        issues: vec![Issue::new("", IssueCode::InvalidType, e.to_string())],
    })
}

/// Render a JSON type name the way messages report what was received.
fn received(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn child_index(path: &str, index: usize) -> String {
    format!("{}[{}]", path, index)
}

/// Integral numbers as `i64`/`u64`, so `2.0` reaches typed handlers as `2`.
fn integral(number: serde_json::Number, as_float: f64) -> Option<serde_json::Number> {
    if number.is_i64() || number.is_u64() {
        return Some(number);
    }
    if as_float.fract() != 0.0 {
        return None;
    }
    // 2^63 and 2^64 are exact in f64; the ranges are half-open.
    if (-9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0).contains(&as_float) {
        Some(serde_json::Number::from(as_float as i64))
    } else if (0.0..18_446_744_073_709_551_616.0).contains(&as_float) {
        Some(serde_json::Number::from(as_float as u64))
    } else {
        None
    }
}

fn format_bound(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

struct Walker {
    options: ValidateOptions,
    issues: Vec<Issue>,
}

impl Walker {
    fn push(&mut self, path: &str, code: IssueCode, message: impl Into<String>) {
        self.issues.push(Issue::new(path, code, message));
    }

    fn type_mismatch(&mut self, path: &str, expected: &str, value: &Value) -> Option<Value> {
        self.push(
            path,
            IssueCode::InvalidType,
            format!("Expected {}, received {}", expected, received(value)),
        );
        None
    }

    /// Returns the normalized value when this subtree produced no issues.
    fn check(&mut self, schema: &Schema, value: &Value, path: &str) -> Option<Value> {
        match schema {
            Schema::Any => Some(value.clone()),
            Schema::Nullable(inner) => {
                if value.is_null() {
                    Some(Value::Null)
                } else {
                    self.check(inner, value, path)
                }
            }
            Schema::String(rules) => self.check_string(rules, value, path),
            Schema::Integer(rules) => self.check_number(rules, value, path, true),
            Schema::Number(rules) => self.check_number(rules, value, path, false),
            Schema::Boolean => match value {
                Value::Bool(_) => Some(value.clone()),
                Value::String(s) if self.options.coerce_strings => match s.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => self.type_mismatch(path, "boolean", value),
                },
                _ => self.type_mismatch(path, "boolean", value),
            },
            Schema::Array(items) => match value {
                Value::Array(elements) => {
                    let before = self.issues.len();
                    let out: Vec<Value> = elements
                        .iter()
                        .enumerate()
                        .filter_map(|(i, element)| self.check(items, element, &child_index(path, i)))
                        .collect();
                    (self.issues.len() == before).then_some(Value::Array(out))
                }
                Value::String(_) if self.options.coerce_strings => {
                    let element = self.check(items, value, &child_index(path, 0))?;
                    Some(Value::Array(vec![element]))
                }
                _ => self.type_mismatch(path, "array", value),
            },
            Schema::Object(object) => match value {
                Value::Object(map) => self.check_object(object, map, path),
                _ => self.type_mismatch(path, "object", value),
            },
        }
    }

    fn check_string(&mut self, rules: &StringRules, value: &Value, path: &str) -> Option<Value> {
        let Value::String(s) = value else {
            return self.type_mismatch(path, "string", value);
        };

        let before = self.issues.len();
        if let Some(allowed) = &rules.one_of {
            if !allowed.iter().any(|a| a == s) {
                let expected = allowed
                    .iter()
                    .map(|a| format!("'{}'", a))
                    .collect::<Vec<_>>()
                    .join(" | ");
                self.push(
                    path,
                    IssueCode::InvalidEnumValue,
                    format!("Invalid enum value. Expected {}, received '{}'", expected, s),
                );
            }
        }

        let len = s.chars().count();
        if let Some(min) = rules.min_length {
            if len < min {
                self.push(
                    path,
                    IssueCode::TooSmall,
                    format!("String must contain at least {} character(s)", min),
                );
            }
        }
        if let Some(max) = rules.max_length {
            if len > max {
                self.push(
                    path,
                    IssueCode::TooBig,
                    format!("String must contain at most {} character(s)", max),
                );
            }
        }

        (self.issues.len() == before).then(|| value.clone())
    }

    fn check_number(
        &mut self,
        rules: &NumberRules,
        value: &Value,
        path: &str,
        integer: bool,
    ) -> Option<Value> {
        let expected = if integer { "integer" } else { "number" };

        let number = match value {
            Value::Number(n) => n.clone(),
            Value::String(s) if self.options.coerce_strings => {
                let trimmed = s.trim();
                let parsed = if integer {
                    trimmed.parse::<i64>().ok().map(serde_json::Number::from)
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                };
                match parsed {
                    Some(n) => n,
                    None => return self.type_mismatch(path, expected, value),
                }
            }
            _ => return self.type_mismatch(path, expected, value),
        };

        let Some(as_float) = number.as_f64() else {
            return self.type_mismatch(path, expected, value);
        };
        let number = if integer {
            match integral(number, as_float) {
                Some(n) => n,
                None => return self.type_mismatch(path, expected, value),
            }
        } else {
            number
        };

        let before = self.issues.len();
        if let Some(min) = rules.minimum {
            if as_float < min {
                self.push(
                    path,
                    IssueCode::TooSmall,
                    format!("Number must be greater than or equal to {}", format_bound(min)),
                );
            }
        }
        if let Some(max) = rules.maximum {
            if as_float > max {
                self.push(
                    path,
                    IssueCode::TooBig,
                    format!("Number must be less than or equal to {}", format_bound(max)),
                );
            }
        }

        (self.issues.len() == before).then_some(Value::Number(number))
    }

    fn check_object(
        &mut self,
        object: &ObjectSchema,
        map: &Map<String, Value>,
        path: &str,
    ) -> Option<Value> {
        let before = self.issues.len();
        let mut out = Map::new();

        for field in &object.fields {
            let field_path = child_key(path, &field.name);
            match map.get(&field.name) {
                Some(value) => {
                    if let Some(normalized) = self.check(&field.schema, value, &field_path) {
                        out.insert(field.name.clone(), normalized);
                    }
                }
                None if field.required => {
                    self.push(&field_path, IssueCode::Required, "Required");
                }
                None => {}
            }
        }

        if object.unknown_keys == UnknownKeys::Reject {
            let unknown: Vec<&str> = map
                .keys()
                .filter(|k| object.get(k).is_none())
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                let listed = unknown
                    .iter()
                    .map(|k| format!("'{}'", k))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.push(
                    path,
                    IssueCode::UnrecognizedKeys,
                    format!("Unrecognized key(s) in object: {}", listed),
                );
            }
        }

        (self.issues.len() == before).then_some(Value::Object(out))
    }
}
