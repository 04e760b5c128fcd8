//! Declarative schema descriptors.
//!
//! Descriptors are plain immutable values. The validator walks them to check
//! data, and `to_json_schema` projects them for documentation, so both views
//! always describe the same shape.

use serde_json::{json, Map, Value};

/// Shape of an accepted or produced value.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Accepts anything, including null.
    Any,
    String(StringRules),
    Integer(NumberRules),
    Number(NumberRules),
    Boolean,
    Array(Box<Schema>),
    Object(ObjectSchema),
    /// The inner shape, or null.
    Nullable(Box<Schema>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Allowed values, when the string is an enumeration.
    pub one_of: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberRules {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

/// What to do with object keys the descriptor does not name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownKeys {
    /// Drop them from the validated value.
    #[default]
    Strip,
    /// Report them as `unrecognized_keys`.
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

/// Named fields plus the unknown-key policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSchema {
    pub fields: Vec<Field>,
    pub unknown_keys: UnknownKeys,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn field(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(Field {
            name: name.into(),
            schema,
            required: true,
        });
        self
    }

    /// Add a field that may be absent.
    pub fn optional(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(Field {
            name: name.into(),
            schema,
            required: false,
        });
        self
    }

    /// Reject keys that are not declared.
    pub fn strict(mut self) -> Self {
        self.unknown_keys = UnknownKeys::Reject;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl From<ObjectSchema> for Schema {
    fn from(object: ObjectSchema) -> Self {
        Schema::Object(object)
    }
}

impl Schema {
    pub fn any() -> Self {
        Schema::Any
    }

    pub fn string() -> Self {
        Schema::String(StringRules::default())
    }

    /// A string restricted to the given values.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::String(StringRules {
            one_of: Some(values.into_iter().map(Into::into).collect()),
            ..StringRules::default()
        })
    }

    pub fn integer() -> Self {
        Schema::Integer(NumberRules::default())
    }

    pub fn number() -> Self {
        Schema::Number(NumberRules::default())
    }

    pub fn boolean() -> Self {
        Schema::Boolean
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array(Box::new(items))
    }

    pub fn object(object: ObjectSchema) -> Self {
        Schema::Object(object)
    }

    pub fn nullable(self) -> Self {
        match self {
            Schema::Nullable(_) | Schema::Any => self,
            other => Schema::Nullable(Box::new(other)),
        }
    }

    /// Minimum length for strings. Ignored on other kinds.
    #[must_use]
    pub fn min_length(mut self, n: usize) -> Self {
        if let Some(rules) = self.string_rules_mut() {
            rules.min_length = Some(n);
        }
        self
    }

    /// Maximum length for strings. Ignored on other kinds.
    #[must_use]
    pub fn max_length(mut self, n: usize) -> Self {
        if let Some(rules) = self.string_rules_mut() {
            rules.max_length = Some(n);
        }
        self
    }

    /// Inclusive lower bound for numbers. Ignored on other kinds.
    #[must_use]
    pub fn min(mut self, value: f64) -> Self {
        if let Some(rules) = self.number_rules_mut() {
            rules.minimum = Some(value);
        }
        self
    }

    /// Inclusive upper bound for numbers. Ignored on other kinds.
    #[must_use]
    pub fn max(mut self, value: f64) -> Self {
        if let Some(rules) = self.number_rules_mut() {
            rules.maximum = Some(value);
        }
        self
    }

    fn string_rules_mut(&mut self) -> Option<&mut StringRules> {
        match self {
            Schema::String(rules) => Some(rules),
            Schema::Nullable(inner) => inner.string_rules_mut(),
            _ => None,
        }
    }

    fn number_rules_mut(&mut self) -> Option<&mut NumberRules> {
        match self {
            Schema::Integer(rules) | Schema::Number(rules) => Some(rules),
            Schema::Nullable(inner) => inner.number_rules_mut(),
            _ => None,
        }
    }

    /// Name used in type-mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Schema::Any => "any",
            Schema::String(_) => "string",
            Schema::Integer(_) => "integer",
            Schema::Number(_) => "number",
            Schema::Boolean => "boolean",
            Schema::Array(_) => "array",
            Schema::Object(_) => "object",
            Schema::Nullable(inner) => inner.type_name(),
        }
    }

    /// Project to a JSON Schema (OpenAPI 3 flavour, `nullable` keyword).
    pub fn to_json_schema(&self) -> Value {
        match self {
            Schema::Any => json!({}),
            Schema::String(rules) => {
                let mut out = Map::new();
                out.insert("type".into(), json!("string"));
                if let Some(n) = rules.min_length {
                    out.insert("minLength".into(), json!(n));
                }
                if let Some(n) = rules.max_length {
                    out.insert("maxLength".into(), json!(n));
                }
                if let Some(values) = &rules.one_of {
                    out.insert("enum".into(), json!(values));
                }
                Value::Object(out)
            }
            Schema::Integer(rules) | Schema::Number(rules) => {
                let mut out = Map::new();
                out.insert("type".into(), json!(self.type_name()));
                if let Some(min) = rules.minimum {
                    out.insert("minimum".into(), json!(min));
                }
                if let Some(max) = rules.maximum {
                    out.insert("maximum".into(), json!(max));
                }
                Value::Object(out)
            }
            Schema::Boolean => json!({ "type": "boolean" }),
            Schema::Array(items) => json!({ "type": "array", "items": items.to_json_schema() }),
            Schema::Object(object) => {
                let properties: Map<String, Value> = object
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.schema.to_json_schema()))
                    .collect();
                let required: Vec<&str> = object
                    .fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.name.as_str())
                    .collect();

                let mut out = Map::new();
                out.insert("type".into(), json!("object"));
                out.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    out.insert("required".into(), json!(required));
                }
                out.insert(
                    "additionalProperties".into(),
                    json!(object.unknown_keys == UnknownKeys::Strip),
                );
                Value::Object(out)
            }
            Schema::Nullable(inner) => {
                let mut projected = inner.to_json_schema();
                if let Value::Object(map) = &mut projected {
                    map.insert("nullable".into(), json!(true));
                }
                projected
            }
        }
    }
}
