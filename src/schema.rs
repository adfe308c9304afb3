//! Schema types for structured output and tool-argument validation.
//!
//! A [`Schema`] is either a declarative tree of typed nodes with a
//! `validate` contract, or raw JSON-schema bytes passed through verbatim
//! when the caller wants full control. Validation errors carry the path of
//! the offending field (`items[2].name`).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Result, WormholeError};

/// Strategy tag for structured output requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StructuredMode {
    /// Hint the model to emit JSON, parse the response text, validate.
    #[default]
    Json,
    /// Synthesize a single tool whose input is the schema; the model's tool
    /// call becomes the structured result.
    Tools,
    /// Ask the provider for native schema-constrained decoding; falls back
    /// to [`StructuredMode::Tools`] when the provider lacks it.
    Strict,
}

/// A schema: a typed node tree, or raw JSON schema passed through verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Declarative tree with a validation contract.
    Node(SchemaNode),
    /// Verbatim JSON schema; validated structurally (type/required/enum)
    /// on the best-effort path, otherwise passed through untouched.
    Raw(Value),
}

impl Schema {
    /// The JSON-schema representation sent to providers.
    pub fn to_json(&self) -> Value {
        match self {
            Schema::Node(node) => node.to_json(),
            Schema::Raw(value) => value.clone(),
        }
    }

    /// Validates a decoded value. Node trees check the full contract; raw
    /// schemas get the structural subset ([`validate_raw`]).
    pub fn validate(&self, value: &Value) -> Result<()> {
        match self {
            Schema::Node(node) => node.validate_at("$", value),
            Schema::Raw(raw) => validate_raw("$", raw, value),
        }
    }
}

impl From<SchemaNode> for Schema {
    fn from(node: SchemaNode) -> Self {
        Schema::Node(node)
    }
}

impl From<Value> for Schema {
    fn from(value: Value) -> Self {
        Schema::Raw(value)
    }
}

/// One node in a declarative schema tree.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wormhole::SchemaNode;
///
/// let schema = SchemaNode::object([
///     ("name", SchemaNode::string()),
///     ("age", SchemaNode::integer().minimum(0.0)),
/// ])
/// .required(["name"]);
///
/// assert!(schema.validate(&json!({"name": "ada", "age": 36})).is_ok());
/// assert!(schema.validate(&json!({"age": -1})).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Object {
        properties: BTreeMap<String, SchemaNode>,
        required: Vec<String>,
    },
    Array {
        items: Box<SchemaNode>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Integer {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Boolean,
    Enum {
        variants: Vec<String>,
    },
}

impl SchemaNode {
    /// An object node from `(name, node)` pairs. Nothing is required until
    /// [`SchemaNode::required`] says so.
    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaNode)>,
        K: Into<String>,
    {
        SchemaNode::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
            required: Vec::new(),
        }
    }

    pub fn array(items: SchemaNode) -> Self {
        SchemaNode::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        }
    }

    pub fn string() -> Self {
        SchemaNode::String {
            min_length: None,
            max_length: None,
        }
    }

    pub fn number() -> Self {
        SchemaNode::Number {
            minimum: None,
            maximum: None,
        }
    }

    pub fn integer() -> Self {
        SchemaNode::Integer {
            minimum: None,
            maximum: None,
        }
    }

    pub fn boolean() -> Self {
        SchemaNode::Boolean
    }

    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SchemaNode::Enum {
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Marks properties as required. Only meaningful on object nodes.
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let SchemaNode::Object { required, .. } = &mut self {
            required.extend(names.into_iter().map(Into::into));
        }
        self
    }

    /// Minimum bound for number/integer nodes; min items for arrays.
    pub fn minimum(mut self, min: f64) -> Self {
        match &mut self {
            SchemaNode::Number { minimum, .. } | SchemaNode::Integer { minimum, .. } => {
                *minimum = Some(min);
            }
            SchemaNode::Array { min_items, .. } => *min_items = Some(min as usize),
            _ => {}
        }
        self
    }

    /// Maximum bound for number/integer nodes; max items for arrays.
    pub fn maximum(mut self, max: f64) -> Self {
        match &mut self {
            SchemaNode::Number { maximum, .. } | SchemaNode::Integer { maximum, .. } => {
                *maximum = Some(max);
            }
            SchemaNode::Array { max_items, .. } => *max_items = Some(max as usize),
            _ => {}
        }
        self
    }

    /// Length bounds for string nodes.
    pub fn length(mut self, min: usize, max: usize) -> Self {
        if let SchemaNode::String {
            min_length,
            max_length,
        } = &mut self
        {
            *min_length = Some(min);
            *max_length = Some(max);
        }
        self
    }

    /// JSON-schema rendering of this node.
    pub fn to_json(&self) -> Value {
        match self {
            SchemaNode::Object {
                properties,
                required,
            } => {
                let props: serde_json::Map<String, Value> = properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                let mut obj = serde_json::json!({
                    "type": "object",
                    "properties": props,
                });
                if !required.is_empty() {
                    obj["required"] = Value::from(required.clone());
                }
                obj
            }
            SchemaNode::Array {
                items,
                min_items,
                max_items,
            } => {
                let mut obj = serde_json::json!({
                    "type": "array",
                    "items": items.to_json(),
                });
                if let Some(n) = min_items {
                    obj["minItems"] = Value::from(*n);
                }
                if let Some(n) = max_items {
                    obj["maxItems"] = Value::from(*n);
                }
                obj
            }
            SchemaNode::String {
                min_length,
                max_length,
            } => {
                let mut obj = serde_json::json!({ "type": "string" });
                if let Some(n) = min_length {
                    obj["minLength"] = Value::from(*n);
                }
                if let Some(n) = max_length {
                    obj["maxLength"] = Value::from(*n);
                }
                obj
            }
            SchemaNode::Number { minimum, maximum } => {
                let mut obj = serde_json::json!({ "type": "number" });
                if let Some(n) = minimum {
                    obj["minimum"] = Value::from(*n);
                }
                if let Some(n) = maximum {
                    obj["maximum"] = Value::from(*n);
                }
                obj
            }
            SchemaNode::Integer { minimum, maximum } => {
                let mut obj = serde_json::json!({ "type": "integer" });
                if let Some(n) = minimum {
                    obj["minimum"] = Value::from(*n);
                }
                if let Some(n) = maximum {
                    obj["maximum"] = Value::from(*n);
                }
                obj
            }
            SchemaNode::Boolean => serde_json::json!({ "type": "boolean" }),
            SchemaNode::Enum { variants } => serde_json::json!({
                "type": "string",
                "enum": variants,
            }),
        }
    }

    /// Validates `value` against this node, reporting the field path on
    /// failure.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<()> {
        match self {
            SchemaNode::Object {
                properties,
                required,
            } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| type_error(path, "object", value))?;
                for name in required {
                    if !obj.contains_key(name) {
                        return Err(WormholeError::validation(format!(
                            "{path}.{name}: required field is missing"
                        )));
                    }
                }
                for (name, node) in properties {
                    if let Some(v) = obj.get(name) {
                        node.validate_at(&format!("{path}.{name}"), v)?;
                    }
                }
                Ok(())
            }
            SchemaNode::Array {
                items,
                min_items,
                max_items,
            } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| type_error(path, "array", value))?;
                if let Some(min) = min_items {
                    if arr.len() < *min {
                        return Err(WormholeError::validation(format!(
                            "{path}: expected at least {min} items, got {}",
                            arr.len()
                        )));
                    }
                }
                if let Some(max) = max_items {
                    if arr.len() > *max {
                        return Err(WormholeError::validation(format!(
                            "{path}: expected at most {max} items, got {}",
                            arr.len()
                        )));
                    }
                }
                for (i, item) in arr.iter().enumerate() {
                    items.validate_at(&format!("{path}[{i}]"), item)?;
                }
                Ok(())
            }
            SchemaNode::String {
                min_length,
                max_length,
            } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| type_error(path, "string", value))?;
                if let Some(min) = min_length {
                    if s.chars().count() < *min {
                        return Err(WormholeError::validation(format!(
                            "{path}: string shorter than {min} characters"
                        )));
                    }
                }
                if let Some(max) = max_length {
                    if s.chars().count() > *max {
                        return Err(WormholeError::validation(format!(
                            "{path}: string longer than {max} characters"
                        )));
                    }
                }
                Ok(())
            }
            SchemaNode::Number { minimum, maximum } => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| type_error(path, "number", value))?;
                check_range(path, n, *minimum, *maximum)
            }
            SchemaNode::Integer { minimum, maximum } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| type_error(path, "integer", value))?;
                check_range(path, n as f64, *minimum, *maximum)
            }
            SchemaNode::Boolean => {
                value
                    .as_bool()
                    .ok_or_else(|| type_error(path, "boolean", value))?;
                Ok(())
            }
            SchemaNode::Enum { variants } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| type_error(path, "string", value))?;
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(WormholeError::validation(format!(
                        "{path}: '{s}' is not one of {variants:?}"
                    )))
                }
            }
        }
    }
}

fn check_range(path: &str, n: f64, minimum: Option<f64>, maximum: Option<f64>) -> Result<()> {
    if let Some(min) = minimum {
        if n < min {
            return Err(WormholeError::validation(format!(
                "{path}: {n} is below minimum {min}"
            )));
        }
    }
    if let Some(max) = maximum {
        if n > max {
            return Err(WormholeError::validation(format!(
                "{path}: {n} is above maximum {max}"
            )));
        }
    }
    Ok(())
}

fn type_error(path: &str, expected: &str, value: &Value) -> WormholeError {
    WormholeError::validation(format!(
        "{path}: expected {expected}, got {}",
        json_type_name(value)
    ))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural validation of a value against a raw JSON schema: `type`,
/// `required`, nested `properties`/`items`, and `enum`. Anything beyond that
/// subset passes; raw schemas exist for callers who want full control, so
/// the crate does not second-guess them.
pub fn validate_raw(path: &str, schema: &Value, value: &Value) -> Result<()> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(type_name) = schema_obj.get("type").and_then(Value::as_str) {
        let matches = match type_name {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(type_error(path, type_name, value));
        }
    }

    if let Some(variants) = schema_obj.get("enum").and_then(Value::as_array) {
        if !variants.contains(value) {
            return Err(WormholeError::validation(format!(
                "{path}: value is not one of the allowed enum variants"
            )));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(WormholeError::validation(format!(
                        "{path}.{name}: required field is missing"
                    )));
                }
            }
        }
        if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
            for (name, sub) in props {
                if let Some(v) = obj.get(name) {
                    validate_raw(&format!("{path}.{name}"), sub, v)?;
                }
            }
        }
    }

    if let (Some(arr), Some(items)) = (value.as_array(), schema_obj.get("items")) {
        for (i, item) in arr.iter().enumerate() {
            validate_raw(&format!("{path}[{i}]"), items, item)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> SchemaNode {
        SchemaNode::object([
            ("name", SchemaNode::string().length(1, 64)),
            ("age", SchemaNode::integer().minimum(0.0).maximum(150.0)),
            ("tags", SchemaNode::array(SchemaNode::string())),
            (
                "status",
                SchemaNode::enumeration(["active", "inactive"]),
            ),
        ])
        .required(["name", "age"])
    }

    #[test]
    fn test_valid_object_passes() {
        let value = json!({"name": "ada", "age": 36, "tags": ["x"], "status": "active"});
        assert!(person().validate(&value).is_ok());
    }

    #[test]
    fn test_missing_required_reports_path() {
        let err = person().validate(&json!({"age": 3})).unwrap_err();
        assert!(err.to_string().contains("$.name"));
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_wrong_type_reports_path_and_types() {
        let err = person()
            .validate(&json!({"name": 7, "age": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("$.name"));
        assert!(err.to_string().contains("expected string"));
    }

    #[test]
    fn test_range_bounds() {
        let err = person()
            .validate(&json!({"name": "x", "age": -1}))
            .unwrap_err();
        assert!(err.to_string().contains("below minimum"));

        let err = person()
            .validate(&json!({"name": "x", "age": 200}))
            .unwrap_err();
        assert!(err.to_string().contains("above maximum"));
    }

    #[test]
    fn test_array_item_path() {
        let schema = SchemaNode::array(SchemaNode::integer());
        let err = schema.validate(&json!([1, 2, "three"])).unwrap_err();
        assert!(err.to_string().contains("$[2]"));
    }

    #[test]
    fn test_enum_rejects_unknown_variant() {
        let err = person()
            .validate(&json!({"name": "x", "age": 1, "status": "gone"}))
            .unwrap_err();
        assert!(err.to_string().contains("$.status"));
    }

    #[test]
    fn test_to_json_shape() {
        let json = person().to_json();
        assert_eq!(json["type"], "object");
        assert_eq!(json["properties"]["name"]["type"], "string");
        assert_eq!(json["properties"]["age"]["type"], "integer");
        assert!(json["required"]
            .as_array()
            .unwrap()
            .contains(&json!("name")));
    }

    #[test]
    fn test_raw_schema_structural_validation() {
        let schema = json!({
            "type": "object",
            "properties": { "n": { "type": "integer" } },
            "required": ["n"],
        });
        assert!(validate_raw("$", &schema, &json!({"n": 2})).is_ok());
        assert!(validate_raw("$", &schema, &json!({})).is_err());
        assert!(validate_raw("$", &schema, &json!({"n": "two"})).is_err());
    }

    #[test]
    fn test_raw_schema_unknown_keywords_pass() {
        let schema = json!({"type": "string", "format": "uuid", "pattern": ".*"});
        assert!(validate_raw("$", &schema, &json!("anything")).is_ok());
    }

    #[test]
    fn test_schema_enum_wrapper() {
        let raw: Schema = json!({"type": "boolean"}).into();
        assert!(raw.validate(&json!(true)).is_ok());
        assert!(raw.validate(&json!("no")).is_err());

        let node: Schema = SchemaNode::boolean().into();
        assert_eq!(node.to_json(), json!({"type": "boolean"}));
    }
}
