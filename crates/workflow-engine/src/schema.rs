//! Config field schemas for block definitions
//!
//! Each block definition carries a list of [`ConfigField`]s. A field knows
//! its value type, whether it is required, its default, and an optional
//! [`FieldRule`]. Two checks are exposed:
//!
//! - [`ConfigField::check_value`] validates a value's shape and rule. The
//!   graph model runs it on every config edit.
//! - [`ConfigField::check_required`] additionally rejects absent or empty
//!   values. Only the validator runs it, so freshly added blocks with empty
//!   defaults are accepted and reported later.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Editor widget and value type of a config field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    /// One of `options`
    Select,
    /// A list drawn from `options`
    Multiselect,
    Number,
    Boolean,
    /// Multi-line source (scripts, YAML snippets)
    Code,
    /// A secret reference such as `${{ secrets.NAME }}`
    Secret,
}

/// A regex kept as source text and compiled on first use
#[derive(Clone)]
pub struct Pattern {
    source: String,
    compiled: OnceLock<Result<Regex, String>>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiled: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn regex(&self) -> Result<&Regex, String> {
        self.compiled
            .get_or_init(|| Regex::new(&self.source).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| format!("invalid pattern: {}", e))
    }

    pub fn is_match(&self, s: &str) -> Result<bool, String> {
        Ok(self.regex()?.is_match(s))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Extra validation applied to a present, non-empty value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    /// Regex a string value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    /// Inclusive lower bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// String value must parse as a YAML mapping
    #[serde(default)]
    pub yaml_mapping: bool,
}

/// A single configurable field of a block type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<FieldRule>,
}

impl ConfigField {
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            required: false,
            default: None,
            options: Vec::new(),
            rule: None,
        }
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Set the allowed options (select / multiselect)
    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    /// Require string values to match a regex
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.rule.get_or_insert_with(FieldRule::default).pattern = Some(Pattern::new(pattern));
        self
    }

    /// Bound numeric values (inclusive)
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        let rule = self.rule.get_or_insert_with(FieldRule::default);
        rule.min = min;
        rule.max = max;
        self
    }

    /// Require string values to parse as a YAML mapping
    pub fn yaml_mapping(mut self) -> Self {
        self.rule.get_or_insert_with(FieldRule::default).yaml_mapping = true;
        self
    }

    /// Check a value's type and rule
    ///
    /// Empty strings and empty lists pass; presence is checked separately
    /// by [`check_required`](Self::check_required).
    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        match self.field_type {
            FieldType::Text | FieldType::Textarea | FieldType::Code | FieldType::Secret => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("expected a string, got {}", type_name(value)))?;
                if !s.trim().is_empty() {
                    self.check_string_rule(s)?;
                }
            }
            FieldType::Select => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("expected a string, got {}", type_name(value)))?;
                if !s.is_empty() || !self.options.iter().any(|o| o.is_empty()) {
                    self.check_option(s)?;
                }
            }
            FieldType::Multiselect => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected a list, got {}", type_name(value)))?;
                for item in items {
                    let s = item
                        .as_str()
                        .ok_or_else(|| format!("expected string items, got {}", type_name(item)))?;
                    self.check_option(s)?;
                }
            }
            FieldType::Number => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {}", type_name(value)))?;
                if let Some(rule) = &self.rule {
                    if let Some(min) = rule.min {
                        if n < min {
                            return Err(format!("{} is below the minimum {}", n, min));
                        }
                    }
                    if let Some(max) = rule.max {
                        if n > max {
                            return Err(format!("{} is above the maximum {}", n, max));
                        }
                    }
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    return Err(format!("expected a boolean, got {}", type_name(value)));
                }
            }
        }
        Ok(())
    }

    /// Check presence (for required fields) and then the value itself
    pub fn check_required(&self, value: Option<&Value>) -> Result<(), String> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return if self.required {
                Err("required field is missing".to_string())
            } else {
                Ok(())
            };
        };

        if self.required && is_empty(value) {
            return Err("required field is empty".to_string());
        }

        self.check_value(value)
    }

    fn check_option(&self, s: &str) -> Result<(), String> {
        if self.options.is_empty() || self.options.iter().any(|o| o == s) {
            Ok(())
        } else {
            Err(format!(
                "'{}' is not one of [{}]",
                s,
                self.options.join(", ")
            ))
        }
    }

    fn check_string_rule(&self, s: &str) -> Result<(), String> {
        let Some(rule) = &self.rule else {
            return Ok(());
        };

        if let Some(pattern) = &rule.pattern {
            if !pattern.is_match(s)? {
                return Err(format!("'{}' does not match {}", s, pattern));
            }
        }

        if rule.yaml_mapping {
            let parsed: serde_yaml_ng::Value =
                serde_yaml_ng::from_str(s).map_err(|e| format!("invalid YAML: {}", e))?;
            if !parsed.is_mapping() {
                return Err("expected a YAML mapping".to_string());
            }
        }

        Ok(())
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
