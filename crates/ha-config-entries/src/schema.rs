//! Form schemas for data entry flows
//!
//! A [`DataSchema`] describes the fields a form step asks for and validates
//! the submitted input before it reaches the step handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entry::EntryData;

/// Validation failure for submitted form input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("required key not provided: {0}")]
    MissingField(String),

    #[error("expected {expected} for '{field}'")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    #[error("value must be one of {options:?} for '{field}'")]
    NotInOptions { field: String, options: Vec<String> },
}

/// Type of a form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    /// Integer > 0
    PositiveInt,
    /// TCP/UDP port, 1..=65535
    Port,
    Boolean,
    /// One of a fixed list of strings
    Select { options: Vec<String> },
}

/// A single form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormField {
    fn check(&self, value: &Value) -> Result<(), SchemaError> {
        let invalid = |expected| SchemaError::InvalidType {
            field: self.name.clone(),
            expected,
        };

        match &self.field_type {
            FieldType::String => {
                value.as_str().ok_or_else(|| invalid("a string"))?;
            }
            FieldType::PositiveInt => match value.as_u64() {
                Some(n) if n > 0 => {}
                _ => return Err(invalid("a positive integer")),
            },
            FieldType::Port => match value.as_u64() {
                Some(n) if n > 0 && n <= u64::from(u16::MAX) => {}
                _ => return Err(invalid("a port number between 1 and 65535")),
            },
            FieldType::Boolean => {
                value.as_bool().ok_or_else(|| invalid("a boolean"))?;
            }
            FieldType::Select { options } => {
                let selected = value.as_str().ok_or_else(|| invalid("a string"))?;
                if !options.iter().any(|o| o == selected) {
                    return Err(SchemaError::NotInOptions {
                        field: self.name.clone(),
                        options: options.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Ordered set of form fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSchema {
    fields: Vec<FormField>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field. A `None` default leaves the field blank in the form.
    pub fn required(mut self, name: &str, field_type: FieldType, default: Option<Value>) -> Self {
        self.fields.push(FormField {
            name: name.to_string(),
            field_type,
            required: true,
            default,
        });
        self
    }

    pub fn optional(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FormField {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
        });
        self
    }

    /// Append the fields of `other`, replacing fields with the same name
    pub fn extend(mut self, other: DataSchema) -> Self {
        for field in other.fields {
            match self.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field,
                None => self.fields.push(field),
            }
        }
        self
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate `input`, returning the cleaned data.
    ///
    /// Missing fields take their default when one is set. Keys that are not
    /// part of the schema are dropped.
    pub fn validate(&self, input: &EntryData) -> Result<EntryData, SchemaError> {
        let mut output = EntryData::new();

        for field in &self.fields {
            match input.get(&field.name) {
                Some(value) => {
                    field.check(value)?;
                    output.insert(field.name.clone(), value.clone());
                }
                None => match (&field.default, field.required) {
                    (Some(default), _) => {
                        output.insert(field.name.clone(), default.clone());
                    }
                    (None, true) => return Err(SchemaError::MissingField(field.name.clone())),
                    (None, false) => {}
                },
            }
        }

        Ok(output)
    }
}
