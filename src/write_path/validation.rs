//! Required-field validation

use crate::record::{Attributes, ValidationError};

/// Checks attribute presence against a configured field enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordValidator {
    required_fields: Vec<String>,
}

impl Default for RecordValidator {
    fn default() -> Self {
        RecordValidator::new(vec!["name".to_string()])
    }
}

impl RecordValidator {
    pub fn new(required_fields: Vec<String>) -> Self {
        RecordValidator { required_fields }
    }

    /// Accept any attribute set
    pub fn permissive() -> Self {
        RecordValidator::new(Vec::new())
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// First missing or empty required field, in configured order
    pub fn validate(&self, attributes: &Attributes) -> Result<(), ValidationError> {
        match self
            .required_fields
            .iter()
            .find(|field| !attributes.has_value(field))
        {
            Some(field) => Err(ValidationError::MissingField(field.clone())),
            None => Ok(()),
        }
    }
}
