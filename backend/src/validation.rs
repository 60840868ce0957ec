//! Request validation helpers for the Leadflow API
//!
//! Field checks shared by the settings document and the automation inputs.

use crate::error::{ApiResult, ValidationBuilder};

/// Email validation
pub mod email {
    /// Basic shape check: one `@`, non-empty local part, dotted domain
    pub fn is_valid(value: &str) -> bool {
        let email = value.trim();
        let mut parts = email.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.contains(char::is_whitespace)
            }
            _ => false,
        }
    }

    pub fn normalize(value: &str) -> String {
        value.trim().to_lowercase()
    }
}

/// Validator builder for multi-field documents
pub struct Validator {
    builder: ValidationBuilder,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            builder: ValidationBuilder::new(),
        }
    }

    /// Add error for a field
    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.builder.push(field, message);
        self
    }

    /// Add error if condition is true
    pub fn error_if(self, condition: bool, field: &str, message: &str) -> Self {
        if condition {
            self.error(field, message)
        } else {
            self
        }
    }

    pub fn required(self, value: &str, field: &str) -> Self {
        let blank = value.trim().is_empty();
        self.error_if(blank, field, &format!("{} is required", field))
    }

    /// Empty values pass; use `required` as well when the field is mandatory
    pub fn email(self, value: &str, field: &str) -> Self {
        let invalid = !value.trim().is_empty() && !email::is_valid(value);
        self.error_if(invalid, field, "Invalid email format")
    }

    pub fn max_length(self, value: &str, field: &str, max: usize) -> Self {
        let too_long = value.chars().count() > max;
        self.error_if(
            too_long,
            field,
            &format!("{} must be {} characters or less", field, max),
        )
    }

    /// Empty values pass
    pub fn http_url(self, value: &str, field: &str) -> Self {
        let invalid = !value.trim().is_empty() && !crate::automation::actions::is_http_url(value);
        self.error_if(invalid, field, "Must be an http(s) URL")
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        !self.builder.has_errors()
    }

    /// Finish validation, returning error if any
    pub fn finish(self) -> ApiResult<()> {
        self.builder.finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
