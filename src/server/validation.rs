//! Request field checks for the activation API.
//!
//! Handlers trim every field first, report all blank fields together as
//! `missing_fields`, then apply the length limits below (`invalid_field`).

use std::fmt;

use crate::server::api_error::ApiError;

pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_REFERENCE_LEN: usize = 128;
pub const MAX_MACHINE_ID_LEN: usize = 128;
pub const MAX_LICENSE_KEY_LEN: usize = 64;
pub const MAX_TOKEN_LEN: usize = 512;

/// Validation error type.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::invalid_field(&err.field, &err.message)
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trimmed value, or `None` when absent or blank.
pub fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Names of the fields whose trimmed value is absent.
///
/// # Example
/// ```
/// use gocbt_license::server::validation::missing_fields;
///
/// let missing = missing_fields(&[("email", Some("a@b.com")), ("reference", Some("  "))]);
/// assert_eq!(missing, vec!["reference"]);
/// ```
pub fn missing_fields<'a>(fields: &[(&'a str, Option<&str>)]) -> Vec<&'a str> {
    fields
        .iter()
        .filter(|(_, value)| trimmed(*value).is_none())
        .map(|(name, _)| *name)
        .collect()
}

/// Validate string length, in characters.
pub fn validate_length(value: &str, field_name: &str, max: usize) -> ValidationResult<()> {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError {
            field: field_name.to_string(),
            message: format!("must be at most {} characters (got {})", max, len),
        });
    }
    Ok(())
}

/// Validate that a value has no control characters.
///
/// Machine ids and references end up inside `|`-separated token payloads and
/// log lines.
pub fn validate_printable(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.chars().any(char::is_control) {
        return Err(ValidationError {
            field: field_name.to_string(),
            message: "contains control characters".to_string(),
        });
    }
    Ok(())
}

/// Machine ids may not contain the token payload separator.
pub fn validate_machine_id(value: &str, field_name: &str) -> ValidationResult<()> {
    validate_length(value, field_name, MAX_MACHINE_ID_LEN)?;
    validate_printable(value, field_name)?;
    if value.contains('|') {
        return Err(ValidationError {
            field: field_name.to_string(),
            message: "cannot contain '|'".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed() {
        assert_eq!(trimmed(Some("  ref_1 ")), Some("ref_1"));
        assert_eq!(trimmed(Some("   ")), None);
        assert_eq!(trimmed(None), None);
    }

    #[test]
    fn test_missing_fields_keeps_order() {
        let missing = missing_fields(&[
            ("email", None),
            ("reference", Some("ref_123")),
            ("machine_id", Some("")),
        ]);
        assert_eq!(missing, vec!["email", "machine_id"]);
    }

    #[test]
    fn test_validate_length() {
        assert!(validate_length("abc", "f", 3).is_ok());
        let err = validate_length("abcd", "f", 3).unwrap_err();
        assert_eq!(err.field, "f");
        assert!(err.message.contains("at most 3"));
        // counts characters, not bytes
        assert!(validate_length("ééé", "f", 3).is_ok());
    }

    #[test]
    fn test_validate_machine_id() {
        assert!(validate_machine_id("3f2a9c", "machine_id").is_ok());
        assert!(validate_machine_id("a|b", "machine_id").is_err());
        assert!(validate_machine_id("a\nb", "machine_id").is_err());
        assert!(validate_machine_id(&"x".repeat(129), "machine_id").is_err());
    }

    #[test]
    fn test_validation_error_into_api_error() {
        let err = ValidationError {
            field: "email".to_string(),
            message: "too long".to_string(),
        };
        assert_eq!(err.to_string(), "email: too long");
        let api: ApiError = err.into();
        assert_eq!(api.code, crate::server::api_error::ErrorCode::InvalidField);
        assert!(api.message.contains("email"));
    }
}
