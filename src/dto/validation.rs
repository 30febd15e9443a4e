//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted group or user identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;
/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Validates a group or user identifier: non-blank, bounded, no whitespace or control characters.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("smith-family") // Ok
/// validate_identifier("smith family") // Err - whitespace
/// validate_identifier("")             // Err - empty
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some(
            format!(
                "identifier must be 1 to {MAX_IDENTIFIER_LEN} bytes long (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("identifier must not contain whitespace or control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display name: non-blank and at most [`MAX_DISPLAY_NAME_LEN`] characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("display name must not be blank".into());
        return Err(err);
    }

    let length = name.chars().count();
    if length > MAX_DISPLAY_NAME_LEN {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("display name must be at most {MAX_DISPLAY_NAME_LEN} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if name.chars().any(char::is_control) {
        let mut err = ValidationError::new("display_name_format");
        err.message = Some("display name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}
