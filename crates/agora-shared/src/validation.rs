//! Input checks shared by the server (authoritative) and the client
//! (pre-flight before an optimistic send).

use crate::constants::{
    MAX_DISPLAY_NAME_LENGTH, MAX_EMOJI_LENGTH, MAX_PASSWORD_LENGTH, MAX_USERNAME_LENGTH,
    MIN_PASSWORD_LENGTH, MIN_USERNAME_LENGTH, RESERVED_ADMIN_NAME,
};
use crate::error::ValidationError;

/// Check a message body. The body is kept verbatim; only blankness is
/// judged on the trimmed text. Length is counted in characters.
pub fn validate_body(
    body: &str,
    max_len: usize,
    has_attachment: bool,
) -> Result<(), ValidationError> {
    if body.trim().is_empty() && !has_attachment {
        return Err(ValidationError::EmptyMessage);
    }
    let len = body.chars().count();
    if len > max_len {
        return Err(ValidationError::MessageTooLong { len, max: max_len });
    }
    Ok(())
}

/// Trim and check a display name, returning the normalized form.
pub fn normalize_display_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let len = name.chars().count();
    if len > MAX_DISPLAY_NAME_LENGTH {
        return Err(ValidationError::NameTooLong {
            len,
            max: MAX_DISPLAY_NAME_LENGTH,
        });
    }
    Ok(name.to_string())
}

pub fn is_reserved_name(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(RESERVED_ADMIN_NAME)
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    let charset_ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len)
        || !charset_ok
        || is_reserved_name(username)
    {
        return Err(ValidationError::InvalidUsername);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len) {
        return Err(ValidationError::WeakPassword);
    }
    Ok(())
}

pub fn validate_emoji(emoji: &str) -> Result<(), ValidationError> {
    let len = emoji.chars().count();
    if emoji.trim().is_empty() || len > MAX_EMOJI_LENGTH || emoji.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmoji);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_blank_rejected() {
        assert_eq!(validate_body("   ", 500, false), Err(ValidationError::EmptyMessage));
        assert!(validate_body("", 500, true).is_ok());
    }

    #[test]
    fn test_body_length_counts_chars() {
        let body = "é".repeat(500);
        assert!(validate_body(&body, 500, false).is_ok());
        let body = "é".repeat(501);
        assert_eq!(
            validate_body(&body, 500, false),
            Err(ValidationError::MessageTooLong { len: 501, max: 500 })
        );
    }

    #[test]
    fn test_display_name_trimmed() {
        assert_eq!(normalize_display_name("  Alice ").unwrap(), "Alice");
        assert_eq!(normalize_display_name(" "), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_reserved_name_case_insensitive() {
        assert!(is_reserved_name("Admin"));
        assert!(is_reserved_name(" ADMIN "));
        assert!(!is_reserved_name("administrator"));
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("admin").is_err());
    }

    #[test]
    fn test_emoji_rules() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("a b").is_err());
    }
}
