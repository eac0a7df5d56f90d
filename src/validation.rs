//! Input validation shared by the script API and the repositories.
//!
//! Limits follow classic BBS conventions; everything a caller types passes
//! through here before it reaches storage or another node's screen.

use thiserror::Error;

pub const MAX_USERNAME_LEN: usize = 30;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_REAL_NAME_LEN: usize = 60;
pub const MAX_LOCATION_LEN: usize = 60;
pub const MAX_EMAIL_LEN: usize = 128;
pub const MAX_SUBJECT_LEN: usize = 128;
/// 8 KiB message body cap.
pub const MAX_MESSAGE_LEN: usize = 8192;
pub const MAX_CHAT_LEN: usize = 512;
pub const MAX_FILENAME_LEN: usize = 255;

/// Validation failures with user-presentable messages.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} too long (max {max} characters)")]
    TooLong { field: &'static str, max: usize },

    #[error("username too short (minimum 2 characters)")]
    UsernameTooShort,

    #[error("username contains invalid characters (use letters, numbers, _ or -)")]
    UsernameInvalidChars,

    #[error("password too short (minimum 6 characters)")]
    PasswordTooShort,

    #[error("invalid email format")]
    InvalidEmail,

    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("filename contains path components")]
    FilenamePathComponents,

    #[error("filename contains control characters")]
    FilenameControlChars,
}

fn check_len(value: &str, field: &'static str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Usernames: 2-30 characters from `[A-Za-z0-9_-]`.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    check_len(username, "username", MAX_USERNAME_LEN)?;
    if username.len() < 2 {
        return Err(ValidationError::UsernameTooShort);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::UsernameInvalidChars);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    check_len(password, "password", MAX_PASSWORD_LEN)?;
    if password.len() < 6 {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// Email is optional; when present it needs an `@` with a dotted domain.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Ok(());
    }
    check_len(email, "email", MAX_EMAIL_LEN)?;

    let at = match email.find('@') {
        Some(0) | None => return Err(ValidationError::InvalidEmail),
        Some(i) if i == email.len() - 1 => return Err(ValidationError::InvalidEmail),
        Some(i) => i,
    };
    let domain = &email[at + 1..];
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub fn validate_message_body(body: &str) -> Result<(), ValidationError> {
    check_len(body, "message body", MAX_MESSAGE_LEN)?;
    if body.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "message body",
        });
    }
    Ok(())
}

pub fn validate_chat_message(text: &str) -> Result<(), ValidationError> {
    check_len(text, "chat message", MAX_CHAT_LEN)?;
    if text.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "chat message",
        });
    }
    Ok(())
}

/// Filenames must be bare names: no separators, no `.`/`..`, no control bytes.
pub fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    check_len(filename, "filename", MAX_FILENAME_LEN)?;
    if filename.is_empty() || filename == "." || filename == ".." {
        return Err(ValidationError::FilenamePathComponents);
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(ValidationError::FilenamePathComponents);
    }
    if filename.chars().any(|c| c.is_control()) {
        return Err(ValidationError::FilenameControlChars);
    }
    Ok(())
}

/// Strip control characters (except CR/LF/TAB) before echoing stored text to
/// a terminal.
pub fn sanitize_for_display(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a_b-9").is_ok());
        assert!(validate_username("x").is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("tab\there").is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("").is_ok());
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("@b.c").is_err());
        assert!(validate_email("a@.c").is_err());
    }

    #[test]
    fn filename_rules() {
        assert!(validate_filename("GAME.ZIP").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("a\\b").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("nul\x07bell").is_err());
    }

    #[test]
    fn display_sanitizer_strips_escapes() {
        assert_eq!(sanitize_for_display("hi\x1b[2Jthere\r\n"), "hi[2Jthere\r\n");
    }
}
