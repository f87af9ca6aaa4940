//! Caller input validation
//!
//! Runs before any store is touched, so a rejected input never changes state.

use crate::error::CeremonyError;

/// Default maximum username length in characters
pub const DEFAULT_MAX_USERNAME_LEN: usize = 64;

/// Validates a username supplied to a begin operation.
///
/// Accepts 1..=`max_len` characters with no whitespace or control characters.
/// Returns the username unchanged on success.
pub fn validate_username(username: &str, max_len: usize) -> Result<&str, CeremonyError> {
    if username.is_empty() {
        return Err(CeremonyError::InvalidArgument(
            "username must not be empty".to_string(),
        ));
    }

    let len = username.chars().count();
    if len > max_len {
        return Err(CeremonyError::InvalidArgument(format!(
            "username is {} characters, maximum is {}",
            len, max_len
        )));
    }

    if username
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(CeremonyError::InvalidArgument(
            "username must not contain whitespace or control characters".to_string(),
        ));
    }

    Ok(username)
}
