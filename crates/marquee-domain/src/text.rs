//! Normalization of human-entered keys (role names, usernames, emails).

use thiserror::Error;

/// Error returned when a key is empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must not be blank")]
pub struct BlankKey {
    pub field: &'static str,
}

/// Trim surrounding whitespace and lowercase.
///
/// Two keys are considered the same entity name iff their normalized forms
/// are equal.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Like [`normalize_key`] but rejects keys that are blank after trimming.
pub fn normalize_required(field: &'static str, raw: &str) -> Result<String, BlankKey> {
    let key = normalize_key(raw);
    if key.is_empty() {
        return Err(BlankKey { field });
    }
    Ok(key)
}

/// Case-insensitive substring match against an already normalized needle.
pub fn contains_normalized(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(needle)
}
