use serde::{Deserialize, Serialize};

use super::Id;
use crate::error::{Error, Result};

const MAX_TAG_LEN: usize = 64;

/// A label attached to assets. Names are unique after lower-casing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id,
    pub name: String,
}

impl Tag {
    pub fn new(id: Id, name: String) -> Self {
        Self { id, name }
    }
}

/// Trim and lower-case a tag name, rejecting empty, overlong or control
/// character names.
pub fn normalize_tag_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::invalid_argument("tag name must not be empty"));
    }
    if name.chars().count() > MAX_TAG_LEN {
        return Err(Error::invalid_argument(format!(
            "tag name must be at most {MAX_TAG_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::invalid_argument(
            "tag name must not contain control characters",
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_and_whitespace() {
        assert_eq!(normalize_tag_name("  Long-Term ").unwrap(), "long-term");
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(normalize_tag_name("   ").is_err());
        assert!(normalize_tag_name("a\tb").is_err());
        assert!(normalize_tag_name(&"x".repeat(65)).is_err());
        assert!(normalize_tag_name(&"x".repeat(64)).is_ok());
    }
}
