use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use strum::IntoEnumIterator;

use crate::{error::Error, message::Partition};

const MAX_NAME_LEN: usize = 64;

/// A registered sender of inbound messages.
///
/// Every message references exactly one source. The name doubles as a directory
/// name under the archive root, so it is restricted to a filesystem-safe alphabet.
#[derive(Serialize, Deserialize, FromRow, Debug, Clone)]
pub struct Source {
    /// Unique identifier for the source
    pub id: i64,
    /// Unique, immutable name (e.g. `LAB1`)
    pub name: String,
    /// Free-form description; the only mutable attribute
    pub description: String,
}

/// Sources are equal if they have the same ID.
impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_parameter(format!(
            "source name must be 1 to {MAX_NAME_LEN} characters"
        )));
    }
    // Submissions are posted to /messages/{source}, which shares its path with the
    // partition listings.
    if Partition::iter().any(|p| p.as_ref().eq_ignore_ascii_case(name)) {
        return Err(Error::invalid_parameter(format!(
            "source name {name:?} is reserved"
        )));
    }
    if name.starts_with('.') {
        return Err(Error::invalid_parameter(
            "source name must not start with '.'",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::invalid_parameter(format!(
            "source name {name:?} contains invalid characters (allowed: a-z, A-Z, 0-9, '.', '-', '_')"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_name;

    #[test]
    fn names_are_path_safe() {
        assert!(validate_name("LAB1").is_ok());
        assert!(validate_name("adt.main-feed_2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(65)).is_err());
        assert!(validate_name("queue").is_err());
        assert!(validate_name("Archive").is_err());
        assert!(validate_name("errors").is_ok());
    }
}
