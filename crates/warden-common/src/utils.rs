//! Utility functions for Warden

use std::sync::LazyLock;

/// Pattern for table, schema and index names spliced into DDL
static IDENTIFIER_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new("^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("Invalid regex pattern")
});

/// Validate a SQL identifier before it is interpolated into a statement
///
/// # Examples
///
/// ```
/// use warden_common::is_valid_identifier;
///
/// assert!(is_valid_identifier("distributed_locks"));
/// assert!(!is_valid_identifier("locks; DROP TABLE users"));
/// assert!(!is_valid_identifier("1locks"));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(name)
}
