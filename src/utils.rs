// ABOUTME: Identifier helpers shared by the storage and config layers
// ABOUTME: Validates collection names and quotes them for embedding in SQL

use anyhow::{bail, Result};

/// Maximum accepted length of a collection name.
const MAX_COLLECTION_NAME_LEN: usize = 128;

/// Validate a collection name before it is used in a query.
///
/// Collection names come from the configuration file and end up inside SQL
/// text (table names cannot be bound as parameters), so only letters, digits
/// and underscores are accepted, and the first character must not be a digit.
///
/// # Examples
///
/// ```
/// # use collection_exporter::utils::validate_collection_name;
/// assert!(validate_collection_name("CraftAction").is_ok());
/// assert!(validate_collection_name("_private").is_ok());
/// assert!(validate_collection_name("1st").is_err());
/// assert!(validate_collection_name("a\"; DROP TABLE b; --").is_err());
/// ```
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Collection name cannot be empty or whitespace-only");
    }

    if name.len() > MAX_COLLECTION_NAME_LEN {
        bail!(
            "Collection name '{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(name),
            MAX_COLLECTION_NAME_LEN,
            name.len()
        );
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        bail!(
            "Collection name '{}' must start with a letter or underscore",
            sanitize_identifier(name)
        );
    }

    if let Some((i, c)) = name
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
    {
        bail!(
            "Collection name '{}' contains invalid character '{}' at position {}. \
             Only letters, digits, and underscores are allowed",
            sanitize_identifier(name),
            if c.is_control() {
                format!("\\x{:02x}", c as u32)
            } else {
                c.to_string()
            },
            i
        );
    }

    Ok(())
}

/// Strip control characters and cap length so a name is safe to print.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote an SQL identifier (table or column).
///
/// Assumes the identifier has already been validated. Escapes embedded quotes
/// and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}
