//! Identifier validation for SQL the bridge generates itself.
//!
//! Table and column names coming from configuration or request documents are
//! interpolated into generated statements, so they are restricted to plain
//! identifiers before they reach the query builder.

use crate::error::Error;

/// Validate a SQL identifier (table, schema, column names).
///
/// Rules:
/// - Must not be empty
/// - Maximum 255 characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use sqlbridge_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users").is_ok());
/// assert!(validate_sql_identifier("my_table_123").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// // Rejects injection attempts
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Parse a table name that may be qualified as `schema.table`.
///
/// ```
/// use sqlbridge_rdbc::security::parse_table_name;
///
/// assert_eq!(parse_table_name("users").unwrap(), (None, "users"));
/// assert_eq!(parse_table_name("app.users").unwrap(), (Some("app"), "users"));
/// assert!(parse_table_name("a.b.c").is_err());
/// ```
pub fn parse_table_name(name: &str) -> crate::Result<(Option<&str>, &str)> {
    match name.split_once('.') {
        Some((schema, table)) => {
            validate_sql_identifier(schema)?;
            validate_sql_identifier(table)?;
            Ok((Some(schema), table))
        }
        None => {
            validate_sql_identifier(name)?;
            Ok((None, name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("users").is_ok());
        assert!(validate_sql_identifier("Users").is_ok());
        assert!(validate_sql_identifier("_tmp").is_ok());
        assert!(validate_sql_identifier("order_items_2024").is_ok());
    }

    #[test]
    fn test_too_long_identifier() {
        let long = "a".repeat(256);
        assert!(validate_sql_identifier(&long).is_err());
        let max = "a".repeat(255);
        assert!(validate_sql_identifier(&max).is_ok());
    }

    #[test]
    fn test_injection_attempts() {
        for attempt in [
            "users; DROP TABLE users",
            "users--",
            "users/*",
            "users'",
            "users\"",
            "users OR 1=1",
            "1users",
        ] {
            assert!(
                validate_sql_identifier(attempt).is_err(),
                "accepted {attempt:?}"
            );
        }
    }

    #[test]
    fn test_parse_table_name() {
        assert_eq!(parse_table_name("events").unwrap(), (None, "events"));
        assert_eq!(
            parse_table_name("audit.events").unwrap(),
            (Some("audit"), "events")
        );
        assert!(parse_table_name(".events").is_err());
        assert!(parse_table_name("audit.").is_err());
        assert!(parse_table_name("a.b.c").is_err());
    }
}
