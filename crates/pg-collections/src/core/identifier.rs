//! Identifier validation and quoting.
//!
//! Identifiers (table and column names) cannot be bound as parameters, so they
//! are the one place where caller-supplied text reaches the SQL string. Every
//! such name goes through [`quote_identifier`], which only admits names made of
//! `[A-Za-z0-9_$-]` starting with a letter or underscore and at least two
//! characters long. Anything else is rejected, never escaped.

use std::fmt;

use crate::error::{OrmError, Result};

/// PostgreSQL truncates identifiers beyond 63 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// A validated, double-quoted identifier inserted verbatim into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawIdentifier(String);

impl RawIdentifier {
    /// The quoted SQL text, e.g. `"users"`.
    #[must_use]
    pub fn as_sql(&self) -> &str {
        &self.0
    }

    /// The bare name without quotes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0[1..self.0.len() - 1]
    }
}

impl fmt::Display for RawIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a name against the identifier grammar.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest = chars.as_str();
    let valid_tail = !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '$' | '_' | '-'));

    if !valid_head || !valid_tail || name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(OrmError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validate `name` and wrap it in double quotes.
pub fn quote_identifier(name: &str) -> Result<RawIdentifier> {
    validate_identifier(name)?;
    Ok(RawIdentifier(format!("\"{}\"", name)))
}
