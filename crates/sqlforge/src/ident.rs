//! Identifier and operator validation (C1).
//!
//! Unlike a generic SQL dialect's identifier grammar, this validator only
//! needs to reject the handful of characters that would let a caller break
//! out of a structural position (table name, column name, alias) into SQL
//! syntax. The rule is deliberately flat: no escaping, no nested quote
//! parsing — just a character-class membership check.

use crate::error::SqlforgeError;

/// A validated identifier: non-empty, and containing only
/// `[A-Za-z0-9_.` backtick `]`. No spaces, parentheses, quotes (other than
/// backtick), semicolons, or comment markers can appear. `.` admits
/// `schema.table` / `table.column` notation; the backtick admits
/// pre-quoted names supplied verbatim by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    /// Validates `s` as an identifier in the given `context` (used only to
    /// label the error, e.g. `"WHERE"`, `"ORDER BY"`, `"SEARCH"`).
    pub fn validate(s: &str, context: &'static str) -> Result<Ident, SqlforgeError> {
        validate_ident(s, context)?;
        Ok(Ident(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validates that `s` is non-empty and matches the allowed identifier
/// character class. Fails with [`SqlforgeError::Validation`] labeled with
/// `context` on the first offending byte, or on an empty string.
pub fn validate_ident(s: &str, context: &'static str) -> Result<(), SqlforgeError> {
    if s.is_empty() {
        return Err(SqlforgeError::validation(context, "identifier must not be empty"));
    }
    for b in s.bytes() {
        let ok = b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'`';
        if !ok {
            return Err(SqlforgeError::validation(
                context,
                format!("invalid character {:?} in identifier {s:?}", b as char),
            ));
        }
    }
    Ok(())
}

/// The finite operator set allowed in WHERE/HAVING comparisons.
pub const WHERE_OPERATORS: &[&str] =
    &["=", "!=", "<>", ">", "<", ">=", "<=", "LIKE", "NOT LIKE", "IS", "IS NOT"];

/// The finite operator set allowed for column-vs-column comparisons
/// (`whereColumn`).
pub const COLUMN_OPERATORS: &[&str] = &["=", "!=", "<>", ">", "<", ">=", "<="];

/// Validates that `op` belongs to `allowed`, returning the canonicalized
/// (uppercased) operator on success.
pub fn validate_op(op: &str, allowed: &[&str]) -> Result<String, SqlforgeError> {
    let upper = op.to_ascii_uppercase();
    if allowed.iter().any(|a| *a == upper) {
        Ok(upper)
    } else {
        Err(SqlforgeError::validation(
            "OPERATOR",
            format!("operator {op:?} is not in the allowed set {allowed:?}"),
        ))
    }
}

/// Validates and canonicalizes an ORDER BY direction.
pub fn validate_direction(d: &str) -> Result<&'static str, SqlforgeError> {
    match d.to_ascii_uppercase().as_str() {
        "ASC" => Ok("ASC"),
        "DESC" => Ok("DESC"),
        other => Err(SqlforgeError::validation(
            "ORDER BY",
            format!("direction must be ASC or DESC, got {other:?}"),
        )),
    }
}

/// Validates a non-negative integer (used for `limit`/`offset`).
pub fn validate_non_negative_int(n: i64, context: &'static str) -> Result<u64, SqlforgeError> {
    if n < 0 {
        Err(SqlforgeError::validation(context, format!("must be non-negative, got {n}")))
    } else {
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_dotted_and_backticked() {
        assert!(Ident::validate("users", "TABLE").is_ok());
        assert!(Ident::validate("users.id", "WHERE").is_ok());
        assert!(Ident::validate("`weird name`", "WHERE").is_ok());
    }

    #[test]
    fn rejects_empty_and_structural_chars() {
        assert!(Ident::validate("", "WHERE").is_err());
        assert!(Ident::validate("id; DROP TABLE users", "WHERE").is_err());
        assert!(Ident::validate("id)", "WHERE").is_err());
        assert!(Ident::validate("id -- comment", "WHERE").is_err());
        assert!(Ident::validate("\"id\"", "WHERE").is_err());
    }

    #[test]
    fn op_validation_is_case_insensitive_and_canonical() {
        assert_eq!(validate_op("like", WHERE_OPERATORS).unwrap(), "LIKE");
        assert!(validate_op("~", WHERE_OPERATORS).is_err());
    }

    #[test]
    fn direction_and_limit_validation() {
        assert_eq!(validate_direction("asc").unwrap(), "ASC");
        assert!(validate_direction("UP").is_err());
        assert_eq!(validate_non_negative_int(0, "LIMIT").unwrap(), 0);
        assert!(validate_non_negative_int(-1, "LIMIT").is_err());
    }
}
