//! Raw marker: the sole opt-out from parameterization.

/// A wrapper around a string literal signalling "interpolate unchanged, do
/// not parameterize." Used for column-to-column comparisons and trusted
/// formulae (`col = col + 1`, `whereColumn(lhs, op, rhs)`, custom aggregate
/// expressions).
///
/// Never construct one from externally supplied data — doing so defeats the
/// parameterization invariant the rest of the compiler relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw(String);

impl Raw {
    /// Wraps a statically-known SQL fragment. Fails only if the fragment is
    /// empty, since an empty raw fragment can never be a meaningful operand.
    pub fn new(fragment: impl Into<String>) -> Result<Self, crate::error::SqlforgeError> {
        let fragment = fragment.into();
        if fragment.is_empty() {
            return Err(crate::error::SqlforgeError::validation(
                "RAW",
                "raw fragment must not be empty",
            ));
        }
        Ok(Raw(fragment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Raw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(Raw::new("").is_err());
    }

    #[test]
    fn keeps_fragment_verbatim() {
        let r = Raw::new("col + 1").unwrap();
        assert_eq!(r.as_str(), "col + 1");
    }
}
