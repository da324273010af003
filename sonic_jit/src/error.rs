//! Compilation errors.
//!
//! Two user-facing categories exist: errors found while the graph is being
//! built ([`ParseError`]) and lattice-level errors found once the optimizer
//! has converged ([`CompileError::TypeCheck`]). Broken internal invariants
//! are assertions, not errors.

use thiserror::Error;

/// An error found while building the graph from source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Syntax error, expected {expected}: {found} (line {line})")]
    Syntax {
        expected: String,
        found: String,
        line: u32,
    },

    #[error("Undefined name '{0}'")]
    UndefinedName(String),

    #[error("Redefining name '{0}'")]
    Redefinition(String),

    #[error("Type {value} is not of declared type {declared}")]
    TypeMismatch { value: String, declared: String },

    #[error("Cannot modify final {0}")]
    FinalMutation(String),

    #[error("Cannot define a '{0}' on one arm of an if")]
    BranchOnlyDefinition(String),

    #[error("Expected a struct reference but got {0}")]
    NotAStruct(String),

    #[error("Accessing unknown field '{field}' from '{ty}'")]
    UnknownField { field: String, ty: String },

    #[error("'{0}' is not fully initialized")]
    NotInitialized(String),

    /// `break` or `continue` outside a loop.
    #[error("No active loop for a break or continue")]
    NoActiveLoop,
}

impl ParseError {
    pub fn syntax(expected: impl Into<String>, found: impl Into<String>, line: u32) -> Self {
        ParseError::Syntax {
            expected: expected.into(),
            found: found.into(),
            line,
        }
    }

    pub fn mismatch(value: impl Into<String>, declared: impl Into<String>) -> Self {
        ParseError::TypeMismatch {
            value: value.into(),
            declared: declared.into(),
        }
    }
}

/// Session-level error returned by the phase driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A converged type that the operation cannot accept.
    #[error("{0}")]
    TypeCheck(String),
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = ParseError::syntax("';'", "}", 3);
        assert_eq!(e.to_string(), "Syntax error, expected ';': } (line 3)");
        assert_eq!(
            ParseError::UndefinedName("b".into()).to_string(),
            "Undefined name 'b'"
        );
        let c: CompileError = ParseError::Redefinition("a".into()).into();
        assert_eq!(c.to_string(), "Redefining name 'a'");
        assert_eq!(
            CompileError::TypeCheck("Might be null accessing 'f'".into()).to_string(),
            "Might be null accessing 'f'"
        );
    }
}
