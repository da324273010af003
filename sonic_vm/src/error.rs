//! Evaluation errors.

use sonic_jit::CompileError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The program did not compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Fuel ran out: too many loop iterations or calls.
    #[error("Timeout")]
    Timeout,

    #[error("Null pointer accessing '{0}'")]
    NullAccess(String),

    #[error("Cannot call {0}")]
    BadCall(String),

    /// Control reached a block with no matching successor.
    #[error("No control successor after node {0}")]
    NoSuccessor(String),

    /// A node was read before the schedule computed it.
    #[error("No value for node {0}")]
    Unscheduled(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(EvalError::Timeout.to_string(), "Timeout");
        let e: EvalError = CompileError::TypeCheck("Cannot call a non-function".into()).into();
        assert_eq!(e.to_string(), "Cannot call a non-function");
    }
}
