//! # Sonic Parser
//!
//! Lexer and graph-building parser for the Sonic language. Parsing emits
//! Sea-of-Nodes IR straight into a [`CodeGen`] session; there is no
//! intermediate syntax tree.

pub mod lexer;
pub mod parser;
pub mod token;

pub use lexer::{tokenize, Lexer};
pub use parser::{parse, Parser};
pub use sonic_jit::{ParseError, ParseResult};
pub use token::{Keyword, Token, TokenKind};

use sonic_jit::{CodeGen, CodeGenConfig, Phase};

/// Parse `source` and run every phase through local scheduling.
pub fn compile(source: &str, config: CodeGenConfig) -> sonic_jit::Result<CodeGen> {
    let mut code = CodeGen::new(config);
    parse(&mut code, source)?;
    code.driver(Phase::LocalSched)?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_schedules() {
        let code = compile("return arg + 1;", CodeGenConfig::default()).unwrap();
        assert_eq!(code.phase(), Some(Phase::LocalSched));
        assert!(!code.blocks().is_empty());
        assert_eq!(code.print(), "return (arg+1);");
    }

    #[test]
    fn test_compile_types_calls() {
        let src = "val sq = { int x -> x*x; }; return sq(arg) + 1;";
        let code = compile(src, CodeGenConfig::default()).unwrap();
        assert_eq!(code.phase(), Some(Phase::LocalSched));
        let err = compile("val sq = { int x -> x*x; }; return sq(1, 2);", CodeGenConfig::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Syntax error, expected 1 arguments: 2 (line 1)"
        );
    }

    #[test]
    fn test_compile_reports_type_errors() {
        let src = "struct S { int x; } S? s = null; if (arg) s = new S; return s.x;";
        let err = compile(src, CodeGenConfig::default()).unwrap_err();
        assert!(matches!(err, sonic_jit::CompileError::TypeCheck(_)));
    }
}
