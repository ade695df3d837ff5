// ABOUTME: Error types for lexing, parsing, code generation, and JIT failures

use thiserror::Error;

/// Errors surfaced while handling one line of input.
///
/// None of these are fatal: the driver reports the error on stderr and the
/// REPL continues with the next line, its state left consistent.
#[derive(Error, Debug, Clone)]
pub enum CalcError {
    /// The parser met a token it could not accept.
    #[error("parse error: {0}")]
    Parse(String),

    /// A variable reference with no stack slot in the current function.
    #[error("unknown variable name: {0}")]
    UnknownVariable(String),

    /// A call to a function that is neither in the current module nor in
    /// the prototype table.
    #[error("unknown function referenced: {0}")]
    UnknownFunction(String),

    /// A call whose argument count disagrees with the callee's prototype.
    #[error("{function}: expected {expected} argument{}, got {actual}", if *.expected == 1 { "" } else { "s" })]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },

    /// Code generation failed for a reason other than name resolution.
    #[error("codegen error: {0}")]
    Codegen(String),

    /// Installing a module into the JIT or resolving a symbol failed.
    #[error("JIT error: {0}")]
    Jit(String),
}

impl CalcError {
    pub fn parse(message: impl Into<String>) -> Self {
        CalcError::Parse(message.into())
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        CalcError::Codegen(message.into())
    }

    pub fn jit(message: impl Into<String>) -> Self {
        CalcError::Jit(message.into())
    }

    pub fn arity(function: &str, expected: usize, actual: usize) -> Self {
        CalcError::Arity {
            function: function.to_string(),
            expected,
            actual,
        }
    }
}
