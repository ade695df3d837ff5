// ABOUTME: Configuration and constants for the calculator REPL
// Version info, prompt, welcome banner, and the history file name

#[allow(dead_code)]
pub const VERSION: &str = "1.0.0";

/// Prompt printed before each line of input.
pub const PROMPT: &str = "ready> ";

pub const WELCOME_MESSAGE: &str = "Calc JIT Compiler v1.0";
pub const WELCOME_SUBTITLE: &str =
    "An interactive calculator language with automatic differentiation";
pub const WELCOME_FOOTER: &str =
    "Type an expression, 'def f(x) ...' to define, 'extern g(x)' to declare. Ctrl-D exits.";

/// Where the REPL persists line history between sessions.
pub const HISTORY_FILE: &str = ".calc_history";
