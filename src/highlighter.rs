// ABOUTME: Syntax highlighter for the REPL with color support
// Implements rustyline's Highlighter trait to provide ANSI color codes
// for Calc syntax elements while preserving display width

use rustyline::completion::Completer;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Helper;
use std::borrow::Cow;

// ANSI color codes (3-bit/4-bit colors for maximum terminal compatibility)
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_PARENS: &str = "\x1b[1;34m"; // Bold blue
const COLOR_KEYWORD: &str = "\x1b[1;35m"; // Bold magenta
const COLOR_LIBRARY: &str = "\x1b[36m"; // Cyan
const COLOR_NUMBER: &str = "\x1b[33m"; // Yellow
const COLOR_OPERATOR: &str = "\x1b[1;33m"; // Bold yellow

const KEYWORDS: &[&str] = &["def", "extern", "if", "then", "else", "for", "in"];
const LIBRARY_FUNCTIONS: &[&str] = &[
    "pow", "log", "sin", "cos", "tan", "exp", "asin", "acos", "atan", "atan2",
];

/// Rustyline helper colouring Calc input as it is typed.
pub struct CalcHelper;

impl CalcHelper {
    pub fn new() -> Self {
        CalcHelper
    }
}

impl Default for CalcHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Helper for CalcHelper {}

impl Completer for CalcHelper {
    type Candidate = String;
}

impl Hinter for CalcHelper {
    type Hint = String;
}

impl Validator for CalcHelper {}

impl Highlighter for CalcHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let highlighted = highlight_line(line);
        if highlighted == line {
            Cow::Borrowed(line)
        } else {
            Cow::Owned(highlighted)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true // Re-highlight on every character input or cursor movement
    }
}

/// Walks the line once and wraps each token in its color.
fn highlight_line(line: &str) -> String {
    let mut result = String::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '(' | ')' => {
                result.push_str(COLOR_PARENS);
                result.push(chars[i]);
                result.push_str(COLOR_RESET);
                i += 1;
            }

            '+' | '-' | '*' | '/' | '^' | '<' | '=' => {
                result.push_str(COLOR_OPERATOR);
                result.push(chars[i]);
                result.push_str(COLOR_RESET);
                i += 1;
            }

            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E')
                {
                    // Accept a sign directly after an exponent marker.
                    if (chars[i] == 'e' || chars[i] == 'E')
                        && i + 1 < chars.len()
                        && (chars[i + 1] == '+' || chars[i + 1] == '-')
                    {
                        i += 1;
                    }
                    i += 1;
                }
                result.push_str(COLOR_NUMBER);
                result.extend(&chars[start..i]);
                result.push_str(COLOR_RESET);
            }

            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if KEYWORDS.contains(&word.as_str()) {
                    result.push_str(COLOR_KEYWORD);
                    result.push_str(&word);
                    result.push_str(COLOR_RESET);
                } else if LIBRARY_FUNCTIONS.contains(&word.as_str()) {
                    result.push_str(COLOR_LIBRARY);
                    result.push_str(&word);
                    result.push_str(COLOR_RESET);
                } else {
                    result.push_str(&word);
                }
            }

            other => {
                result.push(other);
                i += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ansi(input: &str) -> String {
        let mut result = String::new();
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            } else {
                result.push(c);
            }
        }
        result
    }

    #[test]
    fn test_highlighting_preserves_text() {
        for line in [
            "def f(x) x * x",
            "extern sin(x)",
            "if x < 2 then 1 else 0",
            "for i = 1, i < 10, 2 in sin(i)",
            "(5 + 2) * 8 ^ 1e-3",
        ] {
            assert_eq!(strip_ansi(&highlight_line(line)), line);
        }
    }

    #[test]
    fn test_keywords_are_colored() {
        let highlighted = highlight_line("def f(x) x");
        assert!(highlighted.contains(COLOR_KEYWORD));
        let plain = highlight_line("xyz");
        assert!(!plain.contains(COLOR_KEYWORD));
    }

    #[test]
    fn test_library_functions_are_colored() {
        let highlighted = highlight_line("sin(0)");
        assert!(highlighted.contains(COLOR_LIBRARY));
    }
}
