//! Snippet language
//!
//! A small Python-flavoured language the model writes inside `<python>`
//! markers. It is interpreted natively inside the sandbox worker; the only
//! things a snippet can call are a fixed set of builtins and the Tool API
//! functions bound to the memory root.

pub mod ast;
mod builtins;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use interp::{Fault, Interpreter, OutputSink};
pub use parser::parse_program;
pub use value::Value;

/// A runtime or syntax error raised by snippet code itself.
///
/// Rendered as diagnostics for the model; never fatal to the controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}: {message}")]
pub struct ScriptError {
    pub kind: &'static str,
    pub message: String,
    pub line: usize,
}

impl ScriptError {
    /// Error without a line; the interpreter fills it in as it unwinds.
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: 0,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self {
            kind: "SyntaxError",
            message: message.into(),
            line,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{}' is not defined", name))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    pub fn key_error(key: impl Into<String>) -> Self {
        Self::new("KeyError", key)
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new("ZeroDivisionError", message)
    }

    /// Attach a line number unless one is already set.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}
