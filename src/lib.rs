//! malrs - a small Lisp interpreter
//!
//! This crate implements the core of a Lisp-family interpreter in the "make a lisp"
//! tradition: a reader that turns text into [`ast::Value`] trees, an evaluator with
//! lexically scoped environments and closures, a library of builtin functions, and a
//! printer that renders values back to text in readable or display form.
//!
//! ```text
//! (def! fact (fn* (n) (if (<= n 1) 1 (* n (fact (- n 1))))))
//! (fact 5)              ; => 120
//! (let* [x 2 y 3] (+ x y)) ; => 5
//! (= (list 1 2 3) [1 2 3]) ; => true
//! ```
//!
//! The [`Interpreter`] type owns a root environment with the core library installed
//! and is the usual entry point:
//!
//! ```
//! use malrs::Interpreter;
//!
//! let interp = Interpreter::new();
//! assert_eq!(interp.rep("(+ 1 2 3)").unwrap(), "6");
//! ```
//!
//! ## Modules
//!
//! - `reader`: tokenizing and parsing source text
//! - `ast`: the value model shared by every other module
//! - `printer`: readable and display rendering
//! - `evaluator`: environments, special forms and function application
//! - `builtinops`: the core library installed into the root environment
//! - `json`: conversion between values and JSON (feature `json`)

use std::fmt;
use std::rc::Rc;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 128;

/// Maximum evaluation depth to prevent stack overflow in non-tail recursion.
/// Tail calls do not count against this limit.
pub const MAX_EVAL_DEPTH: usize = 1000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray closing delimiters, bad escape sequences)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed delimiter)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context and found token.
    /// `error_offset` is a character (not byte) offset into `input`.
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let total_chars = input.chars().count();

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < total_chars {
            display_context.push_str("[...]");
        }

        // Newlines would break the single-line error display
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Expected argument count for a builtin or closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    /// Check an actual argument count against this arity
    pub fn validate(self, got: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::ArityError {
                expected: self,
                got,
                expression: None,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>, // Optional expression context
    },
    IoError {
        path: String,
        message: String,
    },
}

impl Error {
    /// Create an ArityError for an exact argument count without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected: Arity::Exact(expected),
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(var) => write!(f, "Unbound symbol: '{var}' not found"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: function expected {expected} arguments but got {got}"
                ),
            },
            Error::IoError { path, message } => write!(f, "IOError: {path}: {message}"),
        }
    }
}

impl std::error::Error for Error {}

/// Interpreter-wide limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_parse_depth: usize,
    pub max_eval_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_parse_depth: MAX_PARSE_DEPTH,
            max_eval_depth: MAX_EVAL_DEPTH,
        }
    }
}

impl Config {
    pub(crate) fn parse_config(&self) -> reader::ParseConfig {
        reader::ParseConfig {
            max_depth: self.max_parse_depth,
        }
    }

    pub(crate) fn eval_depth(&self) -> evaluator::EvalDepth {
        evaluator::EvalDepth::new(self.max_eval_depth)
    }
}

/// An interpreter instance: a root environment with the core library installed,
/// plus the limits used for every read and evaluation it performs.
///
/// There is no global state; two interpreters never observe each other's definitions.
pub struct Interpreter {
    env: evaluator::Environment,
    config: Config,
}

impl Interpreter {
    /// Interpreter with default limits, reading files from the local filesystem
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_loader(config, Rc::new(builtinops::FsLoader))
    }

    /// Interpreter whose `slurp`/`load-file` go through the given loader
    pub fn with_loader(config: Config, loader: Rc<dyn builtinops::SourceLoader>) -> Self {
        let env = evaluator::Environment::new();
        builtinops::install(&env, config, loader);
        Interpreter { env, config }
    }

    /// The root environment
    pub fn env(&self) -> &evaluator::Environment {
        &self.env
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Read the first form of `source`
    pub fn read(&self, source: &str) -> Result<ast::Value, Error> {
        reader::Reader::with_config(source, self.config.parse_config()).parse_one()
    }

    /// Evaluate an already-parsed form in the root environment
    pub fn eval(&self, expr: &ast::Value) -> Result<ast::Value, Error> {
        evaluator::eval_with_depth(expr, &self.env, self.config.eval_depth())
    }

    /// Read and evaluate every form in `source`, returning the last result that is
    /// not [`ast::Value::Undefined`] (or `nil` when there is none).
    pub fn eval_str(&self, source: &str) -> Result<ast::Value, Error> {
        evaluator::eval_source(
            source,
            &self.env,
            self.config.eval_depth(),
            self.config.parse_config(),
        )
    }

    /// Like [`Interpreter::eval_str`], but `None` when `source` holds only
    /// whitespace and comments
    pub fn eval_forms(&self, source: &str) -> Result<Option<ast::Value>, Error> {
        if !reader::Reader::with_config(source, self.config.parse_config()).has_more() {
            return Ok(None);
        }
        self.eval_str(source).map(Some)
    }

    /// Read, evaluate and print (readable mode)
    pub fn rep(&self, source: &str) -> Result<String, Error> {
        let value = self.eval_str(source)?;
        Ok(printer::pr_str(&value, printer::PrintMode::Readable))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod printer;
pub mod reader;

#[cfg(feature = "json")]
pub mod json;
