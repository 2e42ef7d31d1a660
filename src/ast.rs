//! This module defines the core value type shared by the reader, evaluator and printer.
//! The main enum, [`Value`], covers every datum the interpreter manipulates: atomic
//! leaves (numbers, symbols, keywords, strings, booleans, nil), the three sequence
//! containers, user-defined closures, builtin functions, mutable atoms, and the
//! `Undefined` sentinel. Ergonomic helper functions such as [`val`], [`sym`] and
//! [`list`] are provided for building values in code and tests, and conversion traits
//! are implemented for common Rust types. Equality follows Lisp semantics rather than
//! Rust's: lists and vectors compare across types, atoms compare by identity, and
//! functions never compare equal.

use std::cell::RefCell;
use std::rc::Rc;

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;

/// Type alias for number values in interpreter
pub type NumberType = i64;

/// The parameter name that introduces a rest parameter in `fn*` parameter lists
pub(crate) const REST_MARKER: &str = "&";

/// Core value type of the interpreter.
///
/// Containers hold their elements behind an `Rc` so that evaluation can pass
/// sub-forms around (tail calls, closure bodies, quoted data) without copying.
///
/// To build values, use the helper functions:
/// - `val(42)`, `val("text")`, `val(true)` for atoms, `val([1, 2, 3])` for lists
/// - `sym("name")`, `kw("name")`, `nil()`
/// - `list(..)`, `vector(..)`, `hash_map(..)` for mixed containers
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(NumberType),
    /// Symbols (identifiers)
    Symbol(String),
    /// Keywords, stored without the leading colon
    Keyword(String),
    /// String literals, stored unescaped
    String(String),
    List(Rc<Vec<Value>>),
    Vector(Rc<Vec<Value>>),
    /// Flat alternating key/value sequence; keys are not deduplicated
    HashMap(Rc<Vec<Value>>),
    /// User-defined functions created by `fn*`
    Closure(Rc<Closure>),
    /// Native functions. Uses the id string for display; builtins never compare equal.
    BuiltinFunction {
        id: String,
        func: Rc<OperationFn>,
    },
    /// Mutable cell with identity semantics
    Atom(Rc<RefCell<Value>>),
    /// "No value": returned by the reader when its input is exhausted
    Undefined,
}

/// A user-defined function and the environment it closes over.
///
/// `env` is shared with the defining scope. `def!` relies on this: a closure bound
/// by name also gets that name defined in its own captured environment, which is
/// what lets the body call itself. The resulting `Rc` cycle is never collected.
pub struct Closure {
    pub name: Option<String>,
    pub env: Environment,
    pub params: Vec<String>,
    pub body: Value,
}

impl Closure {
    /// Arity implied by the parameter list
    pub fn arity(&self) -> crate::Arity {
        match self.params.iter().position(|p| p == REST_MARKER) {
            Some(fixed) => crate::Arity::AtLeast(fixed),
            None => crate::Arity::Exact(self.params.len()),
        }
    }

    /// Copy of this closure carrying a name, sharing the same environment
    pub(crate) fn named(&self, name: &str) -> Closure {
        Closure {
            name: Some(name.to_owned()),
            env: self.env.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
        }
    }
}

impl std::fmt::Debug for Closure {
    // The environment is left out: it may contain this closure.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_seq(
            f: &mut std::fmt::Formatter<'_>,
            name: &str,
            items: &[Value],
        ) -> std::fmt::Result {
            write!(f, "{name}(")?;
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v:?}")?;
            }
            write!(f, ")")
        }

        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Keyword(k) => write!(f, "Keyword({k})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(items) => write_seq(f, "List", items),
            Value::Vector(items) => write_seq(f, "Vector", items),
            Value::HashMap(items) => write_seq(f, "HashMap", items),
            Value::Closure(closure) => match &closure.name {
                Some(name) => write!(f, "Closure({name}, params={:?})", closure.params),
                None => write!(f, "Closure(params={:?})", closure.params),
            },
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            // Printed through Display, which is depth-bounded: an atom may contain itself
            Value::Atom(cell) => match cell.try_borrow() {
                Ok(inner) => write!(f, "Atom({inner})"),
                Err(_) => write!(f, "Atom(<borrowed>)"),
            },
            Value::Undefined => write!(f, "Undefined"),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Nil
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(n as NumberType)
            }
        }
    };
}

// Generate From implementations for all integer types that fit losslessly
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType); // Special case - no casting
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(Rc::new(v.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(Rc::new(arr.into_iter().map(Into::into).collect()))
    }
}

// Fallible conversions from `Value` back into primitive Rust types, used by the
// typed builtin adapters.

impl TryFrom<Value> for NumberType {
    type Error = Error;

    fn try_from(value: Value) -> Result<NumberType, Error> {
        if let Value::Integer(n) = value {
            Ok(n)
        } else {
            Err(Error::TypeError(format!(
                "expected integer, got {}",
                value.type_name()
            )))
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Error> {
        if let Value::Bool(b) = value {
            Ok(b)
        } else {
            Err(Error::TypeError(format!(
                "expected boolean, got {}",
                value.type_name()
            )))
        }
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating keywords; `name` excludes the leading colon
pub fn kw<S: AsRef<str>>(name: S) -> Value {
    Value::Keyword(name.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

pub fn nil() -> Value {
    Value::Nil
}

pub fn list(items: Vec<Value>) -> Value {
    Value::List(Rc::new(items))
}

pub fn vector(items: Vec<Value>) -> Value {
    Value::Vector(Rc::new(items))
}

/// Build a hash-map from a flat key/value sequence
pub fn hash_map(items: Vec<Value>) -> Value {
    Value::HashMap(Rc::new(items))
}

impl Value {
    /// Wrap a value in a fresh atom
    pub fn atom(value: Value) -> Value {
        Value::Atom(Rc::new(RefCell::new(value)))
    }

    /// Only `nil` and `false` are falsy. Used by both `if` and `not`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Elements of a List or Vector
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Short type description for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::HashMap(_) => "hash-map",
            Value::Closure(_) => "function",
            Value::BuiltinFunction { .. } => "builtin function",
            Value::Atom(_) => "atom",
            Value::Undefined => "undefined",
        }
    }
}

/// Shallow comparison of one pair. Containers push their element pairs onto
/// `pending` instead of recursing, so arbitrarily deep values compare in
/// constant stack.
fn shallow_eq<'a>(a: &'a Value, b: &'a Value, pending: &mut Vec<(&'a Value, &'a Value)>) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Keyword(a), Value::Keyword(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        // Lists and vectors compare structurally across the two types
        (Value::List(a) | Value::Vector(a), Value::List(b) | Value::Vector(b))
        | (Value::HashMap(a), Value::HashMap(b)) => {
            if a.len() != b.len() {
                return false;
            }
            pending.extend(a.iter().zip(b.iter()).rev());
            true
        }
        (Value::Atom(a), Value::Atom(b)) => Rc::ptr_eq(a, b),
        (Value::Undefined, Value::Undefined) => true,
        // Functions are not comparable, not even with themselves
        (Value::Closure(_), _) | (Value::BuiltinFunction { .. }, _) => false,
        _ => false, // Different variants are never equal
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = Vec::new();
        let mut next = Some((self, other));
        while let Some((a, b)) = next {
            if !shallow_eq(a, b, &mut pending) {
                return false;
            }
            next = pending.pop();
        }
        true
    }
}

/// Move the children of a uniquely owned container, atom or closure onto the
/// worklists, leaving `value` with nothing left to drop recursively
fn detach_children(value: &mut Value, values: &mut Vec<Value>, frames: &mut Vec<Environment>) {
    match value {
        Value::List(items) | Value::Vector(items) | Value::HashMap(items) => {
            if let Some(items) = Rc::get_mut(items) {
                values.append(items);
            }
        }
        Value::Atom(cell) => {
            if let Some(cell) = Rc::get_mut(cell) {
                values.push(std::mem::replace(cell.get_mut(), Value::Nil));
            }
        }
        Value::Closure(closure) => {
            if let Some(closure) = Rc::get_mut(closure) {
                values.push(std::mem::replace(&mut closure.body, Value::Nil));
                closure.env.detach(values, frames);
            }
        }
        _ => {}
    }
}

// The derived drop glue recurses once per nesting level, and nesting built by a
// tail-recursive loop is unbounded: lists of lists, atoms holding atoms, or
// closures capturing frames that bind older closures. Everything reachable only
// through `self` is flattened onto worklists instead, so each popped value or
// frame is dropped with nothing left to recurse into.
impl Drop for Value {
    fn drop(&mut self) {
        let mut values = Vec::new();
        let mut frames = Vec::new();
        detach_children(self, &mut values, &mut frames);
        loop {
            if let Some(mut frame) = frames.pop() {
                frame.detach(&mut values, &mut frames);
            } else if let Some(mut child) = values.pop() {
                detach_children(&mut child, &mut values, &mut frames);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        // Test cases as (Value, Value) tuples: (helper_result, expected_value)
        let test_cases = vec![
            (val(42), Value::Integer(42)),
            (val(-17), Value::Integer(-17)),
            (val(4294967295u32), Value::Integer(4294967295)),
            (val(-128i8), Value::Integer(-128)),
            (val(NumberType::MAX), Value::Integer(NumberType::MAX)),
            (val(true), Value::Bool(true)),
            (val(()), Value::Nil),
            (val("hello"), Value::String("hello".to_owned())),
            (sym("foo-bar?"), Value::Symbol("foo-bar?".to_owned())),
            (kw("key"), Value::Keyword("key".to_owned())),
            (nil(), Value::Nil),
            (
                val([1, 2, 3]),
                list(vec![
                    Value::Integer(1),
                    Value::Integer(2),
                    Value::Integer(3),
                ]),
            ),
            (
                val(vec![sym("op"), val(42), val("result")]),
                list(vec![
                    Value::Symbol("op".to_owned()),
                    Value::Integer(42),
                    Value::String("result".to_owned()),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_list_vector_cross_equality() {
        assert_eq!(val([1, 2, 3]), vector(vec![val(1), val(2), val(3)]));
        assert_eq!(vector(vec![val(1)]), val([1]));
        assert_ne!(val([1, 2]), val([1, 2, 3]));
        // Nested containers use the same rule
        assert_eq!(
            list(vec![vector(vec![val(1)]), val(2)]),
            vector(vec![val([1]), val(2)])
        );
        // Hash-maps are not sequences
        assert_ne!(hash_map(vec![kw("a"), val(1)]), vector(vec![kw("a"), val(1)]));
    }

    #[test]
    fn test_atom_identity_equality() {
        let a = Value::atom(val(1));
        let b = Value::atom(val(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_functions_never_equal() {
        fn noop(
            _args: Vec<Value>,
            _env: &Environment,
            _depth: crate::evaluator::EvalDepth,
        ) -> Result<Value, Error> {
            Ok(Value::Nil)
        }
        let f: Rc<OperationFn> = Rc::new(noop);
        let builtin = Value::BuiltinFunction {
            id: "f".to_owned(),
            func: f,
        };
        assert_ne!(builtin, builtin.clone());

        let closure = Value::Closure(Rc::new(Closure {
            name: None,
            env: Environment::new(),
            params: vec![],
            body: nil(),
        }));
        assert_ne!(closure, closure.clone());
    }

    #[test]
    fn test_deep_nesting_compares_and_drops_in_constant_stack() {
        const DEPTH: usize = 100_000;
        let nest = |leaf: Value| {
            let mut value = leaf;
            for _ in 0..DEPTH {
                value = list(vec![value]);
            }
            value
        };
        let a = nest(val(1));
        let b = nest(val(1));
        let c = nest(val(2));
        assert!(a == b);
        assert!(a != c);
        assert!(a == a.clone());
        drop((a, b, c));

        let mut atoms = nil();
        for _ in 0..DEPTH {
            atoms = Value::atom(atoms);
        }
        drop(atoms);

        // Each closure captures a frame that binds the previous closure
        let mut closures = nil();
        for _ in 0..DEPTH {
            let env = Environment::new();
            env.define("f", closures);
            closures = Value::Closure(Rc::new(Closure {
                name: None,
                env,
                params: vec![],
                body: nil(),
            }));
        }
        drop(closures);

        // A closure over the innermost of a long chain of frames
        let mut env = Environment::new();
        for _ in 0..DEPTH {
            env = Environment::child_of(&env);
        }
        let closure = Value::Closure(Rc::new(Closure {
            name: None,
            env,
            params: vec![],
            body: nil(),
        }));
        drop(closure);
    }

    #[test]
    fn test_truthiness() {
        assert!(!nil().is_truthy());
        assert!(!val(false).is_truthy());
        assert!(val(true).is_truthy());
        assert!(val(0).is_truthy());
        assert!(val("").is_truthy());
        assert!(list(vec![]).is_truthy());
    }

    #[test]
    fn test_closure_arity() {
        let make = |params: &[&str]| Closure {
            name: None,
            env: Environment::new(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            body: nil(),
        };
        assert_eq!(make(&["a", "b"]).arity(), crate::Arity::Exact(2));
        assert_eq!(make(&["a", "&", "rest"]).arity(), crate::Arity::AtLeast(1));
        assert_eq!(make(&["&", "rest"]).arity(), crate::Arity::AtLeast(0));
    }
}
