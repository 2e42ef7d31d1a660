//! Rendering values back to text.
//!
//! Two modes are supported. *Readable* output can be fed back to the reader: strings
//! are quoted and `\n`, `"` and `\` are escaped. *Display* output is for humans:
//! strings are written as-is. Everything else renders identically in both modes.
//! Functions render as opaque placeholders.

use std::fmt;

use crate::ast::Value;

/// Nesting beyond this depth is elided as `...`. An atom can be reset to a value
/// that contains the atom itself, so unbounded printing could recurse forever.
pub const MAX_PRINT_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    Readable,
    Display,
}

/// Render a value
pub fn pr_str(value: &Value, mode: PrintMode) -> String {
    Printed::new(value, mode).to_string()
}

/// Render each value and join them with `separator`
pub fn pr_seq(values: &[Value], mode: PrintMode, separator: &str) -> String {
    values
        .iter()
        .map(|value| pr_str(value, mode))
        .collect::<Vec<_>>()
        .join(separator)
}

/// A value paired with a print mode, implementing [`fmt::Display`]
pub struct Printed<'a> {
    value: &'a Value,
    mode: PrintMode,
    depth: usize,
}

impl<'a> Printed<'a> {
    pub fn new(value: &'a Value, mode: PrintMode) -> Self {
        Printed {
            value,
            mode,
            depth: 0,
        }
    }

    fn nested(&self, value: &'a Value) -> Printed<'a> {
        Printed {
            value,
            mode: self.mode,
            depth: self.depth + 1,
        }
    }

    fn write_seq(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: char,
        items: &'a [Value],
        close: char,
    ) -> fmt::Result {
        write!(f, "{open}")?;
        for (i, elem) in items.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", self.nested(elem))?;
        }
        write!(f, "{close}")
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Printed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth >= MAX_PRINT_DEPTH {
            return write!(f, "...");
        }
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::String(s) => match self.mode {
                PrintMode::Readable => write_escaped(f, s),
                PrintMode::Display => write!(f, "{s}"),
            },
            Value::List(items) => self.write_seq(f, '(', items, ')'),
            Value::Vector(items) => self.write_seq(f, '[', items, ']'),
            Value::HashMap(items) => self.write_seq(f, '{', items, '}'),
            Value::Closure(closure) => match &closure.name {
                Some(name) => write!(f, "#<function:{name}>"),
                None => write!(f, "#<function>"),
            },
            Value::BuiltinFunction { id, .. } => write!(f, "#<builtin-function:{id}>"),
            Value::Atom(cell) => match cell.try_borrow() {
                Ok(inner) => write!(f, "(atom {})", self.nested(&inner)),
                Err(_) => write!(f, "(atom ...)"),
            },
            Value::Undefined => write!(f, "#<undefined>"),
        }
    }
}

/// Readable rendering
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Printed::new(self, PrintMode::Readable))
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{hash_map, kw, list, nil, sym, val, vector};
    use crate::reader::read_str;

    #[test]
    fn test_print_modes_data_driven() {
        // (value, readable, display)
        let test_cases = vec![
            (nil(), "nil", "nil"),
            (val(true), "true", "true"),
            (val(false), "false", "false"),
            (val(-42), "-42", "-42"),
            (sym("foo"), "foo", "foo"),
            (kw("key"), ":key", ":key"),
            (val("plain"), "\"plain\"", "plain"),
            (val("a\nb"), "\"a\\nb\"", "a\nb"),
            (val("say \"hi\""), "\"say \\\"hi\\\"\"", "say \"hi\""),
            (val("back\\slash"), "\"back\\\\slash\"", "back\\slash"),
            (val("tab\there"), "\"tab\there\"", "tab\there"),
            (list(vec![]), "()", "()"),
            (val([1, 2, 3]), "(1 2 3)", "(1 2 3)"),
            (vector(vec![val(1), val("x")]), "[1 \"x\"]", "[1 x]"),
            (hash_map(vec![kw("a"), val(1)]), "{:a 1}", "{:a 1}"),
            (
                list(vec![sym("quote"), vector(vec![])]),
                "(quote [])",
                "(quote [])",
            ),
            (Value::atom(val("s")), "(atom \"s\")", "(atom s)"),
            (Value::Undefined, "#<undefined>", "#<undefined>"),
        ];

        for (i, (value, readable, display)) in test_cases.iter().enumerate() {
            assert_eq!(
                pr_str(value, PrintMode::Readable),
                *readable,
                "case #{}: readable",
                i + 1
            );
            assert_eq!(
                pr_str(value, PrintMode::Display),
                *display,
                "case #{}: display",
                i + 1
            );
        }
    }

    #[test]
    fn test_readable_round_trip() {
        let values = vec![
            val(0),
            val(i64::MIN),
            val(i64::MAX),
            val(true),
            val(false),
            kw("some-key"),
            val(""),
            val("line\nbreak \"quoted\" \\ done"),
        ];
        for value in values {
            let printed = pr_str(&value, PrintMode::Readable);
            assert_eq!(read_str(&printed).unwrap(), value, "round trip of {printed}");
        }
    }

    #[test]
    fn test_pr_seq_joins() {
        let values = vec![val("a"), val(1), kw("b")];
        assert_eq!(pr_seq(&values, PrintMode::Readable, " "), "\"a\" 1 :b");
        assert_eq!(pr_seq(&values, PrintMode::Display, ""), "a1:b");
        assert_eq!(pr_seq(&[], PrintMode::Display, " "), "");
    }

    #[test]
    fn test_self_containing_atom_is_bounded() {
        let atom = Value::atom(nil());
        if let Value::Atom(cell) = &atom {
            *cell.borrow_mut() = atom.clone();
        }
        let printed = pr_str(&atom, PrintMode::Readable);
        assert!(printed.starts_with("(atom (atom "));
        assert!(printed.contains("..."));
    }
}
