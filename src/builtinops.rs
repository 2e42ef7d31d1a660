//! Core library: the builtin functions bound in every interpreter's root environment.
//!
//! Builtins are ordinary function values. Their arguments are evaluated before the
//! call, and they can be passed around, stored, and shadowed like any closure.
//! Special forms (`if`, `let*`, `def!`, ...) are not in this registry; the
//! evaluator recognizes them before a list is treated as an application.
//!
//! ```text
//! (+ 1 2 3)                 ; 6
//! (pr-str "a" [1 2])        ; "\"a\" [1 2]"
//! (swap! counter + 1)       ; increments an atom in place
//! ```
//!
//! ## Error Handling
//!
//! - **Type Safety**: arithmetic and comparisons only accept integers
//! - **Overflow Detection**: checked arithmetic reports overflow as an `EvalError`
//! - **Arity Checking**: counts are enforced before the body runs
//!
//! No builtin panics on user input.
//!
//! ## Adding New Operations
//!
//! Prefer a typed Rust function (`fn(i64, i64) -> Result<bool, Error>`,
//! `fn(NumIter<'_>) -> Result<i64, Error>`, ...) wrapped with `builtin_fixed` or
//! `builtin_variadic`. Only builtins that need the calling environment, the
//! current evaluation depth or interpreter state (`eval`, `load-file`, `swap!`)
//! are written against the erased [`OperationFn`] signature.

use std::rc::Rc;

use crate::ast::{NumberType, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, erase};
use crate::evaluator::{
    EvalDepth, Environment, NumIter, OperationFn, ValueIter, apply, eval_source, eval_with_depth,
};
use crate::printer::{PrintMode, pr_seq};
use crate::reader::{ParseConfig, Reader};
use crate::{Arity, Config, Error};

/// Where `slurp` and `load-file` get file contents from
pub trait SourceLoader {
    fn load(&self, path: &str) -> std::io::Result<String>;
}

/// Reads from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// Name the operation is bound to
    pub id: &'static str,
    pub func: Rc<OperationFn>,
    /// Checked before `func` runs
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Bind every builtin into `env`
pub fn install(env: &Environment, config: Config, loader: Rc<dyn SourceLoader>) {
    let ops = builtin_ops(config, loader);
    let count = ops.len();
    for BuiltinOp { id, func, arity } in ops {
        env.register_builtin_function(id, arity, move |args, env, depth| func(args, env, depth));
    }
    log::debug!(target: "core", "installed {count} builtins");
}

//
// Arithmetic and comparison
//

fn overflow(operation: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {operation}"))
}

fn builtin_add(args: NumIter<'_>) -> Result<NumberType, Error> {
    let mut sum: NumberType = 0;
    for n in args {
        sum = sum.checked_add(n).ok_or_else(|| overflow("addition"))?;
    }
    Ok(sum)
}

fn builtin_mul(args: NumIter<'_>) -> Result<NumberType, Error> {
    let mut product: NumberType = 1;
    for n in args {
        product = product
            .checked_mul(n)
            .ok_or_else(|| overflow("multiplication"))?;
    }
    Ok(product)
}

// A single argument is returned unchanged: `(- 5)` is 5, not -5.
fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut result = first;
    for n in rest {
        result = result
            .checked_sub(n)
            .ok_or_else(|| overflow("subtraction"))?;
    }
    Ok(result)
}

fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut result = first;
    for n in rest {
        if n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        result = result.checked_div(n).ok_or_else(|| overflow("division"))?;
    }
    Ok(result)
}

macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(a: NumberType, b: NumberType) -> Result<bool, Error> {
            Ok(a $op b)
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_ge, >=);

fn builtin_equal(a: Value, b: Value) -> Result<bool, Error> {
    Ok(a == b)
}

//
// Sequences and predicates
//

fn builtin_list(args: ValueIter<'_>) -> Result<Value, Error> {
    Ok(Value::List(Rc::new(args.cloned().collect())))
}

fn builtin_is_list(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::List(_)))
}

fn builtin_is_empty(value: Value) -> Result<bool, Error> {
    Ok(value.as_sequence().is_some_and(<[Value]>::is_empty))
}

// Hash maps, nil and scalars all count as 0
fn builtin_count(value: Value) -> Result<NumberType, Error> {
    let len = value.as_sequence().map_or(0, <[Value]>::len);
    NumberType::try_from(len).map_err(|_| Error::EvalError("sequence too long to count".into()))
}

fn builtin_not(value: Value) -> Result<bool, Error> {
    Ok(!value.is_truthy())
}

fn builtin_do(args: ValueIter<'_>) -> Result<Value, Error> {
    Ok(args.as_slice().last().cloned().unwrap_or(Value::Nil))
}

//
// Printing
//

fn builtin_pr_str(args: ValueIter<'_>) -> Result<String, Error> {
    Ok(pr_seq(args.as_slice(), PrintMode::Readable, " "))
}

fn builtin_str(args: ValueIter<'_>) -> Result<String, Error> {
    Ok(pr_seq(args.as_slice(), PrintMode::Display, ""))
}

fn builtin_prn(args: ValueIter<'_>) -> Result<Value, Error> {
    println!("{}", pr_seq(args.as_slice(), PrintMode::Readable, " "));
    Ok(Value::Nil)
}

fn builtin_println(args: ValueIter<'_>) -> Result<Value, Error> {
    println!("{}", pr_seq(args.as_slice(), PrintMode::Display, " "));
    Ok(Value::Nil)
}

//
// Atoms
//

fn not_an_atom(name: &str, value: &Value) -> Error {
    Error::TypeError(format!("{name} expects an atom, got {}", value.type_name()))
}

fn builtin_atom(value: Value) -> Result<Value, Error> {
    Ok(Value::atom(value))
}

fn builtin_is_atom(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::Atom(_)))
}

fn builtin_deref(value: Value) -> Result<Value, Error> {
    match &value {
        Value::Atom(cell) => Ok(cell.borrow().clone()),
        other => Err(not_an_atom("deref", other)),
    }
}

fn builtin_reset(atom: Value, value: Value) -> Result<Value, Error> {
    match &atom {
        Value::Atom(cell) => {
            *cell.borrow_mut() = value.clone();
            Ok(value)
        }
        other => Err(not_an_atom("reset!", other)),
    }
}

// The cell is not borrowed while `func` runs, so it may read or reset the same atom.
fn builtin_swap(args: Vec<Value>, env: &Environment, depth: EvalDepth) -> Result<Value, Error> {
    let [atom, func, extra @ ..] = args.as_slice() else {
        return Err(Error::ArityError {
            expected: Arity::AtLeast(2),
            got: args.len(),
            expression: None,
        });
    };
    let Value::Atom(cell) = atom else {
        return Err(not_an_atom("swap!", atom));
    };

    let current = cell.borrow().clone();
    let mut call_args = Vec::with_capacity(extra.len() + 1);
    call_args.push(current);
    call_args.extend_from_slice(extra);

    let updated = apply(func, call_args, env, depth)?;
    *cell.borrow_mut() = updated.clone();
    Ok(updated)
}

//
// Reading, evaluation and files
//

fn single_string<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, Error> {
    match args {
        [Value::String(s)] => Ok(s),
        [other] => Err(Error::TypeError(format!(
            "{name} expects a string, got {}",
            other.type_name()
        ))),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

fn builtin_read_string(args: &[Value], config: ParseConfig) -> Result<Value, Error> {
    let source = single_string("read-string", args)?;
    match Reader::with_config(source, config).parse_one()? {
        Value::Undefined => Ok(Value::Nil),
        form => Ok(form),
    }
}

fn builtin_eval(args: &[Value], env: &Environment, depth: EvalDepth) -> Result<Value, Error> {
    match args {
        [form] => eval_with_depth(form, env, depth),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

fn read_file(loader: &dyn SourceLoader, path: &str) -> Result<String, Error> {
    loader.load(path).map_err(|e| Error::IoError {
        path: path.to_owned(),
        message: e.to_string(),
    })
}

fn builtin_slurp(args: &[Value], loader: &dyn SourceLoader) -> Result<Value, Error> {
    let path = single_string("slurp", args)?;
    read_file(loader, path).map(Value::String)
}

fn builtin_load_file(
    args: &[Value],
    env: &Environment,
    depth: EvalDepth,
    loader: &dyn SourceLoader,
    config: ParseConfig,
) -> Result<Value, Error> {
    let path = single_string("load-file", args)?;
    let source = read_file(loader, path)?;
    log::debug!(target: "core", "loading {path} ({} bytes)", source.len());
    eval_source(&source, env, depth, config)
}

//
// JSON
//

#[cfg(feature = "json")]
fn builtin_json_encode(value: Value) -> Result<String, Error> {
    let json = crate::json::to_json(&value)?;
    serde_json::to_string(&json).map_err(|e| Error::EvalError(format!("json-encode: {e}")))
}

#[cfg(feature = "json")]
fn builtin_json_decode(text: &str) -> Result<Value, Error> {
    crate::json::from_json(text)
}

//
// Registry
//

fn builtin_fixed<Args, R, F>(f: F) -> Rc<OperationFn>
where
    F: IntoOperation<Args, R>,
{
    <F as IntoOperation<Args, R>>::into_operation(f)
}

fn builtin_variadic<Args, R, F>(f: F) -> Rc<OperationFn>
where
    F: IntoVariadicOperation<Args, R>,
{
    <F as IntoVariadicOperation<Args, R>>::into_variadic_operation(f)
}

/// Every builtin, wired to `config` and `loader`.
///
/// Built per interpreter: function values hold `Rc`s and cannot live in a
/// process-wide static.
pub fn builtin_ops(config: Config, loader: Rc<dyn SourceLoader>) -> Vec<BuiltinOp> {
    let parse_config = config.parse_config();
    let slurp_loader = Rc::clone(&loader);
    let load_file_loader = loader;

    #[cfg_attr(not(feature = "json"), allow(unused_mut))]
    let mut ops = vec![
        // Arithmetic
        BuiltinOp {
            id: "+",
            func: builtin_variadic::<(NumIter<'static>,), _, _>(builtin_add),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "-",
            func: builtin_variadic::<(NumberType, NumIter<'static>), _, _>(builtin_sub),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "*",
            func: builtin_variadic::<(NumIter<'static>,), _, _>(builtin_mul),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "/",
            func: builtin_variadic::<(NumberType, NumIter<'static>), _, _>(builtin_div),
            arity: Arity::AtLeast(1),
        },
        // Comparison
        BuiltinOp {
            id: "<",
            func: builtin_fixed::<(NumberType, NumberType), _, _>(builtin_lt),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: "<=",
            func: builtin_fixed::<(NumberType, NumberType), _, _>(builtin_le),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: ">",
            func: builtin_fixed::<(NumberType, NumberType), _, _>(builtin_gt),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: ">=",
            func: builtin_fixed::<(NumberType, NumberType), _, _>(builtin_ge),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: "=",
            func: builtin_fixed::<(Value, Value), _, _>(builtin_equal),
            arity: Arity::Exact(2),
        },
        // Sequences and predicates
        BuiltinOp {
            id: "list",
            func: builtin_variadic::<(ValueIter<'static>,), _, _>(builtin_list),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "list?",
            func: builtin_fixed::<(Value,), _, _>(builtin_is_list),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "empty?",
            func: builtin_fixed::<(Value,), _, _>(builtin_is_empty),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "count",
            func: builtin_fixed::<(Value,), _, _>(builtin_count),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "not",
            func: builtin_fixed::<(Value,), _, _>(builtin_not),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "do",
            func: builtin_variadic::<(ValueIter<'static>,), _, _>(builtin_do),
            arity: Arity::Any,
        },
        // Printing
        BuiltinOp {
            id: "pr-str",
            func: builtin_variadic::<(ValueIter<'static>,), _, _>(builtin_pr_str),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "str",
            func: builtin_variadic::<(ValueIter<'static>,), _, _>(builtin_str),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "prn",
            func: builtin_variadic::<(ValueIter<'static>,), _, _>(builtin_prn),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "println",
            func: builtin_variadic::<(ValueIter<'static>,), _, _>(builtin_println),
            arity: Arity::Any,
        },
        // Reading, evaluation and files
        BuiltinOp {
            id: "read-string",
            func: erase(move |args, _env, _depth| builtin_read_string(&args, parse_config)),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "eval",
            func: erase(|args, env, depth| builtin_eval(&args, env, depth)),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "slurp",
            func: erase(move |args, _env, _depth| builtin_slurp(&args, &*slurp_loader)),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "load-file",
            func: erase(move |args, env, depth| {
                builtin_load_file(&args, env, depth, &*load_file_loader, parse_config)
            }),
            arity: Arity::Exact(1),
        },
        // Atoms
        BuiltinOp {
            id: "atom",
            func: builtin_fixed::<(Value,), _, _>(builtin_atom),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "atom?",
            func: builtin_fixed::<(Value,), _, _>(builtin_is_atom),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "deref",
            func: builtin_fixed::<(Value,), _, _>(builtin_deref),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "reset!",
            func: builtin_fixed::<(Value, Value), _, _>(builtin_reset),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: "swap!",
            func: erase(builtin_swap),
            arity: Arity::AtLeast(2),
        },
    ];

    #[cfg(feature = "json")]
    ops.extend([
        BuiltinOp {
            id: "json-encode",
            func: builtin_fixed::<(Value,), _, _>(builtin_json_encode),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "json-decode",
            func: builtin_fixed::<(&'static str,), _, _>(builtin_json_decode),
            arity: Arity::Exact(1),
        },
    ]);

    ops
}
