//! Environments, special forms and function application.
//!
//! Evaluation runs in an explicit loop: forms in tail position (the chosen `if`
//! branch, a `let*` body, the last form of a `do`, a closure body) are handed back
//! to the loop as [`Step::TailCall`] instead of being evaluated recursively, so
//! tail-recursive programs run in constant Rust stack. Everything else recurses
//! through [`eval_with_depth`], which is bounded by [`EvalDepth`].

pub mod intooperation;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{Closure, REST_MARKER, Value};
use crate::reader::{ParseConfig, Reader};
use crate::{Arity, Error, MAX_EVAL_DEPTH};
use intooperation::{IntoOperation, IntoVariadicOperation, erase};
pub use intooperation::{NumIter, OperationFn, ValueIter};

struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

/// A frame of variable bindings with an optional parent.
///
/// Cloning an `Environment` clones the handle, not the frame: closures that
/// capture an environment observe later definitions made in it.
#[derive(Clone)]
pub struct Environment(Rc<Frame>);

impl Environment {
    /// A new root frame with no bindings
    pub fn new() -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    /// A new empty frame whose lookups fall back to `parent`
    pub fn child_of(parent: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    /// Bind `name` in this frame, replacing any previous binding here
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Empty this frame if this is its last handle: the bindings move onto
    /// `values` and the parent onto `frames`. Used by the iterative drop of
    /// [`Value`].
    pub(crate) fn detach(&mut self, values: &mut Vec<Value>, frames: &mut Vec<Environment>) {
        if let Some(frame) = Rc::get_mut(&mut self.0) {
            values.extend(frame.bindings.get_mut().drain().map(|(_, value)| value));
            frames.extend(frame.parent.take());
        }
    }

    /// Find the innermost binding of `name`
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = &self.0;
        loop {
            if let Some(value) = frame.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = &parent.0,
                None => return None,
            }
        }
    }

    /// Register a builtin that works on raw evaluated arguments.
    ///
    /// Unlike the typed registration APIs, the function also receives the
    /// calling environment and evaluation depth, which is what `eval` and
    /// `load-file` need. The argument count is checked against `arity` before
    /// `func` runs.
    ///
    /// # Example
    /// ```
    /// use malrs::{Arity, Interpreter};
    /// use malrs::ast::Value;
    ///
    /// let interp = Interpreter::new();
    /// interp.env().register_builtin_function("arg-count", Arity::Any, |args, _env, _depth| {
    ///     Ok(Value::Integer(args.len() as i64))
    /// });
    /// assert_eq!(interp.rep("(arg-count 1 2 3)").unwrap(), "3");
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(Vec<Value>, &Environment, EvalDepth) -> Result<Value, Error> + 'static,
    {
        let wrapped = erase(move |args, env, depth| {
            arity.validate(args.len())?;
            func(args, env, depth)
        });
        self.define_builtin(name, wrapped);
    }

    /// Register a strongly-typed Rust function as a builtin operation.
    ///
    /// ```rust,ignore
    /// fn add(a: i64, b: i64) -> Result<i64, Error> { Ok(a + b) }
    /// env.register_builtin_operation::<_, (i64, i64), i64>("add", add);
    /// ```
    ///
    /// Supported parameter types are `i64`, `bool`, `&str` and `Value`. The
    /// function returns `Result<R, Error>` for any `R: Into<Value>`.
    /// Arity is enforced from the signature; a mismatched argument type is a
    /// `TypeError`.
    pub fn register_builtin_operation<F, Args, R>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args, R> + 'static,
    {
        self.define_builtin(name, func.into_operation());
    }

    /// Register a typed function whose last parameter collects the remaining
    /// arguments, e.g. `fn(NumIter<'_>)` or `fn(i64, NumIter<'_>)`.
    ///
    /// `arity` is checked first, since minimum and maximum counts are not
    /// always derivable from the signature.
    pub fn register_variadic_builtin_operation<F, Args, R>(
        &self,
        name: &str,
        arity: Arity,
        func: F,
    ) where
        F: IntoVariadicOperation<Args, R> + 'static,
    {
        let inner = func.into_variadic_operation();
        let wrapped = erase(move |args, env, depth| {
            arity.validate(args.len())?;
            inner(args, env, depth)
        });
        self.define_builtin(name, wrapped);
    }

    fn define_builtin(&self, name: &str, func: Rc<OperationFn>) {
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func,
            },
        );
    }

    /// Get all bindings visible from this environment.
    /// Returns (name, value) pairs sorted by name; inner frames shadow outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(env) = current {
            chain.push(env);
            current = env.0.parent.as_ref();
        }

        let mut bindings = HashMap::new();
        for env in chain.into_iter().rev() {
            for (name, value) in env.0.bindings.borrow().iter() {
                bindings.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    // Values are left out: a frame can contain closures that capture it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

/// Nesting depth of non-tail evaluation, and its limit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvalDepth {
    current: usize,
    limit: usize,
}

impl EvalDepth {
    pub fn new(limit: usize) -> Self {
        EvalDepth { current: 0, limit }
    }

    pub fn current(self) -> usize {
        self.current
    }

    pub(crate) fn deeper(self) -> Result<Self, Error> {
        if self.current >= self.limit {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.limit
            )));
        }
        Ok(EvalDepth {
            current: self.current + 1,
            ..self
        })
    }
}

impl Default for EvalDepth {
    fn default() -> Self {
        Self::new(MAX_EVAL_DEPTH)
    }
}

/// Outcome of evaluating one form: a value, or a form left in tail position
enum Step {
    Return(Value),
    TailCall(Value, Environment),
}

/// Forms with their own evaluation rules, checked before function application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    If,
    Let,
    Def,
    Fn,
    Do,
    Quote,
    /// Recognized but not implemented; evaluates to `nil`
    Reserved,
}

impl SpecialForm {
    fn from_symbol(name: &str) -> Option<Self> {
        let form = match name {
            "if" => SpecialForm::If,
            "let*" => SpecialForm::Let,
            "def!" => SpecialForm::Def,
            "fn*" => SpecialForm::Fn,
            "do" => SpecialForm::Do,
            "quote" => SpecialForm::Quote,
            "cond" | "or" | "and" | "defmacro!" | "unquote" | "quasiquote" | "splice-unquote" => {
                SpecialForm::Reserved
            }
            _ => return None,
        };
        Some(form)
    }
}

/// Evaluate an expression with the default depth limit
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth(expr, env, EvalDepth::default())
}

/// Evaluate an expression one level below `depth`
pub fn eval_with_depth(expr: &Value, env: &Environment, depth: EvalDepth) -> Result<Value, Error> {
    let depth = depth.deeper()?;
    let mut step = eval_step(expr, env, depth)?;
    loop {
        match step {
            Step::Return(value) => return Ok(value),
            Step::TailCall(next, next_env) => step = eval_step(&next, &next_env, depth)?,
        }
    }
}

/// Apply a function value to already-evaluated arguments
pub fn apply(
    func: &Value,
    args: Vec<Value>,
    env: &Environment,
    depth: EvalDepth,
) -> Result<Value, Error> {
    match apply_step(func.clone(), args, env, depth)? {
        Step::Return(value) => Ok(value),
        Step::TailCall(body, call_env) => eval_with_depth(&body, &call_env, depth),
    }
}

/// Read and evaluate every form of `source` in `env`, returning the last value
/// that is not `Undefined` (or `nil` if there is none)
pub(crate) fn eval_source(
    source: &str,
    env: &Environment,
    depth: EvalDepth,
    config: ParseConfig,
) -> Result<Value, Error> {
    let mut last = Value::Nil;
    for form in Reader::with_config(source, config) {
        let value = eval_with_depth(&form?, env, depth)?;
        if !matches!(value, Value::Undefined) {
            last = value;
        }
    }
    Ok(last)
}

fn eval_step(expr: &Value, env: &Environment, depth: EvalDepth) -> Result<Step, Error> {
    log::trace!(target: "eval", "[{}] {expr}", depth.current());
    match expr {
        Value::Symbol(name) => env
            .lookup(name)
            .map(Step::Return)
            .ok_or_else(|| Error::UnboundVariable(name.clone())),
        Value::List(items) => match items.split_first() {
            Some((head, args)) => eval_list(head, args, env, depth),
            // The empty list evaluates to itself
            None => Ok(Step::Return(expr.clone())),
        },
        Value::Vector(items) => Ok(Step::Return(Value::Vector(Rc::new(eval_args(
            items, env, depth,
        )?)))),
        Value::HashMap(items) => Ok(Step::Return(Value::HashMap(Rc::new(eval_args(
            items, env, depth,
        )?)))),
        _ => Ok(Step::Return(expr.clone())),
    }
}

fn eval_args(args: &[Value], env: &Environment, depth: EvalDepth) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth(arg, env, depth))
        .collect()
}

fn eval_list(
    head: &Value,
    args: &[Value],
    env: &Environment,
    depth: EvalDepth,
) -> Result<Step, Error> {
    if let Value::Symbol(name) = head
        && let Some(form) = SpecialForm::from_symbol(name)
    {
        return match form {
            SpecialForm::If => eval_if(args, env, depth),
            SpecialForm::Let => eval_let(args, env, depth),
            SpecialForm::Def => eval_def(args, env, depth),
            SpecialForm::Fn => eval_fn(args, env),
            SpecialForm::Do => eval_do(args, env, depth),
            SpecialForm::Quote => eval_quote(args),
            SpecialForm::Reserved => {
                log::debug!(target: "eval", "`{name}` is reserved and evaluates to nil");
                Ok(Step::Return(Value::Nil))
            }
        };
    }

    let func = eval_with_depth(head, env, depth)?;
    let args = eval_args(args, env, depth)?;
    apply_step(func, args, env, depth)
}

fn apply_step(
    func: Value,
    args: Vec<Value>,
    env: &Environment,
    depth: EvalDepth,
) -> Result<Step, Error> {
    match &func {
        Value::BuiltinFunction { id, func: op } => op(args, env, depth)
            .map(Step::Return)
            .map_err(|err| attach_callee(err, id)),
        Value::Closure(closure) => {
            let call_env = bind_params(closure, args)?;
            Ok(Step::TailCall(closure.body.clone(), call_env))
        }
        other => Err(Error::TypeError(format!(
            "cannot apply a non-function: {other}"
        ))),
    }
}

/// Name the builtin in arity errors raised directly by it
fn attach_callee(err: Error, id: &str) -> Error {
    match err {
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, id.to_owned()),
        other => other,
    }
}

/// Fresh frame under the captured environment with parameters bound to `args`
fn bind_params(closure: &Closure, args: Vec<Value>) -> Result<Environment, Error> {
    let arity = closure.arity();
    if arity.validate(args.len()).is_err() {
        let label = closure.name.as_deref().unwrap_or("#<function>");
        return Err(Error::arity_error_with_expr(
            arity,
            args.len(),
            label.to_owned(),
        ));
    }

    let call_env = Environment::child_of(&closure.env);
    let mut args = args.into_iter();
    let mut params = closure.params.iter();
    while let Some(param) = params.next() {
        if param == REST_MARKER {
            if let Some(rest) = params.next() {
                call_env.define(rest.as_str(), Value::List(Rc::new(args.collect())));
            }
            break;
        }
        if let Some(arg) = args.next() {
            call_env.define(param.as_str(), arg);
        }
    }
    Ok(call_env)
}

fn eval_if(args: &[Value], env: &Environment, depth: EvalDepth) -> Result<Step, Error> {
    let (condition, consequent, alternative) = match args {
        [condition, consequent] => (condition, consequent, None),
        [condition, consequent, alternative] => (condition, consequent, Some(alternative)),
        _ => {
            return Err(Error::arity_error_with_expr(
                Arity::Range(2, 3),
                args.len(),
                "if".to_owned(),
            ));
        }
    };

    if eval_with_depth(condition, env, depth)?.is_truthy() {
        Ok(Step::TailCall(consequent.clone(), env.clone()))
    } else {
        match alternative {
            Some(alternative) => Ok(Step::TailCall(alternative.clone(), env.clone())),
            None => Ok(Step::Return(Value::Nil)),
        }
    }
}

fn eval_let(args: &[Value], env: &Environment, depth: EvalDepth) -> Result<Step, Error> {
    let [bindings, body] = args else {
        return Err(Error::arity_error_with_expr(
            Arity::Exact(2),
            args.len(),
            "let*".to_owned(),
        ));
    };
    let Some(bindings) = bindings.as_sequence() else {
        return Err(Error::TypeError(format!(
            "let* bindings must be a list or vector, got {}",
            bindings.type_name()
        )));
    };
    if bindings.len() % 2 != 0 {
        return Err(Error::EvalError(
            "let* bindings must come in symbol/expression pairs".to_owned(),
        ));
    }

    let let_env = Environment::child_of(env);
    for pair in bindings.chunks_exact(2) {
        let [name, init] = pair else { continue };
        let Value::Symbol(name) = name else {
            return Err(Error::EvalError(format!(
                "let* binding name must be a symbol, got {name}"
            )));
        };
        let value = eval_with_depth(init, &let_env, depth)?;
        let_env.define(name.as_str(), value);
    }
    Ok(Step::TailCall(body.clone(), let_env))
}

fn is_fn_form(expr: &Value) -> bool {
    matches!(expr, Value::List(items)
        if matches!(items.first(), Some(Value::Symbol(head)) if head == "fn*"))
}

fn eval_def(args: &[Value], env: &Environment, depth: EvalDepth) -> Result<Step, Error> {
    let [target, init] = args else {
        return Err(Error::arity_error_with_expr(
            Arity::Exact(2),
            args.len(),
            "def!".to_owned(),
        ));
    };
    let Value::Symbol(name) = target else {
        return Err(Error::TypeError(format!(
            "def! requires a symbol, got {}",
            target.type_name()
        )));
    };

    let mut value = eval_with_depth(init, env, depth)?;
    // A function defined by name can refer to itself: the name is also bound
    // in the environment the closure captured.
    if let Value::Closure(closure) = &value
        && is_fn_form(init)
    {
        let named = Value::Closure(Rc::new(closure.named(name)));
        closure.env.define(name.as_str(), named.clone());
        value = named;
    }
    env.define(name.as_str(), value.clone());
    Ok(Step::Return(value))
}

fn eval_fn(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let [params, body] = args else {
        return Err(Error::arity_error_with_expr(
            Arity::Exact(2),
            args.len(),
            "fn*".to_owned(),
        ));
    };
    let Some(params) = params.as_sequence() else {
        return Err(Error::TypeError(format!(
            "fn* parameters must be a list or vector, got {}",
            params.type_name()
        )));
    };

    let params = params
        .iter()
        .map(|param| match param {
            Value::Symbol(name) => Ok(name.clone()),
            other => Err(Error::TypeError(format!(
                "fn* parameters must be symbols, got {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(pos) = params.iter().position(|p| p == REST_MARKER)
        && (pos + 2 != params.len() || params[pos + 1] == REST_MARKER)
    {
        return Err(Error::EvalError(
            "'&' must be followed by exactly one parameter name".to_owned(),
        ));
    }

    Ok(Step::Return(Value::Closure(Rc::new(Closure {
        name: None,
        env: env.clone(),
        params,
        body: body.clone(),
    }))))
}

fn eval_do(args: &[Value], env: &Environment, depth: EvalDepth) -> Result<Step, Error> {
    let Some((last, init)) = args.split_last() else {
        return Ok(Step::Return(Value::Nil));
    };
    for form in init {
        eval_with_depth(form, env, depth)?;
    }
    Ok(Step::TailCall(last.clone(), env.clone()))
}

fn eval_quote(args: &[Value]) -> Result<Step, Error> {
    match args {
        [form] => Ok(Step::Return(form.clone())),
        _ => Err(Error::arity_error_with_expr(
            Arity::Exact(1),
            args.len(),
            "quote".to_owned(),
        )),
    }
}
