use crate::Arity;
use crate::Error;
use crate::ast::Value;
use crate::evaluator::{EvalDepth, Environment};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::rc::Rc;

// Adapter layer that turns strongly-typed Rust functions into the erased
// `OperationFn` stored in `Value::BuiltinFunction`. Registration goes through
// `Environment`; this module only does argument extraction and arity checks.

/// Erased builtin function type.
///
/// Builtins receive ownership of their evaluated arguments, the environment of
/// the call site (needed by `eval` and `load-file`) and the current evaluation
/// depth, so that builtins which re-enter the evaluator stay within its limit.
pub type OperationFn = dyn Fn(Vec<Value>, &Environment, EvalDepth) -> Result<Value, Error>;

/// Box a closure as an [`OperationFn`]
pub(crate) fn erase<F>(func: F) -> Rc<OperationFn>
where
    F: Fn(Vec<Value>, &Environment, EvalDepth) -> Result<Value, Error> + 'static,
{
    Rc::new(func)
}

// =====================================================================
// Fixed parameters
// =====================================================================

/// Turns one argument slot into a typed parameter.
///
/// `Param<'a>` may borrow from the slot (`&str`) or take it by value (`Value`).
pub trait FromParam {
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        Ok(std::mem::replace(value, Value::Undefined))
    }
}

impl FromParam for i64 {
    type Param<'a> = i64;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        std::mem::replace(value, Value::Undefined).try_into()
    }
}

impl FromParam for bool {
    type Param<'a> = bool;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        std::mem::replace(value, Value::Undefined).try_into()
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        if let Value::String(s) = value {
            Ok(s.as_str())
        } else {
            Err(Error::TypeError(format!(
                "expected string, got {}",
                value.type_name()
            )))
        }
    }
}

// =====================================================================
// Typed iterators over the argument tail
// =====================================================================

/// How to view each element of an argument slice
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    fn precheck(slice: &[Value]) -> Result<(), Error>;
    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>>;
}

/// Iterator over the rest arguments, typed by a [`ValueElementKind`].
/// Elements are validated up front, so iteration itself cannot fail.
#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }

    /// The arguments not yet yielded
    pub fn as_slice(&self) -> &'a [Value] {
        self.inner.as_slice()
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // `project` only returns None for elements the precheck rejects
        self.inner.by_ref().find_map(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for TypedValueIter<'_, K> where K: ValueElementKind {}
impl<K> FusedIterator for TypedValueIter<'_, K> where K: ValueElementKind {}

#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;

    fn precheck(_slice: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        Some(v)
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ValueElementKind for NumberKind {
    type Item<'a> = i64;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        match slice.iter().find(|v| !matches!(v, Value::Integer(_))) {
            Some(bad) => Err(Error::TypeError(format!(
                "expected integer, got {}",
                bad.type_name()
            ))),
            None => Ok(()),
        }
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

/// Borrowed iterator over the remaining arguments
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Iterator over the remaining arguments, all of which must be integers
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

/// Builds a rest parameter from the argument tail
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

// =====================================================================
// Adapters
// =====================================================================

/// Fixed-arity typed functions, parameterized by their argument tuple
pub trait IntoOperation<Args, R> {
    fn into_operation(self) -> Rc<OperationFn>;
}

/// Functions whose last parameter is a rest iterator, optionally after a
/// fixed prefix of [`FromParam`] parameters
pub trait IntoVariadicOperation<Args, R> {
    fn into_variadic_operation(self) -> Rc<OperationFn>;
}

impl<F, I, R> IntoVariadicOperation<(I,), R> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> Result<R, Error> + 'static,
    R: Into<Value>,
{
    fn into_variadic_operation(self) -> Rc<OperationFn> {
        erase(move |args: Vec<Value>, _env: &Environment, _depth: EvalDepth| {
            let rest_param: <I as FromRest>::Param<'_> = <I as FromRest>::from_rest(&args[..])?;
            (self)(rest_param).map(Into::into)
        })
    }
}

macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, ), R> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn(
                    $( <$A as FromParam>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> Result<R, Error>
                + 'static,
            R: Into<Value>,
        {
            fn into_variadic_operation(self) -> Rc<OperationFn> {
                erase(move |mut args: Vec<Value>, _env: &Environment, _depth: EvalDepth| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+, ref mut rest @ .. ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let rest_param: <I as FromRest>::Param<'_> =
                                <I as FromRest>::from_rest(&*rest)?;

                            (self)( $( $p ),+, rest_param ).map(Into::into)
                        }
                        _ => Err(Error::ArityError {
                            expected: Arity::AtLeast($prefix),
                            got: len,
                            expression: None,
                        }),
                    }
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, v0, p0: A1);
impl_into_variadic_operation_for_prefix_and_rest!(2, v0, p0: A1, v1, p1: A2);
impl_into_variadic_operation_for_prefix_and_rest!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);

/// Checks the argument count up front, then destructures the owned argument
/// vector into local slots so that `FromParam` can borrow or consume each one.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ ), R> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> Result<R, Error> + 'static,
            $( $A: FromParam, )+
            R: Into<Value>,
        {
            fn into_operation(self) -> Rc<OperationFn> {
                erase(move |mut args: Vec<Value>, _env: &Environment, _depth: EvalDepth| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            (self)( $( $p ),+ ).map(Into::into)
                        }
                        _ => Err(Error::arity_error($arity, len)),
                    }
                })
            }
        }
    };
}

impl<F, R> IntoOperation<(), R> for F
where
    F: Fn() -> Result<R, Error> + 'static,
    R: Into<Value>,
{
    fn into_operation(self) -> Rc<OperationFn> {
        erase(move |args: Vec<Value>, _env: &Environment, _depth: EvalDepth| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }
            (self)().map(Into::into)
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_into_operation_for_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{val, vector};

    fn call(op: &Rc<OperationFn>, args: Vec<Value>) -> Result<Value, Error> {
        op(args, &Environment::new(), EvalDepth::default())
    }

    #[test]
    fn test_fixed_arity_adapter_checks_count_and_types() {
        fn sub(a: i64, b: i64) -> Result<i64, Error> {
            Ok(a - b)
        }
        let op = IntoOperation::<(i64, i64), i64>::into_operation(sub);

        assert_eq!(call(&op, vec![val(7), val(2)]).unwrap(), val(5));
        assert!(matches!(
            call(&op, vec![val(7)]),
            Err(Error::ArityError { got: 1, .. })
        ));
        assert!(matches!(
            call(&op, vec![val(7), val("x")]),
            Err(Error::TypeError(msg)) if msg == "expected integer, got string"
        ));
    }

    #[test]
    fn test_borrowed_str_and_owned_value_params() {
        fn describe(label: &str, v: Value) -> Result<String, Error> {
            Ok(format!("{label}={v}"))
        }
        let op = IntoOperation::<(&str, Value), String>::into_operation(describe);
        assert_eq!(
            call(&op, vec![val("x"), vector(vec![val(1)])]).unwrap(),
            val("x=[1]")
        );
        assert!(call(&op, vec![val(1), val(2)]).is_err());
    }

    #[test]
    fn test_zero_arg_adapter() {
        fn answer() -> Result<i64, Error> {
            Ok(42)
        }
        let op = IntoOperation::<(), i64>::into_operation(answer);
        assert_eq!(call(&op, vec![]).unwrap(), val(42));
        assert!(call(&op, vec![val(1)]).is_err());
    }

    #[test]
    fn test_rest_adapters() {
        fn sum(nums: NumIter<'_>) -> Result<i64, Error> {
            Ok(nums.sum())
        }
        fn scaled(factor: i64, nums: NumIter<'_>) -> Result<i64, Error> {
            Ok(factor * nums.sum::<i64>())
        }
        fn count_rest(_first: Value, rest: ValueIter<'_>) -> Result<i64, Error> {
            Ok(rest.len() as i64)
        }

        let sum_op = IntoVariadicOperation::<(NumIter<'static>,), i64>::into_variadic_operation(sum);
        assert_eq!(call(&sum_op, vec![]).unwrap(), val(0));
        assert_eq!(call(&sum_op, vec![val(1), val(2), val(3)]).unwrap(), val(6));
        assert!(matches!(
            call(&sum_op, vec![val(1), val(true)]),
            Err(Error::TypeError(_))
        ));

        let scaled_op =
            IntoVariadicOperation::<(i64, NumIter<'static>), i64>::into_variadic_operation(scaled);
        assert_eq!(call(&scaled_op, vec![val(2), val(1), val(2)]).unwrap(), val(6));
        assert!(matches!(
            call(&scaled_op, vec![]),
            Err(Error::ArityError {
                expected: Arity::AtLeast(1),
                got: 0,
                ..
            })
        ));

        let count_op =
            IntoVariadicOperation::<(Value, ValueIter<'static>), i64>::into_variadic_operation(
                count_rest,
            );
        assert_eq!(
            call(&count_op, vec![val(1), val("a"), val(true)]).unwrap(),
            val(2)
        );
    }
}
