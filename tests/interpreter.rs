#![expect(clippy::unwrap_used)] // test code OK

use malrs::ast::{Value, kw, val};
use malrs::builtinops::SourceLoader;
use malrs::printer::{PrintMode, pr_str};
use malrs::{Config, Error, Interpreter, ParseErrorKind};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use test_log::test;

struct MemoryLoader(HashMap<&'static str, &'static str>);

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &str) -> io::Result<String> {
        match self.0.get(path) {
            Some(text) => Ok((*text).to_owned()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "file not found")),
        }
    }
}

fn interpreter_with_files(files: &[(&'static str, &'static str)]) -> Interpreter {
    let loader = MemoryLoader(files.iter().copied().collect());
    Interpreter::with_loader(Config::default(), Rc::new(loader))
}

/// Evaluate each line in order against one interpreter, comparing the printed result
fn run_session(interp: &Interpreter, session: &[(&str, Result<&str, &str>)]) {
    for (i, (input, expected)) in session.iter().enumerate() {
        match (interp.rep(input), expected) {
            (Ok(actual), Ok(expected)) => {
                assert_eq!(actual, *expected, "step #{}: {input}", i + 1);
            }
            (Err(err), Err(fragment)) => {
                let message = err.to_string();
                assert!(
                    message.contains(fragment),
                    "step #{}: {input}: expected error containing '{fragment}', got '{message}'",
                    i + 1
                );
            }
            (actual, expected) => {
                panic!("step #{}: {input}: expected {expected:?}, got {actual:?}", i + 1)
            }
        }
    }
}

#[test]
fn test_literal_round_trip() {
    let interp = Interpreter::new();
    let literals = vec![
        val(0),
        val(-17),
        val(i64::MAX),
        val(i64::MIN),
        val(true),
        val(false),
        kw("k"),
        kw("with-dash?"),
        val(""),
        val("plain"),
        val("quote \" backslash \\ newline \n end"),
    ];
    for literal in literals {
        let printed = pr_str(&literal, PrintMode::Readable);
        assert_eq!(interp.read(&printed).unwrap(), literal, "{printed}");
    }
}

#[test]
fn test_arithmetic_and_let() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            ("(+ 1 2 3)", Ok("6")),
            ("(- 10 1 2)", Ok("7")),
            ("(* 2 3 4)", Ok("24")),
            ("(/ 20 2 5)", Ok("2")),
            ("(let* (x 2 y 3) (+ x y))", Ok("5")),
            ("(let* [x 2 y (* x 10)] y)", Ok("20")),
            ("x", Err("'x' not found")),
            ("y", Err("'y' not found")),
            ("(+ 1 \"2\")", Err("Type error")),
            ("(/ 1 0)", Err("Division by zero")),
        ],
    );
}

#[test]
fn test_recursion_and_closures() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            (
                "(def! fact (fn* (n) (if (<= n 1) 1 (* n (fact (- n 1))))))",
                Ok("#<function:fact>"),
            ),
            ("(fact 5)", Ok("120")),
            ("(fact 20)", Ok("2432902008176640000")),
            ("(def! make-adder (fn* (n) (fn* (x) (+ x n))))", Ok("#<function:make-adder>")),
            ("(def! add5 (make-adder 5))", Ok("#<function>")),
            ("(add5 10)", Ok("15")),
            ("((fn* (& more) (count more)) 1 2 3)", Ok("3")),
            ("((fn* (a & more) more) 1)", Ok("()")),
            ("(add5)", Err("expected 1 arguments, got 0")),
        ],
    );
}

#[test]
fn test_tail_recursive_loop() {
    let interp = Interpreter::new();
    interp
        .eval_str("(def! sum-to (fn* (n acc) (if (= n 0) acc (sum-to (- n 1) (+ acc n)))))")
        .unwrap();
    assert_eq!(interp.rep("(sum-to 10000 0)").unwrap(), "50005000");
}

#[test]
fn test_runaway_recursion_is_an_error() {
    let interp = Interpreter::with_config(Config {
        max_eval_depth: 64,
        ..Config::default()
    });
    interp
        .eval_str("(def! down (fn* (n) (+ 1 (down (+ n 1)))))")
        .unwrap();
    let err = interp.eval_str("(down 0)").unwrap_err();
    assert!(
        matches!(err, Error::EvalError(ref msg) if msg.contains("depth limit")),
        "{err}"
    );
    // The interpreter stays usable afterwards
    assert_eq!(interp.rep("(+ 1 1)").unwrap(), "2");
}

#[test]
fn test_deeply_nested_values_compare_and_drop() {
    let interp = Interpreter::new();
    interp
        .eval_str("(def! wrap (fn* (n acc) (if (= n 0) acc (wrap (- n 1) (list acc)))))")
        .unwrap();
    assert_eq!(interp.rep("(count (wrap 200000 nil))").unwrap(), "1");

    interp.eval_str("(def! x (wrap 200000 nil))").unwrap();
    run_session(
        &interp,
        &[
            ("(= x x)", Ok("true")),
            ("(= x (wrap 200000 nil))", Ok("true")),
            ("(= x (wrap 199999 nil))", Ok("false")),
            ("(= x (wrap 200000 1))", Ok("false")),
            // Releases the only reference to the nested list
            ("(def! x 1)", Ok("1")),
        ],
    );

    interp
        .eval_str(
            "(def! nest-atom (fn* (n acc) (if (= n 0) acc (nest-atom (- n 1) (atom acc)))))",
        )
        .unwrap();
    interp.eval_str("(def! a (nest-atom 200000 nil))").unwrap();
    assert_eq!(interp.rep("(atom? a)").unwrap(), "true");
    assert_eq!(interp.rep("(def! a nil)").unwrap(), "nil");

    // Each closure captures the frame binding the one before it
    interp
        .eval_str("(def! grow (fn* (n f) (if (= n 0) f (grow (- n 1) (fn* () f)))))")
        .unwrap();
    interp.eval_str("(def! g (grow 200000 nil))").unwrap();
    assert_eq!(interp.rep("(((g)))").unwrap(), "#<function>");
    assert_eq!(interp.rep("(def! g nil)").unwrap(), "nil");
}

#[test]
fn test_comment_only_input_has_no_forms() {
    let interp = Interpreter::new();
    assert_eq!(interp.eval_forms("; nothing but a comment").unwrap(), None);
    assert_eq!(interp.eval_forms("   ").unwrap(), None);
    assert_eq!(interp.eval_forms("(+ 1 2) ; sum").unwrap(), Some(val(3)));
    // eval_str still reports nil for the same input
    assert_eq!(interp.rep("; nothing but a comment").unwrap(), "nil");
}

#[test]
fn test_structural_equality() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            ("(= (list 1 2 3) [1 2 3])", Ok("true")),
            ("(= (list 1 2) (list 1 2 3))", Ok("false")),
            ("(= [1 [2 (3)]] '(1 (2 [3])))", Ok("true")),
            ("(= \"a\" :a)", Ok("false")),
            ("(= {:a 1} {:a 1})", Ok("true")),
            ("(= {:a 1 :b 2} {:b 2 :a 1})", Ok("false")),
            ("(= (atom 1) (atom 1))", Ok("false")),
            ("(let* (a (atom 1)) (= a a))", Ok("true")),
        ],
    );
}

#[test]
fn test_atoms_are_shared() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            ("(def! a (atom 1))", Ok("(atom 1)")),
            ("(def! holder (list a a))", Ok("((atom 1) (atom 1))")),
            ("(reset! a 5)", Ok("5")),
            ("(deref a)", Ok("5")),
            ("(def! inc (fn* (x) (+ x 1)))", Ok("#<function:inc>")),
            ("(swap! a inc)", Ok("6")),
            ("(swap! a + 10 100)", Ok("116")),
            ("@a", Ok("116")),
            ("holder", Ok("((atom 116) (atom 116))")),
            ("(def! bump (fn* () (swap! a inc)))", Ok("#<function:bump>")),
            ("(do (bump) (bump) @a)", Ok("118")),
            ("(atom? a)", Ok("true")),
            ("(atom? @a)", Ok("false")),
            ("(swap! 1 inc)", Err("swap! expects an atom")),
        ],
    );
}

#[test]
fn test_reader_errors_are_recoverable() {
    let interp = Interpreter::new();

    let err = interp.eval_str("(1 2 3").unwrap_err();
    let Error::ParseError(parse_error) = &err else {
        panic!("expected parse error, got {err}");
    };
    assert_eq!(parse_error.kind, ParseErrorKind::Incomplete);
    assert!(parse_error.message.contains(')'), "{}", parse_error.message);

    assert!(matches!(
        interp.eval_str("(+ 1 2))"),
        Err(Error::ParseError(_))
    ));
    assert!(matches!(interp.eval_str("\"open"), Err(Error::ParseError(_))));
    assert_eq!(interp.rep("(+ 1 2)").unwrap(), "3");
}

#[test]
fn test_unbound_symbol_names_the_symbol() {
    let interp = Interpreter::new();
    let err = interp.eval_str("undefined-name").unwrap_err();
    assert_eq!(err, Error::UnboundVariable("undefined-name".to_owned()));
    assert!(err.to_string().contains("undefined-name"));
}

#[test]
fn test_load_file_defines_into_calling_environment() {
    let interp = interpreter_with_files(&[
        (
            "lib.mal",
            ";; helpers\n(def! square (fn* (x) (* x x)))\n(def! answer (square 7))\nanswer\n",
        ),
        ("empty.mal", "; nothing here\n"),
        ("broken.mal", "(def! ok 1)\n(def! bad (+ 1 \"x\"))\n"),
    ]);

    run_session(
        &interp,
        &[
            ("(load-file \"lib.mal\")", Ok("49")),
            ("(square 3)", Ok("9")),
            ("(load-file \"empty.mal\")", Ok("nil")),
            ("(slurp \"empty.mal\")", Ok("\"; nothing here\\n\"")),
            ("(load-file \"missing.mal\")", Err("IOError: missing.mal")),
            ("(load-file \"broken.mal\")", Err("Type error")),
            // Forms before the failing one were already evaluated
            ("ok", Ok("1")),
            (
                "(let* (local 3) (eval (read-string \"(square local)\")))",
                Ok("9"),
            ),
        ],
    );
}

#[test]
fn test_printing_builtins() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            ("(pr-str \"a\\nb\" [1 :k] nil)", Ok("\"\\\"a\\\\nb\\\" [1 :k] nil\"")),
            ("(str \"a\" 1 \"b\" [\"c\"])", Ok("\"a1b[c]\"")),
            ("(str)", Ok("\"\"")),
            ("(read-string (pr-str \"x\\\\y\"))", Ok("\"x\\\\y\"")),
            ("(prn 1 \"two\")", Ok("nil")),
            ("(println 1 \"two\")", Ok("nil")),
        ],
    );
}

#[test]
fn test_truthiness_is_uniform() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            ("(if () 1 2)", Ok("1")),
            ("(not ())", Ok("false")),
            ("(if 0 1 2)", Ok("1")),
            ("(not 0)", Ok("false")),
            ("(if nil 1 2)", Ok("2")),
            ("(not nil)", Ok("true")),
            ("(if false 1)", Ok("nil")),
        ],
    );
}

#[test]
fn test_quote_and_reserved_forms() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            ("'(1 undefined-thing)", Ok("(1 undefined-thing)")),
            ("(quote sym)", Ok("sym")),
            ("(cond true 1)", Ok("nil")),
            ("(and true false)", Ok("nil")),
            ("`(1 ~x)", Ok("nil")),
        ],
    );
}

#[test]
fn test_interpreters_share_nothing() {
    let first = Interpreter::new();
    let second = Interpreter::new();
    first.eval_str("(def! only-in-first 1)").unwrap();
    assert!(matches!(
        second.eval_str("only-in-first"),
        Err(Error::UnboundVariable(_))
    ));
    // Redefining a builtin in one interpreter does not leak either
    first.eval_str("(def! + (fn* (a b) 0))").unwrap();
    assert_eq!(first.rep("(+ 2 2)").unwrap(), "0");
    assert_eq!(second.rep("(+ 2 2)").unwrap(), "4");
}

#[cfg(feature = "json")]
#[test]
fn test_json_round_trip_through_builtins() {
    let interp = Interpreter::new();
    run_session(
        &interp,
        &[
            (
                "(json-encode {:name \"mal\" :tags [\"lisp\" 1] :none nil})",
                Ok(r#""{\"name\":\"mal\",\"none\":null,\"tags\":[\"lisp\",1]}""#),
            ),
            (
                "(json-decode \"{\\\"a\\\": [1, true]}\")",
                Ok("{\"a\" [1 true]}"),
            ),
            ("(json-encode (atom 1))", Err("cannot encode atom")),
        ],
    );
    let decoded = interp.eval_str("(json-decode \"[]\")").unwrap();
    assert_eq!(decoded, Value::Vector(Rc::new(vec![])));
}
