use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;
use malrs::ast::{Value, list, sym, val};
use malrs::evaluator::Environment;
use malrs::{Error, Interpreter};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process::ExitCode;

fn cli() -> Command {
    Command::new("malrs")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A small Lisp interpreter")
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("Source file to load before starting the REPL"),
        )
        .arg(
            Arg::new("batch")
                .long("batch")
                .action(ArgAction::SetTrue)
                .requires("file")
                .help("Load FILE and exit without starting the REPL"),
        )
        .arg(
            Arg::new("eval")
                .short('e')
                .long("eval")
                .value_name("EXPR")
                .help("Evaluate EXPR, print the result and exit"),
        )
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = cli().get_matches();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| run(&args)));

    match result {
        Ok(code) => code,
        Err(panic_info) => {
            eprintln!("The REPL encountered an unexpected error and must exit.");

            if let Some(msg) = panic_info.downcast_ref::<&str>() {
                eprintln!("Error: {msg}");
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                eprintln!("Error: {msg}");
            } else {
                eprintln!("Error: Unknown panic occurred");
            }

            ExitCode::FAILURE
        }
    }
}

fn run(args: &ArgMatches) -> ExitCode {
    let interp = Interpreter::new();

    // Callable from user code as well as through :help
    interp
        .env()
        .register_builtin_operation::<_, (), Value>("help", print_help);

    if let Some(path) = args.get_one::<String>("file") {
        info!("loading {path}");
        let form = list(vec![sym("load-file"), val(path.as_str())]);
        if let Err(e) = interp.eval(&form) {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
        if args.get_flag("batch") {
            return ExitCode::SUCCESS;
        }
    }

    if let Some(source) = args.get_one::<String>("eval") {
        return match interp.rep(source) {
            Ok(printed) => {
                println!("{printed}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    run_repl(&interp)
}

fn run_repl(interp: &Interpreter) -> ExitCode {
    println!("malrs {}", env!("CARGO_PKG_VERSION"));
    println!("Enter expressions like: (+ 1 2)");
    println!("Type :help for more commands. An empty line or Ctrl+D exits.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut json_mode = false;

    loop {
        match rl.readline("user> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    break;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        _ = print_help().is_ok();
                        continue;
                    }
                    ":env" => {
                        print_environment(interp.env());
                        continue;
                    }
                    ":json" => {
                        json_mode = toggle_json(json_mode);
                        continue;
                    }
                    ":quit" | ":exit" => break,
                    _ => {}
                }

                match interp.eval_forms(line) {
                    // A comment-only line prints nothing
                    Ok(None) => {}
                    Ok(Some(result)) => print_result(&result, json_mode),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(err) => {
                println!("Error: {err:?}");
                return ExitCode::FAILURE;
            }
        }
    }

    println!("Goodbye!");
    ExitCode::SUCCESS
}

#[cfg(feature = "json")]
fn toggle_json(enabled: bool) -> bool {
    if enabled {
        println!("Results shown as S-expressions");
    } else {
        println!("Results shown as JSON where possible");
    }
    !enabled
}

#[cfg(not(feature = "json"))]
fn toggle_json(enabled: bool) -> bool {
    println!("JSON output is not available: built without the `json` feature");
    enabled
}

fn print_result(result: &Value, json_mode: bool) {
    if json_mode && let Some(json) = json_form(result) {
        println!("{json}");
    } else {
        println!("{result}");
    }
}

// None falls back to the readable form, for values JSON cannot hold
#[cfg(feature = "json")]
fn json_form(result: &Value) -> Option<String> {
    match malrs::json::to_json(result) {
        Ok(json) => Some(json.to_string()),
        Err(e) => {
            log::debug!("no JSON form for result: {e}");
            None
        }
    }
}

#[cfg(not(feature = "json"))]
fn json_form(_result: &Value) -> Option<String> {
    None
}

fn print_help() -> Result<Value, Error> {
    println!("malrs REPL commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :json      - Toggle JSON output of results");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  (def! name expr), (let* [a 1 b 2] body), (if c then else)");
    println!("  (fn* [x & rest] body), (do e1 e2 ...), (quote form), 'form");
    println!();
    println!("Examples:");
    println!("  (def! inc (fn* (x) (+ x 1)))");
    println!("  (let* (a (atom 0)) (do (swap! a inc) @a))");
    println!("  (load-file \"prelude.mal\")");
    println!();

    Ok(Value::Nil)
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        for row in builtins.chunks(4) {
            let line: String = row.iter().map(|name| format!("  {name:<15}")).collect();
            println!("{}", line.trim_end());
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
