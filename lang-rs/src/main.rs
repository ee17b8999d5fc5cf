use std::io::Read as _;
use std::process::ExitCode;

use lang::cli::{self, Source, USAGE};
use lang::script::{Interpreter, InterpreterOptions, MODULE_SCOPE};
use lang::{logging, LangError};

/// Deeply recursive scripts need more than the default main-thread stack.
const INTERPRETER_STACK: usize = 256 * 1024 * 1024;

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("lang: {e}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    logging::init(args.debug);

    let worker = std::thread::Builder::new()
        .name("lang-interpreter".to_owned())
        .stack_size(INTERPRETER_STACK)
        .spawn(move || run(args));
    match worker.map(|h| h.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("lang: interpreter thread panicked");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("lang: can't start interpreter thread: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: cli::CliArgs) -> ExitCode {
    let options = InterpreterOptions {
        library_dirs: cli::resolve_libdirs(&args.libdirs),
        echo_output: true,
        ..InterpreterOptions::default()
    };
    let mut it = Interpreter::new(options);
    it.set_args(&args.script_args);

    let result = match &args.source {
        Source::Code(code) => it.interpret(code),
        Source::File(path) => it.interpret_file(&path.to_string_lossy()),
        Source::Stdin => {
            let mut src = String::new();
            match std::io::stdin().read_to_string(&mut src) {
                Ok(_) => it.interpret(&src),
                Err(e) => Err(LangError::Io { path: "<stdin>".to_owned(), message: e.to_string() }),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("lang: {e}");
        return ExitCode::FAILURE;
    }

    if args.print_translations {
        for (key, value) in it.translation_map(MODULE_SCOPE).unwrap_or_default() {
            println!("{key} = {value}");
        }
    }

    let thrown = it.is_thrown_value();
    match it.get_and_reset_return_value() {
        Some(v) if thrown => {
            eprintln!("lang: uncaught {v}");
            ExitCode::FAILURE
        }
        Some(v) => match v.int() {
            n @ 1..=255 if v.data_type() == lang::script::DataType::Int => ExitCode::from(n as u8),
            _ => ExitCode::SUCCESS,
        },
        None => ExitCode::SUCCESS,
    }
}
