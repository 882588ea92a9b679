//! CLI driver (spec.md §6). The only place permitted to call
//! `process::exit` or print directly to stderr — grounded on the teacher's
//! `main.rs` argument handling (`exitcode` crate, `env::args().skip(1)`),
//! generalized from its subcommand-based surface to the plain
//! `0 | 1 | 2+` argument contract spec.md specifies.

use std::fs;
use std::io::{self, Write};

use ember::error::InterpretError;
use ember::Vm;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.len() {
        0 => run_repl(),
        1 => run_file(&args[0]),
        _ => {
            eprintln!("Usage: ember [script]");
            std::process::exit(exitcode::USAGE);
        }
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("Error reading '{path}': {err}");
        std::process::exit(exitcode::IOERR);
    });

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => std::process::exit(exitcode::OK),
        Err(InterpretError::Compile(errors)) => {
            for err in &errors {
                eprintln!("{err}");
            }
            std::process::exit(exitcode::DATAERR);
        }
        Err(InterpretError::Runtime(err)) => {
            eprintln!("{}", err.render());
            std::process::exit(exitcode::SOFTWARE);
        }
    }
}

fn run_repl() {
    let mut rl = rustyline::DefaultEditor::new().unwrap_or_else(|err| {
        eprintln!("Failed to start line editor: {err}");
        std::process::exit(exitcode::IOERR);
    });

    let mut vm = Vm::new();
    loop {
        match rl.readline(">> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match vm.interpret_line(&line) {
                    Ok(()) => {}
                    Err(InterpretError::Compile(errors)) => {
                        for err in &errors {
                            eprintln!("{err}");
                        }
                    }
                    Err(InterpretError::Runtime(err)) => {
                        eprintln!("{}", err.render());
                    }
                }
                let _ = io::stdout().flush();
            }
            Err(rustyline::error::ReadlineError::Eof)
            | Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                std::process::exit(exitcode::IOERR);
            }
        }
    }
}
