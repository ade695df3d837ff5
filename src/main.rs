mod ast;
mod calculus;
mod codegen;
mod config;
mod driver;
mod error;
mod highlighter;
mod jit;
mod lexer;
mod library;
mod parser;
mod token;

use clap::Parser as ClapParser;
use config::{HISTORY_FILE, PROMPT, WELCOME_FOOTER, WELCOME_MESSAGE, WELCOME_SUBTITLE};
use driver::{format_value, Driver, Reply};
use highlighter::CalcHelper;
use inkwell::context::Context;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use std::path::PathBuf;

/// Interactive calculator-language JIT compiler
#[derive(ClapParser, Debug)]
#[command(name = "calc-jit")]
#[command(version = config::VERSION)]
#[command(about = "An interactive calculator language compiled to native code")]
#[command(long_about = "A REPL that JIT-compiles calculator input and automatically \
derives a partial-derivative function for every parameter of each definition")]
struct CliArgs {
    /// Script file to execute (optional - if not provided, starts REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Do not dump the IR of installed functions to stderr
    #[arg(long = "no-ir")]
    no_ir: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let context = Context::create();
    let mut driver = Driver::new(&context)?;
    driver.set_dump_ir(!args.no_ir);

    // Script mode: execute the file and exit.
    if let Some(script_path) = args.script {
        return run_script(&script_path, &mut driver);
    }

    // REPL mode: interactive loop with history and syntax highlighting.
    let config = Config::builder().auto_add_history(true).build();
    let mut rl =
        Editor::with_config(config).map_err(|e| format!("Failed to initialize REPL: {}", e))?;
    rl.set_helper(Some(CalcHelper::new()));
    let _ = rl.load_history(HISTORY_FILE);

    println!("{}", WELCOME_MESSAGE);
    println!("{}", WELCOME_SUBTITLE);
    println!("{}", WELCOME_FOOTER);

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                for reply in driver.run_line(&line) {
                    report(&reply);
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C discards the line and keeps the session.
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D ends the session.
                println!();
                break;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}

/// Prints one statement's outcome the way the REPL reports it.
fn report(reply: &Result<Reply, error::CalcError>) {
    match reply {
        Ok(Reply::Value(value)) => println!("Evaluated to {}", format_value(*value)),
        // Definitions and externs already dumped their IR to stderr.
        Ok(Reply::Definition(_)) | Ok(Reply::Extern(_)) => {}
        Err(err) => eprintln!("Error: {}", err),
    }
}

/// Executes a script file line by line, stopping at the first error.
fn run_script(path: &PathBuf, driver: &mut Driver) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read script file {}: {}", path.display(), e))?;

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        for reply in driver.run_line(line) {
            match reply {
                Ok(Reply::Value(value)) => println!("Evaluated to {}", format_value(value)),
                Ok(_) => {}
                Err(err) => return Err(format!("{}: {}", path.display(), err).into()),
            }
        }
    }
    Ok(())
}
