//! `loxrt`: run a script file or start an interactive REPL.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use loxrt::{Diagnostic, DiagnosticLevel, GcConfig, InterpretResult, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;

#[derive(Parser)]
#[command(
    name = "loxrt",
    about = "A bytecode compiler and VM for a small scripting language"
)]
struct Cli {
    /// Script to run. Omit to start an interactive REPL.
    script: Option<String>,

    /// Enable stress-test garbage collection (collect on every growing allocation).
    #[arg(long)]
    stress_gc: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = GcConfig::default().with_stress_gc(cli.stress_gc);
    match cli.script {
        Some(path) => run_file(&path, config),
        None => run_repl(config),
    }
}

fn run_file(path: &str, config: GcConfig) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("loxrt: couldn't read '{path}': {e}");
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };
    let mut vm = Vm::with_config(config);
    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError(diagnostics) => {
            print_diagnostics(&diagnostics);
            ExitCode::from(EXIT_COMPILE_ERROR)
        }
        InterpretResult::RuntimeError(diagnostic) => {
            eprintln!("{diagnostic}");
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

/// Keeps a single `Vm` alive across lines so globals defined on one line
/// stay visible on the next.
fn run_repl(config: GcConfig) -> ExitCode {
    let mut vm = Vm::with_config(config);
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("loxrt: couldn't start the line editor: {e}");
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match vm.interpret(&line) {
                    InterpretResult::Ok => {}
                    InterpretResult::CompileError(diagnostics) => print_diagnostics(&diagnostics),
                    InterpretResult::RuntimeError(diagnostic) => eprintln!("{diagnostic}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("loxrt: {e}");
                break;
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        debug_assert_eq!(diagnostic.level, DiagnosticLevel::Error);
        eprintln!("{diagnostic}");
    }
}
