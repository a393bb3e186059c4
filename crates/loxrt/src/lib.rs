//! `loxrt`: a Pratt-parsed, single-pass-compiled bytecode virtual machine
//! for a small dynamically-typed scripting language.
//!
//! The pipeline is the classic three-stage one: [`scanner`] turns source
//! text into [`token::Token`]s, [`compiler`] consumes tokens one at a time
//! and emits [`bytecode::Chunk`]s directly (no separate AST), and [`vm`]
//! executes those chunks against a stack of [`value::Value`]s. Heap objects
//! (strings, functions, closures, classes, instances) are owned by a
//! mark-sweep [`gc::Heap`].

pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod gc;
pub mod native;
pub mod object;
pub mod scanner;
pub mod table;
pub mod token;
pub mod value;
pub mod vm;

pub use diagnostic::{Diagnostic, DiagnosticAt, DiagnosticLevel};
pub use gc::{GcConfig, Heap};
pub use value::Value;
pub use vm::{InterpretResult, Vm};

/// Compiles and runs `source` against `vm`'s existing state, so a REPL can
/// call this repeatedly and keep accumulated globals between calls.
pub fn interpret(source: &str, vm: &mut Vm) -> InterpretResult {
    vm.interpret(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpret_runs_a_trivial_program() {
        let mut vm = Vm::with_config(GcConfig::default());
        assert!(matches!(
            interpret("print 1 + 1;", &mut vm),
            InterpretResult::Ok
        ));
    }

    #[test]
    fn interpret_reports_compile_errors() {
        let mut vm = Vm::with_config(GcConfig::default());
        match interpret("var;", &mut vm) {
            InterpretResult::CompileError(diags) => assert!(!diags.is_empty()),
            other => panic!("expected compile error, got {other:?}"),
        }
    }
}
