//! AtomC Compiler Library
//!
//! Lexing, symbol-table/type bookkeeping, recursive-descent parsing with
//! interleaved semantic analysis and code generation, and the diagnostics
//! and dump helpers the `atomc` CLI binary drives. Depends on
//! `atomc-runtime` for the bytecode container (`Chunk`) it emits into and
//! the `Vm` it can hand a compiled program to for immediate execution.

pub mod diagnostics;
pub mod dump;
pub mod emitter;
pub mod lexer;
pub mod parser;
pub mod symtab;
pub mod token;
pub mod types;

pub use diagnostics::{CompileError, Phase};
pub use lexer::Lexer;
pub use parser::{compile, CompiledUnit};
pub use token::Token;

use atomc_runtime::Vm;

/// Lex and compile an AtomC source string to a [`CompiledUnit`]; the single
/// entry point both the CLI and the integration tests use.
pub fn compile_source(source: &str) -> Result<CompiledUnit, CompileError> {
    let tokens = Lexer::tokenize(source)?;
    compile(tokens)
}

/// Lex only, for `--dump-tokens` without running the rest of the pipeline.
pub fn tokenize_source(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::tokenize(source)
}

/// Build a [`Vm`] for a compiled unit, writing program output to stdout.
/// `Vm::new` already registers the `put_i`/`put_d` externs the code
/// generator's extern ids (0 and 1) assume.
pub fn vm_for(unit: &CompiledUnit) -> Vm {
    Vm::new(unit.chunk.clone(), unit.globals_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn while_loop_program_prints_0_then_1() {
        let source = r#"
            void f(int n) {
                int i;
                i = 0;
                while (i < n) {
                    put_i(i);
                    i = i + 1;
                }
            }
            void main() {
                f(2);
            }
        "#;
        let unit = compile_source(source).expect("program should compile");
        let buf = SharedBuf::default();
        let mut vm = Vm::with_writer(unit.chunk.clone(), unit.globals_len, Box::new(buf.clone()));
        vm.run().expect("program should halt cleanly");
        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "=> 0=> 1");
    }

    #[test]
    fn tokenize_source_ends_with_end_token() {
        let tokens = tokenize_source("int a;").expect("should lex");
        assert_eq!(tokens.last().unwrap().kind, token::TokenKind::End);
    }
}
