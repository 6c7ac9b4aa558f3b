//! End-to-end tests over the public pipeline: write a fixture `.atomc` file
//! with `tempfile`, read it back, and run it through `compile_source`/the VM
//! the same way the `atomc` binary does.

use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use atomc_compiler::{tokenize_source, CompileError};
use atomc_runtime::Vm;

fn write_fixture(dir: &tempfile::TempDir, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, source).expect("fixture write should succeed");
    path
}

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
fn lex_basic_program() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "basic.atomc", "int a; int main() { a = 1 + 2; return a; }");
    let source = fs::read_to_string(&path).unwrap();

    let tokens = tokenize_source(&source).expect("should lex");
    let kinds: Vec<&str> = tokens.iter().map(|t| t.kind.name()).collect();
    assert_eq!(
        kinds,
        vec![
            "TYPE_INT", "ID", "SEMICOLON", "TYPE_INT", "ID", "LPAR", "RPAR", "LACC", "ID", "ASSIGN", "INT", "ADD",
            "INT", "SEMICOLON", "RETURN", "ID", "SEMICOLON", "RACC", "END",
        ]
    );
}

#[test]
fn redefinition_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "redef.atomc", "int x; int x;");
    let source = fs::read_to_string(&path).unwrap();

    let err = atomc_compiler::compile_source(&source).unwrap_err();
    assert!(err.message.contains("Symbol redefinition: x"), "got: {err}");
}

#[test]
fn array_needs_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "array.atomc", "int v[];");
    let source = fs::read_to_string(&path).unwrap();

    let err = atomc_compiler::compile_source(&source).unwrap_err();
    assert!(
        err.message.contains("An array must have a specified dimension"),
        "got: {err}"
    );
}

#[test]
fn return_type_check_rejects_value_from_void() {
    let err = atomc_compiler::compile_source("void f() { return 1; }").unwrap_err();
    assert!(err.message.contains("A void function cannot return a value"), "got: {err}");
}

#[test]
fn return_type_check_requires_value_from_non_void() {
    let err = atomc_compiler::compile_source("int g() { return; }").unwrap_err();
    assert!(err.message.contains("a non-void function must return a value"), "got: {err}");
}

#[test]
fn assignment_must_be_lvalue() {
    let err = atomc_compiler::compile_source("void main() { 1 = 2; }").unwrap_err();
    assert!(
        err.message.contains("The assignment destination must be a left-value"),
        "got: {err}"
    );
}

#[test]
fn end_to_end_vm_run_prints_0_then_1() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(
        &dir,
        "loop.atomc",
        r#"
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
        "#,
    );
    let source = fs::read_to_string(&path).unwrap();

    let unit = atomc_compiler::compile_source(&source).expect("should compile");
    let buf = SharedBuf::default();
    let mut vm = Vm::with_writer(unit.chunk.clone(), unit.globals_len, Box::new(buf.clone()));
    vm.run().expect("program should halt cleanly");

    let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert_eq!(out, "=> 0=> 1");
}

#[test]
fn function_call_as_call_argument_resolves_correctly() {
    // sq is a backward reference by the time main calls put_i(sq(3)); the
    // argument splice used to shift sq's already-resolved CALL target.
    let source = r#"
    int sq(int x) { return x * x; }
    void main() {
        put_i(sq(3));
    }
    "#;
    let unit = atomc_compiler::compile_source(source).expect("should compile");
    let buf = SharedBuf::default();
    let mut vm = atomc_runtime::Vm::with_writer(unit.chunk.clone(), unit.globals_len, Box::new(buf.clone()));
    vm.run().expect("program should halt cleanly");
    assert_eq!(String::from_utf8(buf.0.lock().unwrap().clone()).unwrap(), "=> 9");
}

#[test]
fn forward_referenced_call_as_call_argument_resolves_correctly() {
    // g is only declared after main, so put_i(g()) records a forward-call
    // placeholder inside the argument's temp chunk before it is spliced.
    let source = r#"
    void main() {
        put_i(g());
    }
    int g() { return 5; }
    "#;
    let unit = atomc_compiler::compile_source(source).expect("should compile");
    let buf = SharedBuf::default();
    let mut vm = atomc_runtime::Vm::with_writer(unit.chunk.clone(), unit.globals_len, Box::new(buf.clone()));
    vm.run().expect("program should halt cleanly");
    assert_eq!(String::from_utf8(buf.0.lock().unwrap().clone()).unwrap(), "=> 5");
}

#[test]
fn leading_cast_parses_without_a_preceding_assignment() {
    let source = r#"
    void main() {
        double d;
        d = 3.0;
        put_i((int) d);
    }
    "#;
    let unit = atomc_compiler::compile_source(source).expect("should compile");
    let buf = SharedBuf::default();
    let mut vm = atomc_runtime::Vm::with_writer(unit.chunk.clone(), unit.globals_len, Box::new(buf.clone()));
    vm.run().expect("program should halt cleanly");
    assert_eq!(String::from_utf8(buf.0.lock().unwrap().clone()).unwrap(), "=> 3");
}

#[test]
fn forward_referenced_call_inside_widened_arithmetic_resolves_correctly() {
    // i + g(): i is int and gets widened to double via a retroactive
    // CONV.i.f splice, after g (declared later) already pushed a forward
    // call placeholder while parsing the right operand.
    let source = r#"
    void main() {
        int i;
        i = 1;
        put_d(i + g());
    }
    double g() { return 2.5; }
    "#;
    let unit = atomc_compiler::compile_source(source).expect("should compile");
    let buf = SharedBuf::default();
    let mut vm = atomc_runtime::Vm::with_writer(unit.chunk.clone(), unit.globals_len, Box::new(buf.clone()));
    vm.run().expect("program should halt cleanly");
    assert_eq!(String::from_utf8(buf.0.lock().unwrap().clone()).unwrap(), "=> 3.500000");
}

#[test]
fn io_error_on_missing_file_is_reported() {
    let err = fs::read_to_string("/nonexistent/path/does-not-exist.atomc")
        .map_err(|e| CompileError::io(e.to_string()))
        .unwrap_err();
    assert_eq!(err.phase.as_str(), "io");
}
