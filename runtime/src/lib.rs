//! The AtomC bytecode format and the stack-based VM that executes it.
//!
//! This crate knows nothing about AtomC source syntax: it consumes a
//! [`Chunk`] of already-resolved [`Instr`]uctions and runs them. The compiler
//! crate is the only thing that builds a `Chunk`.

mod cell;
mod externs;
mod instr;
mod opcode;
mod vm;

pub use cell::Cell;
pub use externs::{default_externs, ExternDef, ExternFn};
pub use instr::{Chunk, Instr};
pub use opcode::{Opcode, Operand};
pub use vm::{Vm, VmError, STACK_CAPACITY};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Builds the bytecode for:
    /// ```text
    /// f(2);
    /// void f(int n) {
    ///     int i = 0;
    ///     while (i < n) {
    ///         put_i(i);
    ///         i = i + 1;
    ///     }
    /// }
    /// ```
    /// matching the reference VM's `genTestProgram`.
    fn build_while_loop_program() -> Chunk {
        let mut c = Chunk::new();
        c.emit_int(Opcode::PushI, 2);
        let call_pos = c.emit_placeholder(Opcode::Call);
        c.emit(Opcode::Halt);

        let fn_entry = c.emit_int(Opcode::Enter, 1);
        c.patch_addr(call_pos, fn_entry);

        c.emit_int(Opcode::PushI, 0);
        c.emit_int(Opcode::FpStore, 1);

        let while_pos = c.emit_int(Opcode::FpLoad, 1);
        c.emit_int(Opcode::FpLoad, -2);
        c.emit(Opcode::LessI);
        let jf_pos = c.emit_placeholder(Opcode::Jf);

        c.emit_int(Opcode::FpLoad, 1);
        c.emit_extern(0); // put_i

        c.emit_int(Opcode::FpLoad, 1);
        c.emit_int(Opcode::PushI, 1);
        c.emit(Opcode::AddI);
        c.emit_int(Opcode::FpStore, 1);

        c.emit_addr(Opcode::Jmp, while_pos);

        let ret_pos = c.emit_int(Opcode::RetVoid, 1);
        c.patch_addr(jf_pos, ret_pos);

        c
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn while_loop_prints_zero_then_one() {
        let chunk = build_while_loop_program();
        let buf = SharedBuf::default();
        let mut vm = Vm::with_writer(chunk, 0, Box::new(buf.clone()));
        vm.run().expect("program should halt cleanly");
        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "=> 0=> 1");
    }

    #[test]
    fn stack_overflow_is_reported() {
        let mut c = Chunk::new();
        let top = c.emit_int(Opcode::PushI, 1);
        c.emit_addr(Opcode::Jmp, top);
        let mut vm = Vm::with_writer(c, 0, Box::new(Cursor::new(Vec::new())));
        let err = vm.run().unwrap_err();
        assert!(matches!(err, VmError::StackOverflow));
    }

    #[test]
    fn stack_underflow_is_reported() {
        let mut c = Chunk::new();
        c.emit(Opcode::AddI);
        let mut vm = Vm::with_writer(c, 0, Box::new(Cursor::new(Vec::new())));
        let err = vm.run().unwrap_err();
        assert!(matches!(err, VmError::StackUnderflow));
    }

    #[test]
    fn globals_round_trip() {
        let mut c = Chunk::new();
        c.emit_int(Opcode::PushI, 7);
        c.emit_int(Opcode::GpStore, 0);
        c.emit_int(Opcode::GpLoad, 0);
        c.emit_int(Opcode::GpStore, 1);
        c.emit(Opcode::Halt);
        let mut vm = Vm::with_writer(c, 2, Box::new(Cursor::new(Vec::new())));
        vm.run().unwrap();
        assert_eq!(vm.global(1), Some(Cell::Int(7)));
    }

    #[test]
    fn array_element_store_and_load_via_offset() {
        // void f() { int a[3]; int i; a[1] = 9; i = a[1]; put_i(i); }
        // locals: a[0..=2] at FP[1..=3], i at FP[4].
        let mut c = Chunk::new();
        let call_pos = c.emit_placeholder(Opcode::Call);
        c.emit(Opcode::Halt);

        let entry = c.emit_int(Opcode::Enter, 4);
        c.patch_addr(call_pos, entry);
        c.emit_int(Opcode::PushI, 1); // index
        c.emit_int(Opcode::PushI, 9); // value
        c.emit_int(Opcode::FpStoreOff, 1);
        c.emit_int(Opcode::PushI, 1);
        c.emit_int(Opcode::FpLoadOff, 1);
        c.emit_int(Opcode::FpStore, 4);
        c.emit_int(Opcode::FpLoad, 4);
        c.emit_extern(0); // put_i
        c.emit_int(Opcode::RetVoid, 0);

        let buf = SharedBuf::default();
        let mut vm = Vm::with_writer(c, 0, Box::new(buf.clone()));
        vm.run().unwrap();
        assert_eq!(String::from_utf8(buf.0.lock().unwrap().clone()).unwrap(), "=> 9");
    }
}
