//! The stack-based virtual machine.
//!
//! Mirrors the reference `run()` loop instruction-by-instruction, including
//! the exact `RET_VOID` frame teardown (`IP = FP[-1]`, `SP = FP - iArg - 2`,
//! `FP = FP[0]`), re-expressed over a tagged [`Cell`] stack instead of a raw
//! `Val` union and linked `Instr` list.

use std::fmt;
use std::io::{self, Write};

use crate::cell::Cell;
use crate::externs::{default_externs, ExternDef, ExternFn};
use crate::instr::Chunk;
use crate::opcode::{Opcode, Operand};

/// Matches the reference VM's `#define MAXSTACK 10000`.
pub const STACK_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub enum VmError {
    StackOverflow,
    StackUnderflow,
    /// A `FPLOAD`/`FPSTORE`/`GPLOAD`/`GPSTORE`(`_OFF`) address fell outside
    /// the current frame or the global segment.
    InvalidAddress,
    /// A cell was read as the wrong variant (e.g. `ADD.f` hit an `Int`).
    TypeMismatch { expected: &'static str, at: &'static str },
    DivisionByZero,
    UnknownExternId(usize),
    /// Reserved for an opcode with no execution semantics; never produced by
    /// the current, exhaustively-handled `Opcode` set.
    UnimplementedOpcode(Opcode),
    Io(io::Error),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackOverflow => write!(f, "trying to push into a full stack"),
            VmError::StackUnderflow => write!(f, "trying to pop from an empty stack"),
            VmError::InvalidAddress => write!(f, "frame/global address out of bounds"),
            VmError::TypeMismatch { expected, at } => {
                write!(f, "expected a {expected} cell at {at}")
            }
            VmError::DivisionByZero => write!(f, "division by zero"),
            VmError::UnknownExternId(id) => write!(f, "unknown extern function id {id}"),
            VmError::UnimplementedOpcode(op) => {
                write!(f, "instruction not implemented: {}", op.mnemonic())
            }
            VmError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<io::Error> for VmError {
    fn from(e: io::Error) -> Self {
        VmError::Io(e)
    }
}

/// The VM's execution state: operand stack, global segment, and the registered
/// extern bridge.
pub struct Vm {
    chunk: Chunk,
    globals: Vec<Cell>,
    stack: Vec<Cell>,
    /// Index of the current frame's saved-FP cell, or `-1` before the first
    /// `ENTER` (mirrors the reference VM's `FP = NULL`).
    fp: i64,
    ip: usize,
    /// Number of active `ENTER`ed frames; this is the `<depth>` half of the
    /// `--trace` dump's `<addr>/<depth>` line prefix, not the raw operand
    /// stack length (which also grows with ordinary pushes).
    call_depth: u32,
    extern_names: Vec<String>,
    externs: Vec<ExternFn>,
    out: Box<dyn Write + Send>,
    trace: Option<Box<dyn Write + Send>>,
}

impl Vm {
    /// Build a VM for `chunk`, with `globals_len` global cells (zero-initialized)
    /// and the default `put_i`/`put_d` externs registered, writing program
    /// output to stdout.
    pub fn new(chunk: Chunk, globals_len: usize) -> Self {
        Self::with_writer(chunk, globals_len, Box::new(io::stdout()))
    }

    /// As [`Vm::new`], but with an explicit output sink (tests use this to
    /// capture `put_i`/`put_d` output instead of writing to stdout).
    pub fn with_writer(chunk: Chunk, globals_len: usize, out: Box<dyn Write + Send>) -> Self {
        let mut vm = Vm {
            chunk,
            globals: vec![Cell::Int(0); globals_len],
            stack: Vec::with_capacity(256),
            fp: -1,
            ip: 0,
            call_depth: 0,
            extern_names: Vec::new(),
            externs: Vec::new(),
            out,
            trace: None,
        };
        for def in default_externs() {
            vm.register_extern(def);
        }
        vm
    }

    /// Enable the `--trace` instruction dump, writing one line per executed
    /// instruction in `addr/depth\tOP\targ` form.
    pub fn set_trace(&mut self, sink: Box<dyn Write + Send>) {
        self.trace = Some(sink);
    }

    /// Register an extern function, returning the id `CALL_EXT` will use to
    /// reach it. Only `put_i`/`put_d` are registered by default; additional
    /// externs exist for embedding/testing, not for AtomC source itself.
    pub fn register_extern(&mut self, def: ExternDef) -> usize {
        let id = self.externs.len();
        self.extern_names.push(def.name);
        self.externs.push(def.f);
        id
    }

    /// Look up a registered extern's id by name (used by the code generator
    /// when it sees a call to a function symbol marked extern).
    pub fn extern_id(&self, name: &str) -> Option<usize> {
        self.extern_names.iter().position(|n| n == name)
    }

    pub fn global(&self, idx: usize) -> Option<Cell> {
        self.globals.get(idx).copied()
    }

    fn push(&mut self, cell: Cell) -> Result<(), VmError> {
        if self.stack.len() >= STACK_CAPACITY {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(cell);
        Ok(())
    }

    fn pop(&mut self) -> Result<Cell, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop a cell expected to be an int; used both internally and by externs.
    pub fn pop_int(&mut self) -> Result<i64, VmError> {
        self.pop()?.as_int().ok_or(VmError::TypeMismatch {
            expected: "int",
            at: "pop_int",
        })
    }

    /// Pop a cell expected to be a double.
    pub fn pop_float(&mut self) -> Result<f64, VmError> {
        self.pop()?.as_float().ok_or(VmError::TypeMismatch {
            expected: "double",
            at: "pop_float",
        })
    }

    /// Write program output (used by externs; also exposed so custom externs
    /// registered via [`Vm::register_extern`] can share the same sink).
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), VmError> {
        self.out.write_fmt(args).map_err(VmError::from)
    }

    fn frame_index(&self, k: i64) -> Result<usize, VmError> {
        let idx = self.fp + k;
        if idx < 0 {
            return Err(VmError::InvalidAddress);
        }
        Ok(idx as usize)
    }

    fn int_operand(instr_arg: Operand) -> Result<i64, VmError> {
        match instr_arg {
            Operand::Int(n) => Ok(n),
            _ => Err(VmError::InvalidAddress),
        }
    }

    /// Run from the chunk's first instruction until `HALT`.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.ip = 0;
        loop {
            let instr = *self
                .chunk
                .get(self.ip)
                .expect("IP ran off the end of the chunk without HALT");
            if let Some(sink) = self.trace.as_mut() {
                let _ = writeln!(
                    sink,
                    "{}/{}\t{}\t{}",
                    self.ip,
                    self.call_depth,
                    instr.op.mnemonic(),
                    instr.arg
                );
            }
            match instr.op {
                Opcode::Halt => return Ok(()),
                Opcode::PushI => {
                    let n = match instr.arg {
                        Operand::Int(n) => n,
                        _ => return Err(VmError::InvalidAddress),
                    };
                    self.push(Cell::Int(n))?;
                    self.ip += 1;
                }
                Opcode::PushF => {
                    let v = match instr.arg {
                        Operand::Float(v) => v,
                        _ => return Err(VmError::InvalidAddress),
                    };
                    self.push(Cell::Float(v))?;
                    self.ip += 1;
                }
                Opcode::Call => {
                    let target = match instr.arg {
                        Operand::Addr(a) => a,
                        _ => return Err(VmError::InvalidAddress),
                    };
                    self.push(Cell::RetAddr(self.ip + 1))?;
                    self.ip = target;
                }
                Opcode::CallExt => {
                    let id = match instr.arg {
                        Operand::Extern(id) => id,
                        _ => return Err(VmError::InvalidAddress),
                    };
                    if id >= self.externs.len() {
                        return Err(VmError::UnknownExternId(id));
                    }
                    let mut f = std::mem::replace(&mut self.externs[id], Box::new(|_| Ok(())));
                    let result = f(self);
                    self.externs[id] = f;
                    result?;
                    self.ip += 1;
                }
                Opcode::Enter => {
                    let m = Self::int_operand(instr.arg)?;
                    let old_fp = self.fp;
                    self.push(Cell::SavedFp(old_fp))?;
                    self.fp = self.stack.len() as i64 - 1;
                    for _ in 0..m {
                        self.push(Cell::Int(0))?;
                    }
                    self.call_depth += 1;
                    self.ip += 1;
                }
                Opcode::Ret => {
                    let p = Self::int_operand(instr.arg)?;
                    let v = self.pop()?;
                    self.teardown_frame(p)?;
                    self.push(v)?;
                }
                Opcode::RetVoid => {
                    let p = Self::int_operand(instr.arg)?;
                    self.teardown_frame(p)?;
                }
                Opcode::ConvIF => {
                    let v = self.pop_int()?;
                    self.push(Cell::Float(v as f64))?;
                    self.ip += 1;
                }
                Opcode::ConvFI => {
                    let v = self.pop_float()?;
                    self.push(Cell::Int(v as i64))?;
                    self.ip += 1;
                }
                Opcode::Jmp => {
                    self.ip = match instr.arg {
                        Operand::Addr(a) => a,
                        _ => return Err(VmError::InvalidAddress),
                    };
                }
                Opcode::Jf => {
                    let cond = self.pop_int()?;
                    let target = match instr.arg {
                        Operand::Addr(a) => a,
                        _ => return Err(VmError::InvalidAddress),
                    };
                    self.ip = if cond != 0 { self.ip + 1 } else { target };
                }
                Opcode::Jt => {
                    let cond = self.pop_int()?;
                    let target = match instr.arg {
                        Operand::Addr(a) => a,
                        _ => return Err(VmError::InvalidAddress),
                    };
                    self.ip = if cond != 0 { target } else { self.ip + 1 };
                }
                Opcode::FpLoad => {
                    let k = Self::int_operand(instr.arg)?;
                    let idx = self.frame_index(k)?;
                    let v = *self.stack.get(idx).ok_or(VmError::InvalidAddress)?;
                    self.push(v)?;
                    self.ip += 1;
                }
                Opcode::FpStore => {
                    let k = Self::int_operand(instr.arg)?;
                    let v = self.pop()?;
                    let idx = self.frame_index(k)?;
                    *self.stack.get_mut(idx).ok_or(VmError::InvalidAddress)? = v;
                    self.ip += 1;
                }
                Opcode::FpLoadOff => {
                    let k = Self::int_operand(instr.arg)?;
                    let d = self.pop_int()?;
                    let idx = self.frame_index(k + d)?;
                    let v = *self.stack.get(idx).ok_or(VmError::InvalidAddress)?;
                    self.push(v)?;
                    self.ip += 1;
                }
                Opcode::FpStoreOff => {
                    let k = Self::int_operand(instr.arg)?;
                    let v = self.pop()?;
                    let d = self.pop_int()?;
                    let idx = self.frame_index(k + d)?;
                    *self.stack.get_mut(idx).ok_or(VmError::InvalidAddress)? = v;
                    self.ip += 1;
                }
                Opcode::GpLoad => {
                    let k = Self::int_operand(instr.arg)?;
                    let v = *self
                        .globals
                        .get(k as usize)
                        .ok_or(VmError::InvalidAddress)?;
                    self.push(v)?;
                    self.ip += 1;
                }
                Opcode::GpStore => {
                    let k = Self::int_operand(instr.arg)?;
                    let v = self.pop()?;
                    *self
                        .globals
                        .get_mut(k as usize)
                        .ok_or(VmError::InvalidAddress)? = v;
                    self.ip += 1;
                }
                Opcode::GpLoadOff => {
                    let k = Self::int_operand(instr.arg)?;
                    let d = self.pop_int()?;
                    let idx = (k + d) as usize;
                    let v = *self.globals.get(idx).ok_or(VmError::InvalidAddress)?;
                    self.push(v)?;
                    self.ip += 1;
                }
                Opcode::GpStoreOff => {
                    let k = Self::int_operand(instr.arg)?;
                    let v = self.pop()?;
                    let d = self.pop_int()?;
                    let idx = (k + d) as usize;
                    *self.globals.get_mut(idx).ok_or(VmError::InvalidAddress)? = v;
                    self.ip += 1;
                }
                Opcode::AddI => {
                    self.binop_int(|a, b| Ok(a.wrapping_add(b)))?;
                    self.ip += 1;
                }
                Opcode::SubI => {
                    self.binop_int(|a, b| Ok(a.wrapping_sub(b)))?;
                    self.ip += 1;
                }
                Opcode::MulI => {
                    self.binop_int(|a, b| Ok(a.wrapping_mul(b)))?;
                    self.ip += 1;
                }
                Opcode::DivI => {
                    self.binop_int(|a, b| a.checked_div(b).ok_or(VmError::DivisionByZero))?;
                    self.ip += 1;
                }
                Opcode::LessI => {
                    self.cmp_int(|a, b| a < b)?;
                    self.ip += 1;
                }
                Opcode::EqI => {
                    self.cmp_int(|a, b| a == b)?;
                    self.ip += 1;
                }
                Opcode::AddF => {
                    self.binop_float(|a, b| a + b)?;
                    self.ip += 1;
                }
                Opcode::SubF => {
                    self.binop_float(|a, b| a - b)?;
                    self.ip += 1;
                }
                Opcode::MulF => {
                    self.binop_float(|a, b| a * b)?;
                    self.ip += 1;
                }
                Opcode::DivF => {
                    self.binop_float(|a, b| a / b)?;
                    self.ip += 1;
                }
                Opcode::LessF => {
                    self.cmp_float(|a, b| a < b)?;
                    self.ip += 1;
                }
                Opcode::EqF => {
                    self.cmp_float(|a, b| a == b)?;
                    self.ip += 1;
                }
                Opcode::NegI => {
                    let a = self.pop_int()?;
                    self.push(Cell::Int(-a))?;
                    self.ip += 1;
                }
                Opcode::NegF => {
                    let a = self.pop_float()?;
                    self.push(Cell::Float(-a))?;
                    self.ip += 1;
                }
                Opcode::NotI => {
                    let a = self.pop_int()?;
                    self.push(Cell::Int(if a == 0 { 1 } else { 0 }))?;
                    self.ip += 1;
                }
                Opcode::Dup => {
                    let v = *self.stack.last().ok_or(VmError::StackUnderflow)?;
                    self.push(v)?;
                    self.ip += 1;
                }
                Opcode::Drop => {
                    self.pop()?;
                    self.ip += 1;
                }
                Opcode::Swap => {
                    let top = self.pop()?;
                    let below = self.pop()?;
                    self.push(top)?;
                    self.push(below)?;
                    self.ip += 1;
                }
            }
        }
    }

    fn binop_int(&mut self, f: impl Fn(i64, i64) -> Result<i64, VmError>) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Cell::Int(f(a, b)?))
    }

    fn binop_float(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), VmError> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Cell::Float(f(a, b)))
    }

    fn cmp_int(&mut self, f: impl Fn(i64, i64) -> bool) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Cell::Int(if f(a, b) { 1 } else { 0 }))
    }

    fn cmp_float(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), VmError> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Cell::Int(if f(a, b) { 1 } else { 0 }))
    }

    /// The shared tail of `RET`/`RET_VOID`: restore `IP`/`SP`/`FP` to the
    /// caller's frame. `p` is the callee's own parameter count.
    fn teardown_frame(&mut self, p: i64) -> Result<(), VmError> {
        let ret_idx = self.frame_index(-1)?;
        let ret_addr = self.stack[ret_idx].as_ret_addr().ok_or(VmError::TypeMismatch {
            expected: "return address",
            at: "RET/RET_VOID FP[-1]",
        })?;
        let saved_idx = self.fp as usize;
        let saved_fp = self.stack[saved_idx]
            .as_saved_fp()
            .ok_or(VmError::TypeMismatch {
                expected: "saved frame pointer",
                at: "RET/RET_VOID FP[0]",
            })?;
        let new_len = self.fp - p - 1;
        if new_len < 0 {
            return Err(VmError::InvalidAddress);
        }
        self.stack.truncate(new_len as usize);
        self.fp = saved_fp;
        self.ip = ret_addr;
        self.call_depth = self.call_depth.saturating_sub(1);
        Ok(())
    }
}
