//! Instructions and the flat instruction list ("chunk") they live in.

use crate::opcode::{Opcode, Operand};

/// A single bytecode instruction.
///
/// The reference VM links instructions with `next`/`last` pointers so a
/// peephole pass can splice instructions in and out of the middle of a
/// program. We use a flat `Vec` instead (see [`Chunk`]) and get the same
/// splicing ability from `Vec::insert`/`Vec::remove`, without the unsafe
/// pointer plumbing a linked list needs in safe Rust.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    pub arg: Operand,
}

impl Instr {
    pub fn new(op: Opcode, arg: Operand) -> Self {
        Instr { op, arg }
    }
}

/// A function's (or the top-level `main` synthetic function's) compiled
/// instruction stream.
///
/// Addresses are indices into `instrs`; control transfer that doesn't fall
/// through to `addr + 1` (`JMP`, `JF`, `JT`, `CALL`, `RET`, `RET_VOID`) names
/// its target explicitly via [`Operand::Addr`].
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    instrs: Vec<Instr>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    /// The address the next `emit*` call will be given.
    pub fn next_addr(&self) -> usize {
        self.instrs.len()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn get(&self, addr: usize) -> Option<&Instr> {
        self.instrs.get(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Instr)> {
        self.instrs.iter().enumerate()
    }

    /// Append an instruction with no operand. Returns its address.
    pub fn emit(&mut self, op: Opcode) -> usize {
        self.emit_operand(op, Operand::None)
    }

    /// Append an instruction with an int/index operand (`PUSH_I`, `ENTER`,
    /// `RET`, `RET_VOID`, `FPLOAD`, `FPSTORE`, `GPLOAD`, `GPSTORE`, ...).
    pub fn emit_int(&mut self, op: Opcode, n: i64) -> usize {
        self.emit_operand(op, Operand::Int(n))
    }

    /// Append an instruction with a double operand (`PUSH_F`).
    pub fn emit_float(&mut self, op: Opcode, v: f64) -> usize {
        self.emit_operand(op, Operand::Float(v))
    }

    /// Append a jump/call instruction whose target is not yet known.
    /// The caller patches the operand later with [`Chunk::patch_addr`].
    pub fn emit_placeholder(&mut self, op: Opcode) -> usize {
        self.emit_operand(op, Operand::Addr(usize::MAX))
    }

    /// Append a jump/call instruction with a known target address.
    pub fn emit_addr(&mut self, op: Opcode, target: usize) -> usize {
        self.emit_operand(op, Operand::Addr(target))
    }

    /// Append a `CALL_EXT` instruction naming an extern function id.
    pub fn emit_extern(&mut self, id: usize) -> usize {
        self.emit_operand(Opcode::CallExt, Operand::Extern(id))
    }

    fn emit_operand(&mut self, op: Opcode, arg: Operand) -> usize {
        let addr = self.instrs.len();
        self.instrs.push(Instr::new(op, arg));
        addr
    }

    /// Back-patch a previously emitted jump/call's target address.
    ///
    /// Used for forward jumps: the branch is emitted before its target is
    /// known (e.g. the `JF` at the top of a `while`), and patched once the
    /// body has been compiled.
    pub fn patch_addr(&mut self, at: usize, target: usize) {
        match &mut self.instrs[at].arg {
            Operand::Addr(a) => *a = target,
            other => panic!("patch_addr on non-address operand: {other:?}"),
        }
    }

    /// Equivalent of the reference VM's `insertInstr`: splice a new
    /// instruction right after `after`, retargeting every jump/call whose
    /// address operand pointed past the insertion point so existing control
    /// flow keeps landing on the same instruction.
    pub fn insert_after(&mut self, after: usize, op: Opcode, arg: Operand) {
        let at = after + 1;
        for instr in &mut self.instrs {
            if let Operand::Addr(target) = &mut instr.arg {
                if *target >= at {
                    *target += 1;
                }
            }
        }
        self.instrs.insert(at, Instr::new(op, arg));
    }

    /// Equivalent of the reference VM's `delInstrAfter`: remove the
    /// instruction right after `after`, retargeting jumps the same way
    /// `insert_after` does, in reverse.
    pub fn delete_after(&mut self, after: usize) {
        let at = after + 1;
        self.instrs.remove(at);
        for instr in &mut self.instrs {
            if let Operand::Addr(target) = &mut instr.arg {
                if *target > at {
                    *target -= 1;
                }
            }
        }
    }

    /// Patch a previously emitted instruction's int operand in place (used
    /// for `ENTER`'s local-cell count, unknown until the whole function body
    /// has been compiled).
    pub fn patch_int(&mut self, at: usize, value: i64) {
        match &mut self.instrs[at].arg {
            Operand::Int(n) => *n = value,
            other => panic!("patch_int on non-int operand: {other:?}"),
        }
    }

    /// Equivalent of the reference VM's `lastInstr`: the address of the most
    /// recently emitted instruction.
    pub fn last(&self) -> Option<usize> {
        self.instrs.len().checked_sub(1)
    }

    /// Append every instruction of `other` to the end of this chunk, shifting
    /// any internal jump target by the insertion point so `other`'s own
    /// control flow (`JMP`/`JF`/`JT`, relative to `other`'s own start) keeps
    /// working at its new address. `CALL`'s `Addr` operand is never relative
    /// to `other`: it's either already an absolute address in the shared
    /// chunk, or `usize::MAX` awaiting a `pending_calls` patch keyed by the
    /// placeholder's post-splice address, so it's left untouched. Used to
    /// splice a call argument's self-contained instruction stream into place
    /// after all of a call's arguments have been compiled (argument
    /// evaluation order is left-to-right, but the reference frame layout
    /// addresses the first parameter nearest the return address, so
    /// arguments are spliced in right-to-left; see `Parser::parse_call`).
    pub fn append_shifted(&mut self, other: &Chunk) -> usize {
        let base = self.instrs.len();
        for instr in &other.instrs {
            let arg = match (instr.op, instr.arg) {
                (Opcode::Call, addr) => addr,
                (_, Operand::Addr(a)) => Operand::Addr(a + base),
                (_, same) => same,
            };
            self.instrs.push(Instr::new(instr.op, arg));
        }
        base
    }
}
