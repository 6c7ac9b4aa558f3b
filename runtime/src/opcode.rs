//! The AtomC bytecode instruction set.
//!
//! Each opcode's operand shape is fixed by its variant (see [`Operand`]), so
//! decoding never has to guess which union field is live. The core set
//! (`HALT`, `PUSH_I`/`PUSH_F`, `CALL`/`CALL_EXT`, `ENTER`, `RET`/`RET_VOID`,
//! `CONV_I_F`, `JMP`/`JF`/`JT`, `FPLOAD`/`FPSTORE`, `ADD_I`/`ADD_F`,
//! `LESS_I`/`LESS_F`) matches the reference VM exactly. The rest fill in the
//! arithmetic/comparison/addressing operations the grammar needs but the
//! reference VM's worked examples never exercised.

/// A single instruction's opcode.
///
/// Naming follows the `OP_<NAME>[.<type>]` convention of the reference VM:
/// an `I`/`F` suffix fixes the element type the instruction acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Stop execution.
    Halt,
    /// Push the int literal in the operand.
    PushI,
    /// Push the double literal in the operand.
    PushF,
    /// Call a user-defined function at the target address.
    Call,
    /// Call a registered extern (host) function by id.
    CallExt,
    /// Enter a new frame, reserving the given number of local cells.
    Enter,
    /// Return with a value, popping `p` argument cells from the caller.
    Ret,
    /// Return without a value, popping `p` argument cells from the caller.
    RetVoid,
    /// Replace the top-of-stack int with its double value.
    ConvIF,
    /// Replace the top-of-stack double with its truncated int value.
    ConvFI,
    /// Unconditional jump.
    Jmp,
    /// Pop an int; jump if zero.
    Jf,
    /// Pop an int; jump if non-zero.
    Jt,
    /// Push the cell at `FP[k]`.
    FpLoad,
    /// Pop and store into `FP[k]`.
    FpStore,
    /// Pop a runtime offset `d`; push the cell at `FP[k + d]`.
    FpLoadOff,
    /// Pop a value, then a runtime offset `d`; store the value into `FP[k + d]`.
    FpStoreOff,
    /// Push the cell at global address `k`.
    GpLoad,
    /// Pop and store into global address `k`.
    GpStore,
    /// Pop a runtime offset `d`; push the cell at global address `k + d`.
    GpLoadOff,
    /// Pop a value, then a runtime offset `d`; store the value into global address `k + d`.
    GpStoreOff,
    /// Pop two ints, push their sum (second-popped + first-popped).
    AddI,
    /// Pop two doubles, push their sum.
    AddF,
    /// Pop two ints, push `second - first`.
    SubI,
    /// Pop two doubles, push `second - first`.
    SubF,
    /// Pop two ints, push their product.
    MulI,
    /// Pop two doubles, push their product.
    MulF,
    /// Pop two ints, push `second / first`.
    DivI,
    /// Pop two doubles, push `second / first`.
    DivF,
    /// Pop two ints, push `1` if `second < first` else `0`.
    LessI,
    /// Pop two doubles, push `1` if `second < first` else `0`.
    LessF,
    /// Pop two ints, push `1` if equal else `0`.
    EqI,
    /// Pop two doubles, push `1` if equal else `0`.
    EqF,
    /// Negate the top int.
    NegI,
    /// Negate the top double.
    NegF,
    /// Logical not of the top int (`0` -> `1`, non-zero -> `0`).
    NotI,
    /// Duplicate the top cell.
    Dup,
    /// Drop the top cell (discards the value of an expression statement).
    Drop,
    /// Swap the top two cells. Used to derive `>`/`>=` from `LESS`/`EQ`
    /// without a dedicated opcode per comparison direction.
    Swap,
}

impl Opcode {
    /// A short mnemonic, used by the `--trace` dump and error messages.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::PushI => "PUSH.i",
            Opcode::PushF => "PUSH.f",
            Opcode::Call => "CALL",
            Opcode::CallExt => "CALL_EXT",
            Opcode::Enter => "ENTER",
            Opcode::Ret => "RET",
            Opcode::RetVoid => "RET_VOID",
            Opcode::ConvIF => "CONV.i.f",
            Opcode::ConvFI => "CONV.f.i",
            Opcode::Jmp => "JMP",
            Opcode::Jf => "JF",
            Opcode::Jt => "JT",
            Opcode::FpLoad => "FPLOAD",
            Opcode::FpStore => "FPSTORE",
            Opcode::FpLoadOff => "FPLOAD_OFF",
            Opcode::FpStoreOff => "FPSTORE_OFF",
            Opcode::GpLoad => "GPLOAD",
            Opcode::GpStore => "GPSTORE",
            Opcode::GpLoadOff => "GPLOAD_OFF",
            Opcode::GpStoreOff => "GPSTORE_OFF",
            Opcode::AddI => "ADD.i",
            Opcode::AddF => "ADD.f",
            Opcode::SubI => "SUB.i",
            Opcode::SubF => "SUB.f",
            Opcode::MulI => "MUL.i",
            Opcode::MulF => "MUL.f",
            Opcode::DivI => "DIV.i",
            Opcode::DivF => "DIV.f",
            Opcode::LessI => "LESS.i",
            Opcode::LessF => "LESS.f",
            Opcode::EqI => "EQ.i",
            Opcode::EqF => "EQ.f",
            Opcode::NegI => "NEG.i",
            Opcode::NegF => "NEG.f",
            Opcode::NotI => "NOT.i",
            Opcode::Dup => "DUP",
            Opcode::Drop => "DROP",
            Opcode::Swap => "SWAP",
        }
    }
}

/// The tagged argument an [`Instr`](crate::instr::Instr) carries.
///
/// Unlike the reference VM's untagged `union Val`, each variant here is only
/// ever constructed by the `emit_*` helper that matches its opcode, so decode
/// is total: there's no way to build an `Instr` whose opcode and operand
/// disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No operand (e.g. `HALT`, `ADD_I`).
    None,
    /// A literal int, or a frame/global-relative index (`FPLOAD`/`ENTER`/`RET`/...).
    Int(i64),
    /// A literal double (`PUSH_F`).
    Float(f64),
    /// A jump/call target: an address into the same `Chunk`.
    Addr(usize),
    /// An extern function id, looked up in the `Vm`'s extern table.
    Extern(usize),
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(n) => write!(f, "{n}"),
            Operand::Float(v) => write!(f, "{v}"),
            Operand::Addr(a) => write!(f, "{a}"),
            Operand::Extern(id) => write!(f, "#{id}"),
        }
    }
}
