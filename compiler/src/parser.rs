//! C7: the recursive-descent parser, semantic analyzer, and code generator,
//! fused into one pass.
//!
//! Each grammar rule both recognizes its tokens and performs its semantic
//! action (symbol creation, domain management, type inference) and its code
//! generation (emitting into the shared [`Chunk`]) as it goes — there is no
//! separate AST. The one place the grammar's own backtracking
//! (`exprAssign := exprUnary '=' exprAssign | exprOr`) would otherwise force
//! a choice between re-parsing (which would double the already-emitted
//! addressing code for the shared prefix) or deferring all codegen to a
//! second pass is resolved structurally instead: the shared prefix is
//! parsed exactly once — one level up, at `exprCast` (of which `exprUnary`
//! is one alternative), since `exprOr`'s own leftmost operand bottoms out at
//! `exprCast` too — and if no `=` follows, its already-computed
//! `(Ret, Option<Addr>)` is threaded down as the starting operand ("seed")
//! of the arithmetic/logical precedence chain, rather than being reparsed
//! from `exprOr`. See `Parser::parse_assign` and the `seed` parameter
//! running through `parse_or`..`parse_mul`.

use atomc_runtime::{Chunk, Opcode};

use crate::diagnostics::CompileError;
use crate::emitter::{
    convert_if_needed, emit_arith, emit_cmp, emit_neg, emit_not, insert_conv_if_needed,
    truncate_if_double, ArithOp, CmpOp,
};
use crate::symtab::{SymKind, SymbolId, SymbolTable, VarStorage};
use crate::token::{Literal, Token, TokenKind};
use crate::types::{arith_type_to, Type, TypeBase};

/// A compiled program: its instruction stream, the number of global cells it
/// needs, and the symbol table built up while compiling it (kept around for
/// `--dump-symbols`).
pub struct CompiledUnit {
    pub chunk: Chunk,
    pub globals_len: usize,
    pub symtab: SymbolTable,
}

/// The result of parsing a sub-expression: its type/lvalue/compile-time-only
/// flags, plus an address if it is still an unloaded lvalue (`None` once
/// its value has actually been pushed on the stack, e.g. a literal, an
/// arithmetic result, or a loaded value).
type ExprVal = (Ret, Option<Addr>);

#[derive(Debug, Clone, Copy)]
pub struct Ret {
    pub ty: Type,
    pub lval: bool,
    pub ct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Frame,
    Global,
}

/// An lvalue's address, accumulated as its postfix chain (`[index]`, `.field`)
/// is parsed.
///
/// `k` is the instruction operand `FPLOAD`/`FPLOAD_OFF`/... is finally
/// emitted with: every compile-time-known offset (a variable's own frame
/// slot, a `.field`'s cell offset) folds straight into it, in whatever order
/// it's encountered, since `k` isn't baked into an instruction until
/// [`Parser::emit_load`]/[`Parser::emit_store`] runs. `dynamic` tracks
/// whether a runtime index has been folded in too: the first `[expr]` pushes
/// its (possibly element-size-scaled) value as `d`; a second one (e.g.
/// `a[i].b[j]`) adds into that same pushed `d` with `ADD.i` rather than
/// pushing a second value. `k` never itself gets pushed onto the stack — the
/// base address is always the instruction's own operand.
#[derive(Debug, Clone, Copy)]
struct Addr {
    storage: Storage,
    k: i64,
    dynamic: bool,
}

impl Addr {
    fn frame(k: i64) -> Self {
        Addr {
            storage: Storage::Frame,
            k,
            dynamic: false,
        }
    }

    fn global(k: i64) -> Self {
        Addr {
            storage: Storage::Global,
            k,
            dynamic: false,
        }
    }

    /// Fold in a compile-time-known offset, e.g. a struct member's cell
    /// offset within its owner.
    fn add_static(&mut self, off: i64) {
        self.k += off;
    }

    /// Fold in a runtime offset whose value has just been pushed on the
    /// stack (index already multiplied by its element size). If a dynamic
    /// offset was already pending, combine the two with `ADD.i` instead of
    /// leaving two values on the stack.
    fn add_dynamic(&mut self, chunk: &mut Chunk) {
        if self.dynamic {
            chunk.emit(Opcode::AddI);
        }
        self.dynamic = true;
    }
}

fn id_name(tok: &Token) -> String {
    match &tok.literal {
        Literal::Id(s) => s.clone(),
        _ => unreachable!("TokenKind::Id always carries Literal::Id"),
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    symtab: SymbolTable,
    chunk: Chunk,
    /// Next free global cell index.
    globals_next: i64,
    /// The function currently being compiled, if any.
    current_fn: Option<SymbolId>,
    /// Next free local cell index within `current_fn` (reset per function,
    /// shared flatly across nested blocks: a block's locals are never
    /// reused by a sibling block).
    locals_next: i64,
    /// A one-cell scratch local reserved lazily the first time an assignment
    /// to a dynamic (array-indexed) destination needs to preserve its value
    /// as the expression's result; see `Parser::parse_assign`.
    scratch_local: Option<i64>,
    /// `CALL`s to a user function not yet compiled (forward references),
    /// patched once the whole unit has been parsed. Addresses here are
    /// always relative to whatever `self.chunk` currently is.
    pending_calls: Vec<(usize, SymbolId)>,
    /// Saved outer `pending_calls` lists, one per currently-open call-argument
    /// chunk swap (see `Parser::parse_call`). `self.chunk`/`self.pending_calls`
    /// always describe the same coordinate space, so entering a swap parks
    /// the enclosing list here and starts a fresh one rather than letting the
    /// two address spaces mix.
    pending_calls_stack: Vec<Vec<(usize, SymbolId)>>,
}

impl Parser {
    // ---- token stream -----------------------------------------------

    fn cur_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn cur_line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn peek_kind(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.cur_kind() == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, CompileError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(CompileError::syntax(self.cur_line(), message))
        }
    }

    fn peek_is_type_base(&self, offset: usize) -> bool {
        matches!(
            self.peek_kind(offset),
            Some(TokenKind::TypeInt) | Some(TokenKind::TypeChar) | Some(TokenKind::TypeDouble) | Some(TokenKind::Struct)
        )
    }

    fn starts_declaration(&self) -> bool {
        matches!(
            self.cur_kind(),
            TokenKind::TypeInt | TokenKind::TypeChar | TokenKind::TypeDouble | TokenKind::Void | TokenKind::Struct
        )
    }

    // ---- addressing ---------------------------------------------------

    fn symbol_addr(&self, id: SymbolId) -> Addr {
        let sym = self.symtab.symbol(id);
        match sym.storage {
            Some(VarStorage::Local { idx }) => Addr::frame(idx + 1),
            Some(VarStorage::Global { idx }) => Addr::global(idx as i64),
            Some(VarStorage::Member { .. }) => {
                unreachable!("struct members are only reached through `.`, never looked up directly")
            }
            None => {
                let pidx = sym
                    .param_idx
                    .expect("a Var/Param symbol always carries storage or a param index");
                Addr::frame(-(2 + pidx as i64))
            }
        }
    }

    fn emit_load(&mut self, a: Addr) {
        let op = match (a.storage, a.dynamic) {
            (Storage::Frame, false) => Opcode::FpLoad,
            (Storage::Frame, true) => Opcode::FpLoadOff,
            (Storage::Global, false) => Opcode::GpLoad,
            (Storage::Global, true) => Opcode::GpLoadOff,
        };
        self.chunk.emit_int(op, a.k);
    }

    fn emit_store(&mut self, a: Addr) {
        let op = match (a.storage, a.dynamic) {
            (Storage::Frame, false) => Opcode::FpStore,
            (Storage::Frame, true) => Opcode::FpStoreOff,
            (Storage::Global, false) => Opcode::GpStore,
            (Storage::Global, true) => Opcode::GpStoreOff,
        };
        self.chunk.emit_int(op, a.k);
    }

    /// The frame offset of the one-cell assignment scratch slot, allocating
    /// it on first use.
    fn scratch_cell(&mut self) -> i64 {
        if let Some(k) = self.scratch_local {
            return k;
        }
        let idx = self.locals_next;
        self.locals_next += 1;
        let k = idx + 1;
        self.scratch_local = Some(k);
        k
    }

    /// `addRVal`: if `v` is still an unloaded lvalue, emit the load now.
    /// Returns just the type — once materialized, lvalue-ness/ct no longer
    /// matter to the caller.
    fn ensure_rval(&mut self, v: ExprVal) -> Type {
        let (ret, addr) = v;
        if let Some(a) = addr {
            self.emit_load(a);
        }
        ret.ty
    }

    // ---- types ----------------------------------------------------------

    fn parse_type_base(&mut self) -> Result<Type, CompileError> {
        match self.cur_kind() {
            TokenKind::TypeInt => {
                self.advance();
                Ok(Type::scalar(TypeBase::Int))
            }
            TokenKind::TypeChar => {
                self.advance();
                Ok(Type::scalar(TypeBase::Char))
            }
            TokenKind::TypeDouble => {
                self.advance();
                Ok(Type::scalar(TypeBase::Double))
            }
            TokenKind::Struct => {
                self.advance();
                let name_tok = self.expect(TokenKind::Id, "expected a struct name")?;
                let name = id_name(&name_tok);
                let id = self
                    .symtab
                    .find_symbol(&name)
                    .ok_or_else(|| CompileError::semantic(name_tok.line, format!("Undefined: {name}")))?;
                if self.symtab.symbol(id).kind != SymKind::Struct {
                    return Err(CompileError::semantic(name_tok.line, format!("{name} is not a struct")));
                }
                Ok(Type::scalar(TypeBase::Struct(id)))
            }
            _ => Err(CompileError::syntax(self.cur_line(), "expected a type")),
        }
    }

    /// `arrayDecl := '[' INT? ']'`. `allow_unsized` distinguishes a function
    /// parameter (where `[]` decays to an unsized array, `n = 0`) from a
    /// variable declaration (where `[]` without a dimension is fatal).
    /// Returns `None` if there is no `[` at all.
    fn parse_array_decl(&mut self, allow_unsized: bool) -> Result<Option<i64>, CompileError> {
        if !self.at(TokenKind::LBracket) {
            return Ok(None);
        }
        let lb_line = self.cur_line();
        self.advance();
        if self.at(TokenKind::RBracket) {
            self.advance();
            if allow_unsized {
                return Ok(Some(0));
            }
            return Err(CompileError::semantic(lb_line, "An array must have a specified dimension"));
        }
        let tok = self.expect(TokenKind::Int, "expected an array dimension")?;
        let n = match tok.literal {
            Literal::Int(v) => v,
            _ => unreachable!(),
        };
        self.expect(TokenKind::RBracket, "Missing `]` after array dimension")?;
        Ok(Some(n))
    }

    // ---- top level --------------------------------------------------------

    fn parse_top_level_item(&mut self) -> Result<(), CompileError> {
        if self.at(TokenKind::Struct)
            && self.peek_kind(1) == Some(TokenKind::Id)
            && self.peek_kind(2) == Some(TokenKind::LAcc)
        {
            return self.parse_struct_def();
        }
        if !self.starts_declaration() {
            return Err(CompileError::syntax(self.cur_line(), "expected a declaration"));
        }
        let ret_ty = if self.at(TokenKind::Void) {
            self.advance();
            Type::scalar(TypeBase::Void)
        } else {
            self.parse_type_base()?
        };
        let name_tok = self.expect(TokenKind::Id, "expected a name after the type")?;
        if self.at(TokenKind::LPar) {
            self.parse_fn_def(ret_ty, name_tok)
        } else {
            if matches!(ret_ty.base, TypeBase::Void) {
                return Err(CompileError::semantic(name_tok.line, "a variable cannot be void"));
            }
            self.parse_var_def_tail(ret_ty, name_tok)
        }
    }

    fn parse_struct_def(&mut self) -> Result<(), CompileError> {
        self.advance(); // STRUCT
        let name_tok = self.expect(TokenKind::Id, "expected a struct name")?;
        let name = id_name(&name_tok);
        if self
            .symtab
            .find_symbol_in_domain(self.symtab.global_domain(), &name)
            .is_some()
        {
            return Err(CompileError::semantic(name_tok.line, format!("Symbol redefinition: {name}")));
        }
        let struct_id = self
            .symtab
            .new_symbol(&name, SymKind::Struct, Type::scalar(TypeBase::Void), name_tok.line);
        self.symtab.add_symbol_to_domain(self.symtab.global_domain(), struct_id);
        self.expect(TokenKind::LAcc, "Missing `{` after struct name")?;
        self.symtab.push_domain();
        let mut cell_off = 0i64;
        let mut byte_off = 0i64;
        while !self.at(TokenKind::RAcc) {
            self.parse_struct_member(struct_id, &mut cell_off, &mut byte_off)?;
        }
        self.symtab.drop_domain();
        self.expect(TokenKind::RAcc, "Missing `}` to close struct body")?;
        self.expect(TokenKind::Semicolon, "Missing `;` after struct definition")?;
        Ok(())
    }

    fn parse_struct_member(&mut self, owner: SymbolId, cell_off: &mut i64, byte_off: &mut i64) -> Result<(), CompileError> {
        let base_ty = self.parse_type_base()?;
        let name_tok = self.expect(TokenKind::Id, "expected a member name")?;
        let name = id_name(&name_tok);
        let dim = self.parse_array_decl(false)?;
        let ty = match dim {
            None => base_ty,
            Some(n) => Type::array(base_ty.base, n),
        };
        let domain = self.symtab.current_domain();
        if self.symtab.find_symbol_in_domain(domain, &name).is_some() {
            return Err(CompileError::semantic(name_tok.line, format!("Symbol redefinition: {name}")));
        }
        let member_id = self.symtab.new_symbol(&name, SymKind::Var, ty, name_tok.line);
        {
            let m = self.symtab.symbol_mut(member_id);
            m.owner = Some(owner);
            m.storage = Some(VarStorage::Member {
                byte_offset: *byte_off,
                cell_offset: *cell_off,
            });
        }
        self.symtab.add_symbol_to_domain(domain, member_id);
        self.symtab.symbol_mut(owner).members.push(member_id);
        *byte_off += ty.size_bytes(&self.symtab);
        *cell_off += ty.size_cells(&self.symtab);
        self.expect(TokenKind::Semicolon, "Missing `;` after struct member")?;
        Ok(())
    }

    fn parse_var_def_tail(&mut self, base_ty: Type, name_tok: Token) -> Result<(), CompileError> {
        let name = id_name(&name_tok);
        let dim = self.parse_array_decl(false)?;
        let ty = match dim {
            None => base_ty,
            Some(n) => Type::array(base_ty.base, n),
        };
        self.expect(TokenKind::Semicolon, "Missing `;` after declaration")?;
        let domain = self.symtab.current_domain();
        if self.symtab.find_symbol_in_domain(domain, &name).is_some() {
            return Err(CompileError::semantic(name_tok.line, format!("Symbol redefinition: {name}")));
        }
        let id = self.symtab.new_symbol(&name, SymKind::Var, ty, name_tok.line);
        if domain == self.symtab.global_domain() {
            let idx = self.globals_next;
            self.globals_next += ty.size_cells(&self.symtab);
            self.symtab.symbol_mut(id).storage = Some(VarStorage::Global { idx: idx as usize });
        } else {
            let fn_id = self.current_fn.expect("a local variable is always parsed inside a function");
            let idx = self.locals_next;
            self.locals_next += ty.size_cells(&self.symtab);
            self.symtab.symbol_mut(id).storage = Some(VarStorage::Local { idx });
            self.symtab.symbol_mut(fn_id).locals.push(id);
        }
        self.symtab.add_symbol_to_domain(domain, id);
        Ok(())
    }

    fn parse_fn_def(&mut self, ret_ty: Type, name_tok: Token) -> Result<(), CompileError> {
        let name = id_name(&name_tok);
        if self
            .symtab
            .find_symbol_in_domain(self.symtab.global_domain(), &name)
            .is_some()
        {
            return Err(CompileError::semantic(name_tok.line, format!("Symbol redefinition: {name}")));
        }
        let fn_id = self.symtab.new_symbol(&name, SymKind::Fn, ret_ty, name_tok.line);
        self.symtab.add_symbol_to_domain(self.symtab.global_domain(), fn_id);

        self.expect(TokenKind::LPar, "Missing `(` after function name")?;
        self.symtab.push_domain();
        let saved_fn = self.current_fn.replace(fn_id);
        let saved_locals_next = std::mem::replace(&mut self.locals_next, 0);
        let saved_scratch = self.scratch_local.take();

        if !self.at(TokenKind::RPar) {
            loop {
                self.parse_fn_param(fn_id)?;
                if self.at(TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RPar, "Missing `)` after parameter list")?;

        let entry_addr = self.chunk.emit_int(Opcode::Enter, 0);
        self.symtab.symbol_mut(fn_id).entry_addr = Some(entry_addr);

        self.expect(TokenKind::LAcc, "Missing `{` to start function body")?;
        while !self.at(TokenKind::RAcc) {
            self.parse_block_item()?;
        }
        self.advance(); // RAcc

        let nparams = self.symtab.symbol(fn_id).params.len() as i64;
        self.chunk.emit_int(Opcode::RetVoid, nparams);
        self.chunk.patch_int(entry_addr, self.locals_next);

        self.symtab.drop_domain();
        self.current_fn = saved_fn;
        self.locals_next = saved_locals_next;
        self.scratch_local = saved_scratch;
        Ok(())
    }

    fn parse_fn_param(&mut self, fn_id: SymbolId) -> Result<(), CompileError> {
        let base_ty = self.parse_type_base()?;
        let name_tok = self.expect(TokenKind::Id, "expected a parameter name")?;
        let name = id_name(&name_tok);
        let dim = self.parse_array_decl(true)?;
        let ty = match dim {
            None => base_ty,
            Some(n) => Type::array(base_ty.base, n),
        };
        let domain = self.symtab.current_domain();
        if self.symtab.find_symbol_in_domain(domain, &name).is_some() {
            return Err(CompileError::semantic(name_tok.line, format!("Symbol redefinition: {name}")));
        }
        let pid = self.symtab.add_fn_param(fn_id, &name, ty);
        self.symtab.symbol_mut(pid).line = name_tok.line;
        self.symtab.add_symbol_to_domain(domain, pid);
        Ok(())
    }

    // ---- statements --------------------------------------------------------

    fn parse_block_item(&mut self) -> Result<(), CompileError> {
        if self.starts_declaration() {
            let base_ty = self.parse_type_base()?;
            let name_tok = self.expect(TokenKind::Id, "expected a variable name")?;
            self.parse_var_def_tail(base_ty, name_tok)
        } else {
            self.parse_stm()
        }
    }

    fn parse_stm(&mut self) -> Result<(), CompileError> {
        match self.cur_kind() {
            TokenKind::LAcc => self.parse_stm_compound(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            _ => {
                let val = self.parse_expr()?;
                let (ret, addr) = val;
                if addr.is_none() && !matches!(ret.ty.base, TypeBase::Void) {
                    self.chunk.emit(Opcode::Drop);
                }
                self.expect(TokenKind::Semicolon, "Missing `;` after expression")?;
                Ok(())
            }
        }
    }

    fn parse_stm_compound(&mut self) -> Result<(), CompileError> {
        self.expect(TokenKind::LAcc, "Missing `{`")?;
        self.symtab.push_domain();
        while !self.at(TokenKind::RAcc) {
            self.parse_block_item()?;
        }
        self.advance(); // RAcc
        self.symtab.drop_domain();
        Ok(())
    }

    fn parse_if(&mut self) -> Result<(), CompileError> {
        self.advance(); // IF
        self.expect(TokenKind::LPar, "Missing `(` after `if`")?;
        let cond_line = self.cur_line();
        let cond = self.parse_expr()?;
        let ty = self.ensure_rval(cond);
        if !ty.can_be_scalar() {
            return Err(CompileError::semantic(cond_line, "the `if` condition must be scalar"));
        }
        truncate_if_double(&mut self.chunk, ty);
        self.expect(TokenKind::RPar, "Missing `)` after if condition")?;

        let jf = self.chunk.emit_placeholder(Opcode::Jf);
        self.parse_stm()?;
        if self.at(TokenKind::Else) {
            self.advance();
            let jmp_end = self.chunk.emit_placeholder(Opcode::Jmp);
            let else_addr = self.chunk.next_addr();
            self.chunk.patch_addr(jf, else_addr);
            self.parse_stm()?;
            let end_addr = self.chunk.next_addr();
            self.chunk.patch_addr(jmp_end, end_addr);
        } else {
            let end_addr = self.chunk.next_addr();
            self.chunk.patch_addr(jf, end_addr);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> Result<(), CompileError> {
        self.advance(); // WHILE
        let cond_addr = self.chunk.next_addr();
        self.expect(TokenKind::LPar, "Missing `(` after `while`")?;
        let cond_line = self.cur_line();
        let cond = self.parse_expr()?;
        let ty = self.ensure_rval(cond);
        if !ty.can_be_scalar() {
            return Err(CompileError::semantic(cond_line, "the `while` condition must be scalar"));
        }
        truncate_if_double(&mut self.chunk, ty);
        self.expect(TokenKind::RPar, "Missing `)` after while condition")?;

        let jf = self.chunk.emit_placeholder(Opcode::Jf);
        self.parse_stm()?;
        self.chunk.emit_addr(Opcode::Jmp, cond_addr);
        let end_addr = self.chunk.next_addr();
        self.chunk.patch_addr(jf, end_addr);
        Ok(())
    }

    fn parse_return(&mut self) -> Result<(), CompileError> {
        let line = self.cur_line();
        self.advance(); // RETURN
        let fn_id = self.current_fn.expect("`return` is only reachable inside a function body");
        let ret_ty = self.symtab.symbol(fn_id).ty;
        let nparams = self.symtab.symbol(fn_id).params.len() as i64;

        if self.at(TokenKind::Semicolon) {
            self.advance();
            if !matches!(ret_ty.base, TypeBase::Void) {
                return Err(CompileError::semantic(line, "a non-void function must return a value"));
            }
            self.chunk.emit_int(Opcode::RetVoid, nparams);
            return Ok(());
        }

        let val = self.parse_expr()?;
        let ty = self.ensure_rval(val);
        self.expect(TokenKind::Semicolon, "Missing `;` after return expression")?;

        if matches!(ret_ty.base, TypeBase::Void) {
            return Err(CompileError::semantic(line, "A void function cannot return a value"));
        }
        if !ty.conv_to(ret_ty) {
            return Err(CompileError::semantic(line, "the returned value's type does not match the function's return type"));
        }
        if ret_ty.size_cells(&self.symtab) != 1 {
            return Err(CompileError::semantic(line, "returning a struct by value is not supported"));
        }
        convert_if_needed(&mut self.chunk, ty, ret_ty);
        self.chunk.emit_int(Opcode::Ret, nparams);
        Ok(())
    }

    // ---- expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprVal, CompileError> {
        self.parse_assign()
    }

    /// `exprAssign := exprUnary '=' exprAssign | exprOr`. The seed is parsed
    /// via `parse_cast_expr` (one level above `exprUnary`) rather than
    /// `exprUnary` directly: `exprOr`'s own leftmost operand bottoms out at
    /// `exprCast`, and a leading cast (`(double)3`, `return (int)d;`) must
    /// still parse when the seed turns out not to be followed by `=`. A cast
    /// result is never a left-value, so `(int)x = 1` still falls through to
    /// the lvalue check below exactly as it would have for any other
    /// non-lvalue seed.
    fn parse_assign(&mut self) -> Result<ExprVal, CompileError> {
        let line = self.cur_line();
        let lhs = self.parse_cast_expr()?;
        if !self.at(TokenKind::Assign) {
            return self.parse_or(Some(lhs));
        }
        self.advance();
        let (lhs_ret, lhs_addr) = lhs;
        if !lhs_ret.lval || lhs_ret.ct {
            return Err(CompileError::semantic(line, "The assignment destination must be a left-value"));
        }
        if !lhs_ret.ty.can_be_scalar() {
            return Err(CompileError::semantic(line, "the assignment destination must be scalar"));
        }
        if matches!(lhs_ret.ty.base, TypeBase::Struct(_)) && lhs_ret.ty.size_cells(&self.symtab) != 1 {
            return Err(CompileError::semantic(
                line,
                "whole-struct assignment is not supported; assign individual members instead",
            ));
        }
        let lhs_addr = lhs_addr.expect("a left-value always carries an address");

        let rhs = self.parse_assign()?;
        let rhs_ty = self.ensure_rval(rhs);
        if !rhs_ty.can_be_scalar() {
            return Err(CompileError::semantic(line, "the assigned value must be scalar"));
        }
        if !rhs_ty.conv_to(lhs_ret.ty) {
            return Err(CompileError::semantic(line, "the assigned value's type is not compatible with the destination"));
        }
        convert_if_needed(&mut self.chunk, rhs_ty, lhs_ret.ty);
        if lhs_addr.dynamic {
            // The stack is [d, value] here: a plain `Dup` would duplicate
            // `value` right above itself, leaving `[d, value, value]`, and
            // `FPSTORE_OFF` (which pops `value` then `d`) would then consume
            // the spare copy as if it were `d`. Spill the spare through a
            // scratch local instead, so the store still sees an untouched
            // `[d, value]` on top.
            let scratch_k = self.scratch_cell();
            self.chunk.emit(Opcode::Dup);
            self.chunk.emit_int(Opcode::FpStore, scratch_k);
            self.emit_store(lhs_addr);
            self.chunk.emit_int(Opcode::FpLoad, scratch_k);
        } else {
            self.chunk.emit(Opcode::Dup);
            self.emit_store(lhs_addr);
        }
        Ok((
            Ret {
                ty: lhs_ret.ty,
                lval: false,
                ct: true,
            },
            None,
        ))
    }

    fn parse_or(&mut self, seed: Option<ExprVal>) -> Result<ExprVal, CompileError> {
        let mut left = self.parse_and(seed)?;
        while self.at(TokenKind::Or) {
            let line = self.cur_line();
            self.advance();
            let left_ty = self.ensure_rval(left);
            if !left_ty.can_be_scalar() {
                return Err(CompileError::semantic(line, "operands of `||` must be scalar"));
            }
            truncate_if_double(&mut self.chunk, left_ty);
            let jt = self.chunk.emit_placeholder(Opcode::Jt);

            let right = self.parse_and(None)?;
            let right_ty = self.ensure_rval(right);
            if !right_ty.can_be_scalar() {
                return Err(CompileError::semantic(line, "operands of `||` must be scalar"));
            }
            truncate_if_double(&mut self.chunk, right_ty);
            self.chunk.emit_int(Opcode::PushI, 0);
            self.chunk.emit(Opcode::EqI);
            self.chunk.emit(Opcode::NotI);
            let jmp_end = self.chunk.emit_placeholder(Opcode::Jmp);

            let true_label = self.chunk.next_addr();
            self.chunk.patch_addr(jt, true_label);
            self.chunk.emit_int(Opcode::PushI, 1);
            let end_label = self.chunk.next_addr();
            self.chunk.patch_addr(jmp_end, end_label);

            left = (
                Ret {
                    ty: Type::scalar(TypeBase::Int),
                    lval: false,
                    ct: true,
                },
                None,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self, seed: Option<ExprVal>) -> Result<ExprVal, CompileError> {
        let mut left = self.parse_eq(seed)?;
        while self.at(TokenKind::And) {
            let line = self.cur_line();
            self.advance();
            let left_ty = self.ensure_rval(left);
            if !left_ty.can_be_scalar() {
                return Err(CompileError::semantic(line, "operands of `&&` must be scalar"));
            }
            truncate_if_double(&mut self.chunk, left_ty);
            let jf = self.chunk.emit_placeholder(Opcode::Jf);

            let right = self.parse_eq(None)?;
            let right_ty = self.ensure_rval(right);
            if !right_ty.can_be_scalar() {
                return Err(CompileError::semantic(line, "operands of `&&` must be scalar"));
            }
            truncate_if_double(&mut self.chunk, right_ty);
            self.chunk.emit_int(Opcode::PushI, 0);
            self.chunk.emit(Opcode::EqI);
            self.chunk.emit(Opcode::NotI);
            let jmp_end = self.chunk.emit_placeholder(Opcode::Jmp);

            let false_label = self.chunk.next_addr();
            self.chunk.patch_addr(jf, false_label);
            self.chunk.emit_int(Opcode::PushI, 0);
            let end_label = self.chunk.next_addr();
            self.chunk.patch_addr(jmp_end, end_label);

            left = (
                Ret {
                    ty: Type::scalar(TypeBase::Int),
                    lval: false,
                    ct: true,
                },
                None,
            );
        }
        Ok(left)
    }

    fn parse_eq(&mut self, seed: Option<ExprVal>) -> Result<ExprVal, CompileError> {
        let mut left = self.parse_rel(seed)?;
        loop {
            let op = match self.cur_kind() {
                TokenKind::Equal => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::Ne,
                _ => break,
            };
            let line = self.cur_line();
            self.advance();
            left = self.combine_cmp(left, op, line, |p| p.parse_rel(None))?;
        }
        Ok(left)
    }

    fn parse_rel(&mut self, seed: Option<ExprVal>) -> Result<ExprVal, CompileError> {
        let mut left = self.parse_add(seed)?;
        loop {
            let op = match self.cur_kind() {
                TokenKind::Less => CmpOp::Lt,
                TokenKind::LessEq => CmpOp::Le,
                TokenKind::Greater => CmpOp::Gt,
                TokenKind::GreaterEq => CmpOp::Ge,
                _ => break,
            };
            let line = self.cur_line();
            self.advance();
            left = self.combine_cmp(left, op, line, |p| p.parse_add(None))?;
        }
        Ok(left)
    }

    fn parse_add(&mut self, seed: Option<ExprVal>) -> Result<ExprVal, CompileError> {
        let mut left = self.parse_mul(seed)?;
        loop {
            let op = match self.cur_kind() {
                TokenKind::Add => ArithOp::Add,
                TokenKind::Sub => ArithOp::Sub,
                _ => break,
            };
            let line = self.cur_line();
            self.advance();
            left = self.combine_arith(left, op, line, |p| p.parse_mul(None))?;
        }
        Ok(left)
    }

    fn parse_mul(&mut self, seed: Option<ExprVal>) -> Result<ExprVal, CompileError> {
        let mut left = match seed {
            Some(v) => v,
            None => self.parse_cast_expr()?,
        };
        loop {
            let op = match self.cur_kind() {
                TokenKind::Mul => ArithOp::Mul,
                TokenKind::Div => ArithOp::Div,
                _ => break,
            };
            let line = self.cur_line();
            self.advance();
            left = self.combine_arith(left, op, line, |p| p.parse_cast_expr())?;
        }
        Ok(left)
    }

    fn combine_arith(
        &mut self,
        left: ExprVal,
        op: ArithOp,
        line: u32,
        parse_right: impl FnOnce(&mut Self) -> Result<ExprVal, CompileError>,
    ) -> Result<ExprVal, CompileError> {
        let left_ty = self.ensure_rval(left);
        let left_end = self.chunk.last();
        let right = parse_right(self)?;
        let right_ty = self.ensure_rval(right);
        let unified = arith_type_to(left_ty, right_ty)
            .ok_or_else(|| CompileError::semantic(line, "operands of an arithmetic operator must be numeric"))?;
        if let Some(at) = left_end {
            if insert_conv_if_needed(&mut self.chunk, at, left_ty, unified) {
                self.bump_pending_calls_after(at + 1);
            }
        }
        convert_if_needed(&mut self.chunk, right_ty, unified);
        emit_arith(&mut self.chunk, op, unified);
        Ok((
            Ret {
                ty: unified,
                lval: false,
                ct: true,
            },
            None,
        ))
    }

    fn combine_cmp(
        &mut self,
        left: ExprVal,
        op: CmpOp,
        line: u32,
        parse_right: impl FnOnce(&mut Self) -> Result<ExprVal, CompileError>,
    ) -> Result<ExprVal, CompileError> {
        let left_ty = self.ensure_rval(left);
        let left_end = self.chunk.last();
        let right = parse_right(self)?;
        let right_ty = self.ensure_rval(right);
        let unified = arith_type_to(left_ty, right_ty)
            .ok_or_else(|| CompileError::semantic(line, "operands of a comparison must be numeric"))?;
        if let Some(at) = left_end {
            if insert_conv_if_needed(&mut self.chunk, at, left_ty, unified) {
                self.bump_pending_calls_after(at + 1);
            }
        }
        convert_if_needed(&mut self.chunk, right_ty, unified);
        emit_cmp(&mut self.chunk, op, unified);
        Ok((
            Ret {
                ty: Type::scalar(TypeBase::Int),
                lval: false,
                ct: true,
            },
            None,
        ))
    }

    /// `exprCast := '(' typeBase arrayDecl? ')' exprCast | exprUnary`. The
    /// `'(' typeBase` prefix is only ever the start of a cast — a plain
    /// parenthesized expression starts with something other than a type
    /// keyword — so this never needs to backtrack.
    fn parse_cast_expr(&mut self) -> Result<ExprVal, CompileError> {
        if self.at(TokenKind::LPar) && self.peek_is_type_base(1) {
            let line = self.cur_line();
            self.advance(); // (
            let base_ty = self.parse_type_base()?;
            let dim = self.parse_array_decl(false)?;
            let dst = match dim {
                None => base_ty,
                Some(n) => Type::array(base_ty.base, n),
            };
            self.expect(TokenKind::RPar, "Missing `)` after cast type")?;
            let inner = self.parse_cast_expr()?;
            return self.apply_cast(line, dst, inner);
        }
        self.parse_unary()
    }

    fn apply_cast(&mut self, line: u32, dst: Type, inner: ExprVal) -> Result<ExprVal, CompileError> {
        let (ret, addr) = inner;
        let src = ret.ty;
        if src.is_array() || dst.is_array() {
            if !(src.is_array() && dst.is_array() && src.base == dst.base) {
                return Err(CompileError::semantic(line, "cannot cast between incompatible array types"));
            }
            return Ok((
                Ret {
                    ty: dst,
                    lval: ret.lval,
                    ct: ret.ct,
                },
                addr,
            ));
        }
        if matches!(src.base, TypeBase::Struct(_)) || matches!(dst.base, TypeBase::Struct(_) | TypeBase::Void) {
            return Err(CompileError::semantic(line, "cannot cast to or from a struct or void"));
        }
        let src_ty = self.ensure_rval((ret, addr));
        if matches!(src_ty.base, TypeBase::Double) && !matches!(dst.base, TypeBase::Double) {
            self.chunk.emit(Opcode::ConvFI);
        } else {
            convert_if_needed(&mut self.chunk, src_ty, dst);
        }
        Ok((
            Ret {
                ty: dst,
                lval: false,
                ct: true,
            },
            None,
        ))
    }

    /// `exprUnary := ('-' | '!') exprUnary | exprPostfix`.
    fn parse_unary(&mut self) -> Result<ExprVal, CompileError> {
        match self.cur_kind() {
            TokenKind::Sub => {
                let line = self.cur_line();
                self.advance();
                let operand = self.parse_unary()?;
                let ty = self.ensure_rval(operand);
                if !matches!(ty.base, TypeBase::Int | TypeBase::Double | TypeBase::Char) || ty.is_array() {
                    return Err(CompileError::semantic(line, "unary `-` needs a numeric operand"));
                }
                emit_neg(&mut self.chunk, ty);
                Ok((Ret { ty, lval: false, ct: true }, None))
            }
            TokenKind::Not => {
                let line = self.cur_line();
                self.advance();
                let operand = self.parse_unary()?;
                let ty = self.ensure_rval(operand);
                if !ty.can_be_scalar() {
                    return Err(CompileError::semantic(line, "unary `!` needs a scalar operand"));
                }
                emit_not(&mut self.chunk, ty);
                Ok((
                    Ret {
                        ty: Type::scalar(TypeBase::Int),
                        lval: false,
                        ct: true,
                    },
                    None,
                ))
            }
            _ => self.parse_postfix(),
        }
    }

    /// `exprPostfix := exprPostfix '[' expr ']' | exprPostfix '.' ID | exprPrimary`.
    fn parse_postfix(&mut self) -> Result<ExprVal, CompileError> {
        let mut val = self.parse_primary()?;
        loop {
            match self.cur_kind() {
                TokenKind::LBracket => {
                    let line = self.cur_line();
                    self.advance();
                    let (ret, addr) = val;
                    if !ret.ty.is_array() {
                        return Err(CompileError::semantic(line, "only an array can be indexed"));
                    }
                    let mut addr = addr.ok_or_else(|| CompileError::semantic(line, "an array value must be addressable to index it"))?;
                    let elem_ty = ret.ty.element();
                    let elem_size = elem_ty.size_cells(&self.symtab);

                    let idx_val = self.parse_expr()?;
                    let idx_ty = self.ensure_rval(idx_val);
                    if !idx_ty.can_be_scalar() || matches!(idx_ty.base, TypeBase::Struct(_)) {
                        return Err(CompileError::semantic(line, "an array index must be numeric"));
                    }
                    truncate_if_double(&mut self.chunk, idx_ty);
                    if elem_size != 1 {
                        self.chunk.emit_int(Opcode::PushI, elem_size);
                        self.chunk.emit(Opcode::MulI);
                    }
                    addr.add_dynamic(&mut self.chunk);
                    self.expect(TokenKind::RBracket, "Missing `]` after array index")?;

                    val = (
                        Ret {
                            ty: elem_ty,
                            lval: true,
                            ct: false,
                        },
                        Some(addr),
                    );
                }
                TokenKind::Dot => {
                    let line = self.cur_line();
                    self.advance();
                    let name_tok = self.expect(TokenKind::Id, "expected a field name")?;
                    let name = id_name(&name_tok);
                    let (ret, addr) = val;
                    let struct_id = match ret.ty.base {
                        TypeBase::Struct(id) if !ret.ty.is_array() => id,
                        _ => return Err(CompileError::semantic(line, "`.` needs a struct operand")),
                    };
                    let member_id = self
                        .symtab
                        .struct_members(struct_id)
                        .iter()
                        .copied()
                        .find(|m| self.symtab.symbol(*m).name == name)
                        .ok_or_else(|| {
                            let struct_name = self.symtab.symbol(struct_id).name.clone();
                            CompileError::semantic(name_tok.line, format!("{struct_name} has no member {name}"))
                        })?;
                    let member = self.symtab.symbol(member_id);
                    let member_ty = member.ty;
                    let cell_off = match member.storage {
                        Some(VarStorage::Member { cell_offset, .. }) => cell_offset,
                        _ => unreachable!("a struct member always has Member storage"),
                    };
                    let mut addr = addr
                        .ok_or_else(|| CompileError::semantic(line, "`.` needs an addressable struct value"))?;
                    addr.add_static(cell_off);
                    val = (
                        Ret {
                            ty: member_ty,
                            lval: true,
                            ct: false,
                        },
                        Some(addr),
                    );
                }
                _ => break,
            }
        }
        Ok(val)
    }

    fn parse_primary(&mut self) -> Result<ExprVal, CompileError> {
        let line = self.cur_line();
        match self.cur_kind() {
            TokenKind::Id => {
                let tok = self.advance();
                let name = id_name(&tok);
                if self.at(TokenKind::LPar) {
                    return self.parse_call(&name, line);
                }
                let id = self
                    .symtab
                    .find_symbol(&name)
                    .ok_or_else(|| CompileError::semantic(line, format!("Undefined: {name}")))?;
                let sym = self.symtab.symbol(id);
                if !matches!(sym.kind, SymKind::Var | SymKind::Param) {
                    return Err(CompileError::semantic(line, format!("{name} is not a variable")));
                }
                let ty = sym.ty;
                let ct = ty.is_array();
                let addr = self.symbol_addr(id);
                Ok((Ret { ty, lval: true, ct }, Some(addr)))
            }
            TokenKind::Int => {
                let tok = self.advance();
                let v = match tok.literal {
                    Literal::Int(v) => v,
                    _ => unreachable!(),
                };
                self.chunk.emit_int(Opcode::PushI, v);
                Ok((
                    Ret {
                        ty: Type::scalar(TypeBase::Int),
                        lval: false,
                        ct: true,
                    },
                    None,
                ))
            }
            TokenKind::Double => {
                let tok = self.advance();
                let v = match tok.literal {
                    Literal::Double(v) => v,
                    _ => unreachable!(),
                };
                self.chunk.emit_float(Opcode::PushF, v);
                Ok((
                    Ret {
                        ty: Type::scalar(TypeBase::Double),
                        lval: false,
                        ct: true,
                    },
                    None,
                ))
            }
            TokenKind::Char => {
                let tok = self.advance();
                let v = match tok.literal {
                    Literal::Char(c) => c as i64,
                    _ => unreachable!(),
                };
                self.chunk.emit_int(Opcode::PushI, v);
                Ok((
                    Ret {
                        ty: Type::scalar(TypeBase::Char),
                        lval: false,
                        ct: true,
                    },
                    None,
                ))
            }
            TokenKind::String => {
                self.advance();
                // This bytecode format has no array/string-constant
                // representation (the VM's Cell is a single scalar slot).
                // A string literal's contents are never materialized, only
                // its CHAR[0] type; a zero placeholder keeps the stack
                // balanced if one is ever used as a value.
                self.chunk.emit_int(Opcode::PushI, 0);
                Ok((
                    Ret {
                        ty: Type::array(TypeBase::Char, 0),
                        lval: false,
                        ct: true,
                    },
                    None,
                ))
            }
            TokenKind::LPar => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RPar, "Missing `)`")?;
                Ok(inner)
            }
            _ => Err(CompileError::syntax(line, "expected an expression")),
        }
    }

    /// After splicing a new instruction into `self.chunk` at `at` (i.e. right
    /// before the instruction that used to live there), shift every recorded
    /// `pending_calls` placeholder address at or past `at` by one. Mirrors
    /// what `Chunk::insert_after` already does for jump/call *targets*
    /// embedded in operands; `pending_calls` tracks placeholder *positions*
    /// instead, which the chunk has no way to know about on its own.
    fn bump_pending_calls_after(&mut self, at: usize) {
        for (pc, _) in self.pending_calls.iter_mut() {
            if *pc >= at {
                *pc += 1;
            }
        }
    }

    /// A call's arguments are parsed left-to-right (following the token
    /// stream) but spliced into the chunk right-to-left: the reference
    /// frame layout addresses a function's first parameter nearest the
    /// return address (`FP[-2]`) regardless of how many parameters it has,
    /// which only works if the *last*-declared parameter is pushed first.
    /// Each argument is compiled into its own scratch chunk so reordering
    /// them afterwards doesn't require re-parsing or re-emitting anything;
    /// `Chunk::append_shifted` fixes up any jump targets an argument's own
    /// short-circuit `&&`/`||` needed, and any of the argument's own forward
    /// function-call placeholders are re-homed into `pending_calls` at their
    /// post-splice absolute address (see the swap of `pending_calls` itself
    /// around each argument's parse, below).
    fn parse_call(&mut self, name: &str, line: u32) -> Result<ExprVal, CompileError> {
        let fn_id = self
            .symtab
            .find_symbol(name)
            .ok_or_else(|| CompileError::semantic(line, format!("Undefined: {name}")))?;
        if self.symtab.symbol(fn_id).kind != SymKind::Fn {
            return Err(CompileError::semantic(line, format!("{name} is not a function")));
        }
        self.expect(TokenKind::LPar, "Missing `(` after function name")?;

        let params = self.symtab.symbol(fn_id).params.clone();
        let mut args: Vec<(Chunk, Type, Vec<(usize, SymbolId)>)> = Vec::new();
        if !self.at(TokenKind::RPar) {
            loop {
                let saved = std::mem::take(&mut self.chunk);
                self.pending_calls_stack.push(std::mem::take(&mut self.pending_calls));
                let parsed = self.parse_assign();
                let val = match parsed {
                    Ok(v) => v,
                    Err(e) => {
                        self.chunk = saved;
                        self.pending_calls = self.pending_calls_stack.pop().expect("pushed just above");
                        return Err(e);
                    }
                };
                let ty = self.ensure_rval(val);
                let temp = std::mem::replace(&mut self.chunk, saved);
                let local_pending = std::mem::replace(
                    &mut self.pending_calls,
                    self.pending_calls_stack.pop().expect("pushed just above"),
                );
                args.push((temp, ty, local_pending));
                if self.at(TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RPar, "Missing `)` after call arguments")?;

        if args.len() != params.len() {
            return Err(CompileError::semantic(
                line,
                format!("{name} expects {} argument(s), got {}", params.len(), args.len()),
            ));
        }
        for (i, (temp, arg_ty, _)) in args.iter_mut().enumerate() {
            let param_ty = self.symtab.symbol(params[i]).ty;
            if param_ty.size_cells(&self.symtab) != 1 {
                return Err(CompileError::semantic(
                    line,
                    "passing a struct or fixed-size array by value as a function argument is not supported",
                ));
            }
            if !arg_ty.conv_to(param_ty) {
                return Err(CompileError::semantic(
                    line,
                    format!("argument {} of {name} has an incompatible type", i + 1),
                ));
            }
            convert_if_needed(temp, *arg_ty, param_ty);
        }
        // Arguments are spliced right-to-left (see the doc comment above),
        // so each argument's own forward-call placeholders are re-homed to
        // their post-splice absolute address in `self.chunk` as they land.
        for (temp, _, local_pending) in args.iter().rev() {
            let base = self.chunk.append_shifted(temp);
            for (at, pending_fn_id) in local_pending {
                self.pending_calls.push((base + at, *pending_fn_id));
            }
        }

        let sym = self.symtab.symbol(fn_id);
        if sym.is_extern {
            let extern_id = sym.extern_id.expect("an extern function always has an extern_id");
            self.chunk.emit_extern(extern_id);
        } else {
            match sym.entry_addr {
                Some(addr) => {
                    self.chunk.emit_addr(Opcode::Call, addr);
                }
                None => {
                    let at = self.chunk.emit_placeholder(Opcode::Call);
                    self.pending_calls.push((at, fn_id));
                }
            }
        }
        let ret_ty = self.symtab.symbol(fn_id).ty;
        Ok((
            Ret {
                ty: ret_ty,
                lval: false,
                ct: true,
            },
            None,
        ))
    }
}

/// Compile a full token stream (as produced by `crate::lexer::lex`) down to
/// a runnable [`CompiledUnit`].
///
/// Emits a `CALL main; HALT` bootstrap before any user code, so `main`'s
/// address — unknown until `main` itself has been compiled, which may be
/// anywhere in the file — is patched in only after the whole unit has been
/// parsed. Forward references to a not-yet-compiled user function work the
/// same way, tracked in `pending_calls`.
pub fn compile(tokens: Vec<Token>) -> Result<CompiledUnit, CompileError> {
    let eof_line = tokens.last().map(|t| t.line).unwrap_or(0);

    let mut symtab = SymbolTable::new();
    let put_i = symtab.add_ext_fn("put_i", Type::scalar(TypeBase::Void));
    symtab.add_fn_param(put_i, "i", Type::scalar(TypeBase::Int));
    symtab.symbol_mut(put_i).extern_id = Some(0);
    let put_d = symtab.add_ext_fn("put_d", Type::scalar(TypeBase::Void));
    symtab.add_fn_param(put_d, "d", Type::scalar(TypeBase::Double));
    symtab.symbol_mut(put_d).extern_id = Some(1);

    let mut parser = Parser {
        tokens,
        pos: 0,
        symtab,
        chunk: Chunk::new(),
        globals_next: 0,
        current_fn: None,
        locals_next: 0,
        scratch_local: None,
        pending_calls: Vec::new(),
        pending_calls_stack: Vec::new(),
    };

    let call_at = parser.chunk.emit_placeholder(Opcode::Call);
    parser.chunk.emit(Opcode::Halt);

    while !parser.at(TokenKind::End) {
        parser.parse_top_level_item()?;
    }

    let pending = std::mem::take(&mut parser.pending_calls);
    for (at, fn_id) in pending {
        let sym = parser.symtab.symbol(fn_id);
        match sym.entry_addr {
            Some(addr) => parser.chunk.patch_addr(at, addr),
            None => return Err(CompileError::semantic(sym.line, format!("Undefined: {}", sym.name))),
        }
    }

    let main_id = parser
        .symtab
        .find_symbol_in_domain(parser.symtab.global_domain(), "main")
        .filter(|id| parser.symtab.symbol(*id).kind == SymKind::Fn && !parser.symtab.symbol(*id).is_extern);
    let main_addr = match main_id {
        Some(id) => parser.symtab.symbol(id).entry_addr,
        None => None,
    };
    let main_addr = main_addr.ok_or_else(|| CompileError::semantic(eof_line, "Undefined: main"))?;
    parser.chunk.patch_addr(call_at, main_addr);

    Ok(CompiledUnit {
        chunk: parser.chunk,
        globals_len: parser.globals_next as usize,
        symtab: parser.symtab,
    })
}
