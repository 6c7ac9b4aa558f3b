//! The symbol table: an arena of `Symbol`s plus a stack of `Domain`s (scope
//! frames).
//!
//! The reference implementation links symbols through an intrusive `next`
//! pointer and gives `owner`/struct-member back-references as raw pointers,
//! which would form a reference cycle in safe Rust (struct -> member ->
//! owner = struct). Symbols live in one arena, `Vec<Symbol>`, indexed by
//! [`SymbolId`]; every list (a domain's symbols, a function's params/locals,
//! a struct's members) is a `Vec<SymbolId>` into that same arena. Because a
//! `SymbolId` is `Copy`, the same symbol can appear in both "the domain it
//! was declared in" and "its owning function's locals list" without the
//! `dupSymbol` the reference implementation needs to avoid two lists fighting
//! over one `next` field.

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Var,
    Param,
    Fn,
    Struct,
}

/// Where a `VAR` symbol's storage lives. Locals/params index their owning
/// frame; struct members carry a byte offset (`size_bytes`, spec's
/// `typeSize`) *and* a cell offset (`size_cells`) since frame/array layout
/// and symbol-dump display use different units (see `types.rs`); globals own
/// a slot in the VM's global segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    Local { idx: i64 },
    Member { byte_offset: i64, cell_offset: i64 },
    Global { idx: usize },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymKind,
    pub ty: Type,
    pub owner: Option<SymbolId>,
    pub line: u32,

    // VAR
    pub storage: Option<VarStorage>,
    // PARAM
    pub param_idx: Option<usize>,
    // STRUCT
    pub members: Vec<SymbolId>,
    // FN
    pub params: Vec<SymbolId>,
    pub locals: Vec<SymbolId>,
    pub is_extern: bool,
    /// Set once the function's `ENTER` instruction has been emitted.
    pub entry_addr: Option<usize>,
    /// Set for extern functions: the id `atomc_runtime::Vm::extern_id` gave it.
    pub extern_id: Option<usize>,
}

impl Symbol {
    fn new(name: impl Into<String>, kind: SymKind, ty: Type, line: u32) -> Self {
        Symbol {
            name: name.into(),
            kind,
            ty,
            owner: None,
            line,
            storage: None,
            param_idx: None,
            members: Vec::new(),
            params: Vec::new(),
            locals: Vec::new(),
            is_extern: false,
            entry_addr: None,
            extern_id: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Domain {
    pub parent: Option<usize>,
    pub symbols: Vec<SymbolId>,
}

pub struct SymbolTable {
    arena: Vec<Symbol>,
    domains: Vec<Domain>,
    stack: Vec<usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut t = SymbolTable {
            arena: Vec::new(),
            domains: vec![Domain::default()],
            stack: vec![0],
        };
        t.domains[0].parent = None;
        t
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.arena[id.0]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id.0]
    }

    pub fn struct_members(&self, id: SymbolId) -> &[SymbolId] {
        &self.arena[id.0].members
    }

    /// `newSymbol`: a fresh, arena-owned symbol. Not yet linked into any
    /// domain or owner list.
    pub fn new_symbol(&mut self, name: impl Into<String>, kind: SymKind, ty: Type, line: u32) -> SymbolId {
        self.arena.push(Symbol::new(name, kind, ty, line));
        SymbolId(self.arena.len() - 1)
    }

    pub fn current_domain(&self) -> usize {
        *self.stack.last().expect("domain stack is never empty")
    }

    pub fn global_domain(&self) -> usize {
        0
    }

    /// `pushDomain`.
    pub fn push_domain(&mut self) -> usize {
        let parent = self.current_domain();
        self.domains.push(Domain {
            parent: Some(parent),
            symbols: Vec::new(),
        });
        let id = self.domains.len() - 1;
        self.stack.push(id);
        id
    }

    /// `dropDomain`. Symbols themselves stay in the arena (owned by whatever
    /// function/struct symbol they were also registered under); only the
    /// domain's own scope-lookup list is discarded.
    pub fn drop_domain(&mut self) {
        self.stack.pop().expect("dropDomain without a matching pushDomain");
    }

    /// `addSymbolToDomain`.
    pub fn add_symbol_to_domain(&mut self, domain: usize, id: SymbolId) {
        self.domains[domain].symbols.push(id);
    }

    /// The symbols declared directly in `domain`, in declaration order.
    /// Used by `--dump-symbols` to list the global domain's contents.
    pub fn domain_symbols(&self, domain: usize) -> &[SymbolId] {
        &self.domains[domain].symbols
    }

    /// `findSymbolInDomain`.
    pub fn find_symbol_in_domain(&self, domain: usize, name: &str) -> Option<SymbolId> {
        self.domains[domain]
            .symbols
            .iter()
            .copied()
            .find(|id| self.arena[id.0].name == name)
    }

    /// `findSymbol`: walk the domain stack from top to bottom.
    pub fn find_symbol(&self, name: &str) -> Option<SymbolId> {
        for &domain in self.stack.iter().rev() {
            if let Some(id) = self.find_symbol_in_domain(domain, name) {
                return Some(id);
            }
        }
        None
    }

    /// `addExtFn`: register a host-provided function in the global domain.
    pub fn add_ext_fn(&mut self, name: &str, ret: Type) -> SymbolId {
        let id = self.new_symbol(name, SymKind::Fn, ret, 0);
        self.symbol_mut(id).is_extern = true;
        self.add_symbol_to_domain(self.global_domain(), id);
        id
    }

    /// `addFnParam`: append a parameter to an (extern or user) function's
    /// params list, assigning its `param_idx`.
    pub fn add_fn_param(&mut self, fn_id: SymbolId, name: &str, ty: Type) -> SymbolId {
        let idx = self.symbol(fn_id).params.len();
        let pid = self.new_symbol(name, SymKind::Param, ty, 0);
        {
            let p = self.symbol_mut(pid);
            p.owner = Some(fn_id);
            p.param_idx = Some(idx);
        }
        self.symbol_mut(fn_id).params.push(pid);
        pid
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeBase;

    #[test]
    fn push_drop_domain_restores_stack() {
        let mut t = SymbolTable::new();
        let before = t.current_domain();
        t.push_domain();
        t.push_domain();
        t.drop_domain();
        t.drop_domain();
        assert_eq!(t.current_domain(), before);
    }

    #[test]
    fn find_symbol_prefers_innermost_domain() {
        let mut t = SymbolTable::new();
        let outer = t.new_symbol("x", SymKind::Var, Type::scalar(TypeBase::Int), 1);
        t.add_symbol_to_domain(t.global_domain(), outer);
        t.push_domain();
        let inner = t.new_symbol("x", SymKind::Var, Type::scalar(TypeBase::Double), 2);
        let d = t.current_domain();
        t.add_symbol_to_domain(d, inner);
        assert_eq!(t.find_symbol("x"), Some(inner));
        t.drop_domain();
        assert_eq!(t.find_symbol("x"), Some(outer));
    }

    #[test]
    fn fn_params_get_sequential_indices() {
        let mut t = SymbolTable::new();
        let f = t.new_symbol("f", SymKind::Fn, Type::scalar(TypeBase::Void), 1);
        let p0 = t.add_fn_param(f, "a", Type::scalar(TypeBase::Int));
        let p1 = t.add_fn_param(f, "b", Type::scalar(TypeBase::Double));
        assert_eq!(t.symbol(p0).param_idx, Some(0));
        assert_eq!(t.symbol(p1).param_idx, Some(1));
        assert_eq!(t.symbol(f).params, vec![p0, p1]);
    }
}
