//! Text/JSON renderers for the three `--dump-*`/`--trace` output streams: the
//! token list, a domain's symbol table, and the VM instruction trace. The
//! text forms follow the row formats the CLI surface names; the JSON forms
//! exist only for `--format json` and carry the same fields.

use serde::Serialize;

use crate::symtab::{SymKind, SymbolId, SymbolTable, VarStorage};
use crate::token::{Literal, Token};
use crate::types::{Type, TypeBase};

// ---- tokens --------------------------------------------------------------

#[derive(Serialize)]
pub struct TokenRow {
    pub line: u32,
    pub kind: &'static str,
    pub value: Option<String>,
}

fn literal_value(lit: &Literal) -> Option<String> {
    match lit {
        Literal::None => None,
        Literal::Id(s) => Some(s.clone()),
        Literal::Int(v) => Some(v.to_string()),
        Literal::Double(v) => Some(v.to_string()),
        Literal::Char(c) => Some(c.to_string()),
        Literal::Str(s) => Some(s.clone()),
    }
}

pub fn token_rows(tokens: &[Token]) -> Vec<TokenRow> {
    tokens
        .iter()
        .map(|t| TokenRow {
            line: t.line,
            kind: t.kind.name(),
            value: literal_value(&t.literal),
        })
        .collect()
}

/// `LINE<TAB>NAME[:VALUE]` rows, one per token.
pub fn tokens_text(tokens: &[Token]) -> String {
    let mut out = String::new();
    for t in tokens {
        out.push_str(&t.dump_line());
        out.push('\n');
    }
    out
}

pub fn tokens_json(tokens: &[Token]) -> String {
    serde_json::to_string_pretty(&token_rows(tokens)).expect("token rows always serialize")
}

// ---- symbols --------------------------------------------------------------

fn base_type_name(ty: Type, symtab: &SymbolTable) -> String {
    match ty.base {
        TypeBase::Int => "int".to_string(),
        TypeBase::Double => "double".to_string(),
        TypeBase::Char => "char".to_string(),
        TypeBase::Void => "void".to_string(),
        TypeBase::Struct(id) => format!("struct {}", symtab.symbol(id).name),
    }
}

/// A C-like declarator for `ty name`, e.g. `int a`, `double m[3]`, `char s[]`.
fn type_decl(ty: Type, symtab: &SymbolTable, name: &str) -> String {
    let base = base_type_name(ty, symtab);
    if ty.n < 0 {
        format!("{base} {name}")
    } else if ty.n == 0 {
        format!("{base} {name}[]")
    } else {
        format!("{base} {name}[{}]", ty.n)
    }
}

fn symbol_decl_line(symtab: &SymbolTable, id: SymbolId) -> String {
    let sym = symtab.symbol(id);
    match sym.kind {
        SymKind::Var | SymKind::Param => {
            let decl = type_decl(sym.ty, symtab, &sym.name);
            let size = sym.ty.size_bytes(symtab);
            match sym.storage {
                Some(VarStorage::Global { idx }) => format!("{decl}; // global idx={idx} size={size}"),
                Some(VarStorage::Local { idx }) => format!("{decl}; // local idx={idx} size={size}"),
                Some(VarStorage::Member { byte_offset, cell_offset }) => {
                    format!("{decl}; // member byte_offset={byte_offset} cell_offset={cell_offset} size={size}")
                }
                None => {
                    let pidx = sym.param_idx.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
                    format!("{decl}; // param idx={pidx} size={size}")
                }
            }
        }
        SymKind::Fn => {
            let ret = base_type_name(sym.ty, symtab);
            let params: Vec<String> = sym
                .params
                .iter()
                .map(|&p| {
                    let psym = symtab.symbol(p);
                    type_decl(psym.ty, symtab, &psym.name)
                })
                .collect();
            let kind = if sym.is_extern { "extern" } else { "fn" };
            let entry = sym.entry_addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
            format!(
                "{ret} {}({}); // {kind} entry={entry} params={} locals={}",
                sym.name,
                params.join(", "),
                sym.params.len(),
                sym.locals.len()
            )
        }
        SymKind::Struct => {
            let members: Vec<String> = sym
                .members
                .iter()
                .map(|&m| {
                    let msym = symtab.symbol(m);
                    format!("{};", type_decl(msym.ty, symtab, &msym.name))
                })
                .collect();
            format!(
                "struct {} {{ {} }}; // size={}",
                sym.name,
                members.join(" "),
                sym.ty.size_bytes(symtab)
            )
        }
    }
}

/// The symbols declared directly in `domain` (the global domain for
/// `--dump-symbols`), one C-like declaration per line, in declaration order.
pub fn symbols_text(symtab: &SymbolTable, domain: usize) -> String {
    let mut out = String::new();
    for &id in symtab.domain_symbols(domain) {
        out.push_str(&symbol_decl_line(symtab, id));
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
pub struct SymbolRow {
    pub name: String,
    pub kind: &'static str,
    pub decl: String,
    pub size_bytes: i64,
    pub is_extern: bool,
    pub entry_addr: Option<usize>,
}

fn kind_name(kind: SymKind) -> &'static str {
    match kind {
        SymKind::Var => "var",
        SymKind::Param => "param",
        SymKind::Fn => "fn",
        SymKind::Struct => "struct",
    }
}

pub fn symbol_rows(symtab: &SymbolTable, domain: usize) -> Vec<SymbolRow> {
    symtab
        .domain_symbols(domain)
        .iter()
        .map(|&id| {
            let sym = symtab.symbol(id);
            SymbolRow {
                name: sym.name.clone(),
                kind: kind_name(sym.kind),
                decl: symbol_decl_line(symtab, id),
                size_bytes: sym.ty.size_bytes(symtab),
                is_extern: sym.is_extern,
                entry_addr: sym.entry_addr,
            }
        })
        .collect()
}

pub fn symbols_json(symtab: &SymbolTable, domain: usize) -> String {
    serde_json::to_string_pretty(&symbol_rows(symtab, domain)).expect("symbol rows always serialize")
}

// ---- VM trace ---------------------------------------------------------

/// One executed instruction, as written by `Vm::set_trace` in
/// `<addr>/<depth><TAB><opcode mnemonic><TAB><arg>` form.
#[derive(Serialize)]
pub struct TraceRow {
    pub addr: usize,
    pub depth: u32,
    pub op: String,
    pub arg: String,
}

fn parse_trace_line(line: &str) -> Option<TraceRow> {
    let mut fields = line.splitn(3, '\t');
    let addr_depth = fields.next()?;
    let op = fields.next()?.to_string();
    let arg = fields.next().unwrap_or("").to_string();
    let mut ad = addr_depth.splitn(2, '/');
    let addr = ad.next()?.parse().ok()?;
    let depth = ad.next()?.parse().ok()?;
    Some(TraceRow { addr, depth, op, arg })
}

/// Re-encode the text trace `Vm::set_trace` produced as JSON rows, for
/// `--trace --format json`.
pub fn trace_text_to_json(trace_text: &str) -> String {
    let rows: Vec<TraceRow> = trace_text.lines().filter_map(parse_trace_line).collect();
    serde_json::to_string_pretty(&rows).expect("trace rows always serialize")
}
