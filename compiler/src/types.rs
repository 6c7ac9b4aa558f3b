//! Pure predicates and combinators over `Type`: scalar-ness, implicit
//! conversion, and arithmetic unification. No parser or symbol-table state
//! is touched here except to resolve a struct's member list when computing
//! its size.

use crate::symtab::{SymbolId, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeBase {
    Int,
    Double,
    Char,
    Void,
    Struct(SymbolId),
}

/// `n = -1` scalar, `n = 0` unsized array (decayed parameter / string
/// literal), `n > 0` fixed-size array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type {
    pub base: TypeBase,
    pub n: i64,
}

impl Type {
    pub fn scalar(base: TypeBase) -> Self {
        Type { base, n: -1 }
    }

    pub fn array(base: TypeBase, n: i64) -> Self {
        Type { base, n }
    }

    pub fn is_array(self) -> bool {
        self.n >= 0
    }

    /// Same `(base, n)` with the array dimension discarded (`n = -1`); used
    /// to type a postfix-indexed or dereferenced array access.
    pub fn element(self) -> Type {
        Type::scalar(self.base)
    }

    /// `canBeScalar`: non-void, non-array.
    pub fn can_be_scalar(self) -> bool {
        self.base != TypeBase::Void && self.n < 0
    }

    fn is_numeric_scalar(self) -> bool {
        self.n < 0 && matches!(self.base, TypeBase::Int | TypeBase::Double | TypeBase::Char)
    }

    /// Implicit convertibility `src -> dst`.
    pub fn conv_to(self, dst: Type) -> bool {
        if self.is_numeric_scalar() && dst.is_numeric_scalar() {
            return true;
        }
        match (self.base, dst.base) {
            (TypeBase::Struct(a), TypeBase::Struct(b)) => a == b && self.n == dst.n,
            _ => {
                if self.n >= 0 && dst.n >= 0 && self.base == dst.base {
                    dst.n == 0 || self.n == dst.n
                } else {
                    false
                }
            }
        }
    }

    /// Native byte width of the base type, matching the reference compiler's
    /// `sizeof` (int=4, double=8, char=1, void=0); struct sizes recurse over
    /// members via `symtab`. This is the size the `--dump-symbols` output and
    /// struct member byte offsets use, per spec's `typeSize`.
    pub fn size_bytes(self, symtab: &SymbolTable) -> i64 {
        let base_size = self.base_size_bytes(symtab);
        if self.n < 0 {
            base_size
        } else if self.n == 0 {
            8 // one pointer width
        } else {
            self.n * base_size
        }
    }

    fn base_size_bytes(self, symtab: &SymbolTable) -> i64 {
        match self.base {
            TypeBase::Int => 4,
            TypeBase::Double => 8,
            TypeBase::Char => 1,
            TypeBase::Void => 0,
            TypeBase::Struct(id) => symtab
                .struct_members(id)
                .iter()
                .map(|m| symtab.symbol(*m).ty.size_bytes(symtab))
                .sum(),
        }
    }

    /// Size in VM cells (one cell per scalar slot, regardless of its base
    /// type). The VM's tagged [`atomc_runtime::Cell`] stack has no sub-cell
    /// byte packing, so frame/array layout is computed in cells rather than
    /// bytes; this is the analogue of `size_bytes` for that purpose.
    pub fn size_cells(self, symtab: &SymbolTable) -> i64 {
        let base_cells = self.base_size_cells(symtab);
        if self.n < 0 {
            base_cells
        } else if self.n == 0 {
            1
        } else {
            self.n * base_cells
        }
    }

    fn base_size_cells(self, symtab: &SymbolTable) -> i64 {
        match self.base {
            TypeBase::Int | TypeBase::Double | TypeBase::Char => 1,
            TypeBase::Void => 0,
            TypeBase::Struct(id) => symtab
                .struct_members(id)
                .iter()
                .map(|m| symtab.symbol(*m).ty.size_cells(symtab))
                .sum(),
        }
    }
}

/// `arithTypeTo`: the unified arithmetic result type of two numeric scalars.
/// Promotion order `CHAR < INT < DOUBLE`; the wider operand's type wins.
pub fn arith_type_to(a: Type, b: Type) -> Option<Type> {
    if !a.is_numeric_scalar() || !b.is_numeric_scalar() {
        return None;
    }
    fn rank(t: Type) -> u8 {
        match t.base {
            TypeBase::Char => 0,
            TypeBase::Int => 1,
            TypeBase::Double => 2,
            _ => unreachable!("numeric scalar checked above"),
        }
    }
    Some(if rank(a) >= rank(b) { a } else { b })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_to_is_reflexive_for_non_void() {
        let int_t = Type::scalar(TypeBase::Int);
        assert!(int_t.conv_to(int_t));
        let dbl = Type::scalar(TypeBase::Double);
        assert!(int_t.conv_to(dbl));
        assert!(dbl.conv_to(int_t));
    }

    #[test]
    fn void_never_converts() {
        let void_t = Type::scalar(TypeBase::Void);
        let int_t = Type::scalar(TypeBase::Int);
        assert!(!void_t.conv_to(int_t));
        assert!(!int_t.conv_to(void_t));
    }

    #[test]
    fn array_conv_needs_matching_element_and_compatible_dim() {
        let fixed = Type::array(TypeBase::Int, 3);
        let unsized_arr = Type::array(TypeBase::Int, 0);
        assert!(fixed.conv_to(unsized_arr));
        assert!(!unsized_arr.conv_to(fixed));
        let other_dim = Type::array(TypeBase::Int, 4);
        assert!(!fixed.conv_to(other_dim));
    }

    #[test]
    fn arith_type_widens() {
        let c = Type::scalar(TypeBase::Char);
        let i = Type::scalar(TypeBase::Int);
        let d = Type::scalar(TypeBase::Double);
        assert_eq!(arith_type_to(c, i), Some(i));
        assert_eq!(arith_type_to(i, d), Some(d));
        assert_eq!(arith_type_to(d, c), Some(d));
    }

    #[test]
    fn can_be_scalar_matches_structural_rule() {
        assert!(Type::scalar(TypeBase::Int).can_be_scalar());
        assert!(!Type::scalar(TypeBase::Void).can_be_scalar());
        assert!(!Type::array(TypeBase::Int, 0).can_be_scalar());
    }
}
