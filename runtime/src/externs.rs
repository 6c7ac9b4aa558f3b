//! The extern (host) function bridge.
//!
//! The reference VM calls a raw `void (*)()` function pointer and trusts the
//! callee to pop its own arguments off the shared stack. We keep that same
//! "the extern owns its own argument popping" contract, but give it a safe
//! signature: an extern is anything that can pop/push [`crate::cell::Cell`]s
//! through a `&mut Vm` and report a [`crate::vm::VmError`] instead of calling
//! into a bare function pointer.

use crate::vm::{Vm, VmError};

/// A host function callable from AtomC bytecode via `CALL_EXT`.
pub type ExternFn = Box<dyn FnMut(&mut Vm) -> Result<(), VmError> + Send>;

/// Name + implementation of a single extern, as registered with a [`Vm`].
pub struct ExternDef {
    pub name: String,
    pub f: ExternFn,
}

impl ExternDef {
    pub fn new(name: impl Into<String>, f: ExternFn) -> Self {
        ExternDef {
            name: name.into(),
            f,
        }
    }
}

/// `put_i(i: int)`: pop an int argument, print it as `=> <int>`.
pub fn put_i() -> ExternDef {
    ExternDef::new(
        "put_i",
        Box::new(|vm: &mut Vm| {
            let v = vm.pop_int()?;
            vm.write_fmt(format_args!("=> {v}"))
        }),
    )
}

/// `put_d(d: double)`: pop a double argument, print it as `=> <double>`.
pub fn put_d() -> ExternDef {
    ExternDef::new(
        "put_d",
        Box::new(|vm: &mut Vm| {
            let v = vm.pop_float()?;
            vm.write_fmt(format_args!("=> {v:.6}"))
        }),
    )
}

/// The default extern set every AtomC program is compiled against.
pub fn default_externs() -> Vec<ExternDef> {
    vec![put_i(), put_d()]
}
