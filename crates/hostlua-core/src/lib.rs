//! Boundary vocabulary for the `hostlua` C ABI.
//!
//! This crate knows nothing about the engine. It defines what a host needs
//! to walk the exported surface and call it safely:
//!
//! - [`ParamKind`] and [`Marshal`]: the closed set of marshalling kinds and
//!   the Rust types that map onto them
//! - [`FunctionSignature`], [`FunctionEntry`], [`ConstantEntry`]: table rows
//! - [`RegistrationTable`]: the immutable, index-addressable tables
//! - [`HandleArena`] and [`EngineHandle`]: generational instance handles
//! - [`Status`], [`ValueKind`], [`HookMask`], [`LibFlags`], [`Outcome`]
//! - [`boundary`]: the per-thread last-error slot and the panic guard

pub mod boundary;
mod handle;
mod param_kind;
mod signature;
mod status;
mod table;

pub use handle::{EngineHandle, HandleArena};
pub use param_kind::{HookFn, HostFn, Marshal, ParamKind, StrRef};
pub use signature::{ConstantEntry, FunctionEntry, FunctionSignature, SignatureError};
pub use status::{
    ABI_VERSION, CALLBACK_ERROR, HookEvent, HookMask, LUA_VERSION_NUM, LibFlags, MULTRET,
    Outcome, REGISTRY_INDEX, Status, ValueKind, upvalue_index,
};
pub use table::{RegistrationTable, TableBuilder, TableError, TableKind};
