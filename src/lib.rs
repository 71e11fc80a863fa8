//! hostlua - a self-describing C ABI over an embedded Lua 5.4 engine.
//!
//! A host that can call C functions but cannot read C headers (a
//! WebAssembly runtime, a dynamic-language FFI) loads this library and asks
//! it what it exports:
//!
//! - the constant table (`hostlua_constant_count/name/value`): every number
//!   the host would otherwise copy from `lua.h`
//! - the function table (`hostlua_function_count/name/signature`): every
//!   exported function with a descriptor of its parameter and return kinds
//!
//! From those it builds its own stubs and drives engine instances through
//! the `hostlua_*` functions. Instances are addressed by generational
//! [`EngineHandle`]s; a closed or foreign handle is reported, never
//! dereferenced.
//!
//! # Example
//!
//! ```
//! use hostlua::{Status, StrRef, hostlua_close, hostlua_loadstring, hostlua_newstate,
//!               hostlua_pcall, hostlua_tointegerx, registration_table};
//!
//! assert!(registration_table().find_function("hostlua_pcall").is_some());
//!
//! let state = hostlua_newstate();
//! let status = unsafe { hostlua_loadstring(state, StrRef::from_static(c"return 1 + 1")) };
//! assert_eq!(status, Status::Ok.code());
//! assert_eq!(hostlua_pcall(state, 0, 1, 0), Status::Ok.code());
//! assert_eq!(unsafe { hostlua_tointegerx(state, -1, std::ptr::null_mut()) }, 2);
//! hostlua_close(state);
//! ```

mod config;
mod constants;
mod engine;
mod error;
mod exports;
mod logging;
mod registry;

use hostlua_core::RegistrationTable;
use lazy_static::lazy_static;

pub use config::{DEFAULT_CHUNK_NAME, EngineConfig};
pub use constants::constant_entries;
pub use engine::MAX_STACK_SLOTS;
pub use error::BridgeError;
pub use exports::*;
pub use hostlua_core::{
    ABI_VERSION, CALLBACK_ERROR, ConstantEntry, EngineHandle, FunctionEntry, FunctionSignature,
    HookEvent, HookFn, HookMask, HostFn, LUA_VERSION_NUM, LibFlags, MULTRET, ParamKind,
    REGISTRY_INDEX, Status, StrRef, ValueKind,
};
pub use logging::{LOG_ENV, init_logging};
pub use registry::live_instances;

lazy_static! {
    static ref TABLE: RegistrationTable = RegistrationTable::builder()
        .constants(constant_entries())
        .functions(function_entries())
        .build()
        .unwrap_or_else(|err| panic!("published table is malformed: {err}"));
}

/// The constant and function tables, built on first use.
pub fn registration_table() -> &'static RegistrationTable {
    &TABLE
}
