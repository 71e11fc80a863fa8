//! The exported C ABI.
//!
//! Every function here is written as a plain Rust fn and turned into a
//! `#[no_mangle] extern "C"` symbol by `#[export]`, which also emits the
//! metadata fn the function table is built from. Adding an export means
//! writing it in one of the submodules and listing it in
//! [`function_entries`]; its advertised signature follows from its types.
//!
//! # Error reporting
//!
//! Status-returning exports return a [`Status`] code. The others return
//! their kind's failure value (`-1`, `0`, `0.0`, null) and leave the reason
//! in the thread's last-error slot, which every call on an instance clears
//! first.

mod call;
mod introspection;
mod lifecycle;
mod query;
mod stack;
mod table;

pub use call::*;
pub use introspection::*;
pub use lifecycle::*;
pub use query::*;
pub use stack::*;
pub use table::*;

use hostlua_core::{EngineHandle, FunctionEntry, Marshal, Status, StrRef, boundary};

use crate::engine::Instance;
use crate::error::BridgeError;
use crate::registry;

// ============================================================================
// Dispatch
// ============================================================================

fn report_stale(handle: EngineHandle) {
    let err = BridgeError::StaleHandle(handle);
    tracing::warn!(%handle, "call on stale handle");
    boundary::set_last_error(err.status(), err.to_string());
}

/// Record a boundary error that has no instance to be raised in.
pub(crate) fn report(err: BridgeError) -> Status {
    let status = err.status();
    tracing::debug!(?status, error = %err, "boundary call failed");
    boundary::set_last_error(status, err.to_string());
    status
}

/// Resolve `handle` and run `f`, returning the kind's failure value when
/// the handle is stale or `f` fails.
pub(crate) fn with_instance<R: Marshal>(
    handle: EngineHandle,
    f: impl FnOnce(&Instance) -> Result<R, BridgeError>,
) -> R {
    boundary::clear_last_error();
    let Some(instance) = registry::lookup(handle) else {
        report_stale(handle);
        return R::failure();
    };
    match f(&instance) {
        Ok(value) => value,
        Err(err) => {
            instance.fail(err);
            R::failure()
        }
    }
}

/// Like [`with_instance`] for exports returning a status code.
pub(crate) fn with_instance_status(
    handle: EngineHandle,
    f: impl FnOnce(&Instance) -> Result<Status, BridgeError>,
) -> i32 {
    boundary::clear_last_error();
    let Some(instance) = registry::lookup(handle) else {
        report_stale(handle);
        return Status::ErrHandle.code();
    };
    match f(&instance) {
        Ok(status) => status.code(),
        Err(err) => instance.fail(err).code(),
    }
}

/// Borrow a required string argument.
///
/// # Safety
///
/// `s` must be null or point to a NUL-terminated buffer valid for `'a`.
pub(crate) unsafe fn arg_bytes<'a>(s: StrRef, what: &'static str) -> Result<&'a [u8], BridgeError> {
    // SAFETY: upheld by the caller.
    unsafe { s.to_bytes() }.ok_or(BridgeError::NullArgument(what))
}

/// Write through an optional out-pointer.
///
/// # Safety
///
/// `out` must be null or valid for a write of `T`.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T) {
    if !out.is_null() {
        // SAFETY: upheld by the caller.
        unsafe { out.write(value) };
    }
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

// ============================================================================
// Function table
// ============================================================================

macro_rules! function_table {
    ($($name:ident),* $(,)?) => {
        paste::paste! {
            /// Entries of every exported function, in publication order.
            pub fn function_entries() -> Vec<FunctionEntry> {
                vec![$([<__ $name _meta>]()),*]
            }
        }
    };
}

function_table! {
    // introspection
    hostlua_constant_count,
    hostlua_constant_name,
    hostlua_constant_value,
    hostlua_function_count,
    hostlua_function_name,
    hostlua_function_signature,
    hostlua_last_error,
    hostlua_last_error_message,
    hostlua_init_logging,
    // lifecycle
    hostlua_newstate,
    hostlua_newstate_with,
    hostlua_close,
    hostlua_openlibs,
    hostlua_atpanic,
    hostlua_gc_collect,
    hostlua_memory_used,
    // stack
    hostlua_gettop,
    hostlua_settop,
    hostlua_pop,
    hostlua_pushvalue,
    hostlua_absindex,
    hostlua_insert,
    hostlua_remove,
    hostlua_replace,
    hostlua_upvalueindex,
    // push
    hostlua_pushnil,
    hostlua_pushboolean,
    hostlua_pushnumber,
    hostlua_pushinteger,
    hostlua_pushstring,
    hostlua_pushlstring,
    hostlua_pushcclosure,
    hostlua_pushlightuserdata,
    hostlua_pushglobaltable,
    hostlua_pushthread,
    hostlua_pushcurrentfunction,
    // closures
    hostlua_getupvalue,
    hostlua_getnumupvalues,
    // query
    hostlua_type,
    hostlua_typename,
    hostlua_isnone,
    hostlua_isnil,
    hostlua_isnoneornil,
    hostlua_isboolean,
    hostlua_isnumber,
    hostlua_isinteger,
    hostlua_isstring,
    hostlua_istable,
    hostlua_isfunction,
    hostlua_iscfunction,
    hostlua_isuserdata,
    hostlua_islightuserdata,
    hostlua_isthread,
    hostlua_toboolean,
    hostlua_tonumberx,
    hostlua_tointegerx,
    hostlua_tostring,
    hostlua_tolstring,
    hostlua_touserdata,
    hostlua_topointer,
    hostlua_rawlen,
    hostlua_rawequal,
    // tables
    hostlua_newtable,
    hostlua_gettable,
    hostlua_settable,
    hostlua_getfield,
    hostlua_setfield,
    hostlua_rawget,
    hostlua_rawset,
    hostlua_rawgeti,
    hostlua_rawseti,
    hostlua_getglobal,
    hostlua_setglobal,
    // metatables and userdata
    hostlua_newmetatable,
    hostlua_getnamedmetatable,
    hostlua_setmetatable,
    hostlua_getmetatable,
    hostlua_newuserdata,
    hostlua_testudata,
    hostlua_checkudata,
    // execution
    hostlua_loadstring,
    hostlua_loadbuffer,
    hostlua_loadfile,
    hostlua_call,
    hostlua_pcall,
    hostlua_error,
    // debug hook
    hostlua_sethook,
    hostlua_gethookmask,
}
