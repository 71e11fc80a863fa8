//! Tables, globals, metatables and userdata.
//!
//! Operations that may run metamethods raise engine errors inside the
//! instance (see `engine::call`); they then return `-1` or null.

use std::ffi::c_void;

use hostlua_core::{EngineHandle, StrRef};
use hostlua_macros::export;

use super::{arg_bytes, flag, with_instance};
use crate::error::BridgeError;

#[export]
pub fn hostlua_newtable(state: EngineHandle) {
    with_instance(state, |inst| inst.new_table())
}

/// Pop a key and push `t[key]` for the table at `index`. Returns the type
/// of the pushed value.
#[export]
pub fn hostlua_gettable(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| inst.get_table(index).map(|kind| kind.code()))
}

/// Pop a value and a key (value on top) and assign `t[key] = value`.
#[export]
pub fn hostlua_settable(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.set_table(index))
}

/// # Safety
///
/// `k` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_getfield(state: EngineHandle, index: i32, k: StrRef) -> i32 {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let k = unsafe { arg_bytes(k, "key") }?;
        inst.get_field(index, k).map(|kind| kind.code())
    })
}

/// Pop a value and store it as field `k` of the table at `index`.
///
/// # Safety
///
/// `k` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_setfield(state: EngineHandle, index: i32, k: StrRef) {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let k = unsafe { arg_bytes(k, "key") }?;
        inst.set_field(index, k)
    })
}

/// `gettable` without metamethods. The target must be a table.
#[export]
pub fn hostlua_rawget(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| inst.raw_get(index).map(|kind| kind.code()))
}

#[export]
pub fn hostlua_rawset(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.raw_set(index))
}

#[export]
pub fn hostlua_rawgeti(state: EngineHandle, index: i32, n: i64) -> i32 {
    with_instance(state, |inst| inst.raw_get_i(index, n).map(|kind| kind.code()))
}

#[export]
pub fn hostlua_rawseti(state: EngineHandle, index: i32, n: i64) {
    with_instance(state, |inst| inst.raw_set_i(index, n))
}

/// # Safety
///
/// `name` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_getglobal(state: EngineHandle, name: StrRef) -> i32 {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let name = unsafe { arg_bytes(name, "name") }?;
        inst.get_global(name).map(|kind| kind.code())
    })
}

/// # Safety
///
/// `name` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_setglobal(state: EngineHandle, name: StrRef) {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let name = unsafe { arg_bytes(name, "name") }?;
        inst.set_global(name)
    })
}

// ============================================================================
// Metatables
// ============================================================================

/// Push `registry[tname]`, creating it (with `__name = tname`) if absent.
/// Returns 1 if the table was created, 0 if it already existed.
///
/// # Safety
///
/// `tname` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_newmetatable(state: EngineHandle, tname: StrRef) -> i32 {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let tname = unsafe { arg_bytes(tname, "type name") }?;
        inst.new_metatable(tname).map(flag)
    })
}

/// Push `registry[tname]` and return its type.
///
/// # Safety
///
/// `tname` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_getnamedmetatable(state: EngineHandle, tname: StrRef) -> i32 {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let tname = unsafe { arg_bytes(tname, "type name") }?;
        inst.get_named_metatable(tname).map(|kind| kind.code())
    })
}

/// Pop a table (or nil) and set it as the metatable of the table or
/// userdata at `index`. Returns 1.
#[export]
pub fn hostlua_setmetatable(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| inst.set_metatable(index).map(|()| 1))
}

/// Push the metatable of the value at `index`. Returns 0, pushing nothing,
/// when it has none.
#[export]
pub fn hostlua_getmetatable(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| inst.get_metatable(index).map(flag))
}

// ============================================================================
// Userdata
// ============================================================================

/// Push a zeroed block of `size` bytes owned by the engine and return its
/// address. The address is stable until the block is collected.
#[export]
pub fn hostlua_newuserdata(state: EngineHandle, size: i64) -> *mut c_void {
    with_instance(state, |inst| {
        let size = usize::try_from(size)
            .map_err(|_| BridgeError::Argument(format!("negative userdata size {size}")))?;
        inst.new_userdata(size)
    })
}

/// Block address if the value at `index` is a userdata whose metatable is
/// `registry[tname]`, null otherwise.
///
/// # Safety
///
/// `tname` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_testudata(state: EngineHandle, index: i32, tname: StrRef) -> *mut c_void {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let tname = unsafe { arg_bytes(tname, "type name") }?;
        Ok(inst
            .test_userdata(index, tname)?
            .unwrap_or(std::ptr::null_mut()))
    })
}

/// Like `testudata`, raising an argument error on mismatch.
///
/// # Safety
///
/// `tname` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_checkudata(state: EngineHandle, index: i32, tname: StrRef) -> *mut c_void {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        let tname = unsafe { arg_bytes(tname, "type name") }?;
        inst.check_userdata(index, tname)
    })
}
