//! Type checks and conversions of stack values.
//!
//! Queries on an index with no value answer as Lua does (`tnone`, false,
//! null) without reporting an error. Only a stale handle fails, with `-1`
//! (or null) and `errhandle` in the last-error slot.

use std::ffi::{CStr, c_void};

use hostlua_core::{EngineHandle, StrRef, ValueKind};
use hostlua_macros::export;
use mlua::Value;

use super::{flag, with_instance, write_out};

fn kind_c_name(kind: ValueKind) -> &'static CStr {
    match kind {
        ValueKind::None => c"no value",
        ValueKind::Nil => c"nil",
        ValueKind::Boolean => c"boolean",
        ValueKind::LightUserData | ValueKind::UserData => c"userdata",
        ValueKind::Number => c"number",
        ValueKind::String => c"string",
        ValueKind::Table => c"table",
        ValueKind::Function => c"function",
        ValueKind::Thread => c"thread",
    }
}

fn check(state: EngineHandle, index: i32, pred: impl FnOnce(ValueKind) -> bool) -> i32 {
    with_instance(state, |inst| Ok(flag(pred(inst.kind_at(index)))))
}

/// Type tag of the value at `index`, `tnone` when there is none.
#[export]
pub fn hostlua_type(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| Ok(inst.kind_at(index).code()))
}

/// Name of a type tag. Unknown tags yield null.
#[export]
pub fn hostlua_typename(_state: EngineHandle, tp: i32) -> StrRef {
    ValueKind::try_from(tp).map_or(StrRef::null(), |kind| {
        StrRef::from_static(kind_c_name(kind))
    })
}

#[export]
pub fn hostlua_isnone(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::None)
}

#[export]
pub fn hostlua_isnil(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::Nil)
}

#[export]
pub fn hostlua_isnoneornil(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| {
        matches!(kind, ValueKind::None | ValueKind::Nil)
    })
}

#[export]
pub fn hostlua_isboolean(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::Boolean)
}

/// Numbers and numeric strings.
#[export]
pub fn hostlua_isnumber(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| Ok(flag(inst.is_number(index))))
}

#[export]
pub fn hostlua_isinteger(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| Ok(flag(inst.is_integer(index))))
}

/// Strings and numbers.
#[export]
pub fn hostlua_isstring(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| Ok(flag(inst.is_string(index))))
}

#[export]
pub fn hostlua_istable(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::Table)
}

#[export]
pub fn hostlua_isfunction(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::Function)
}

/// Whether the value is a function implemented outside Lua.
#[export]
pub fn hostlua_iscfunction(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| Ok(flag(inst.is_host_function(index))))
}

/// Full or light userdata.
#[export]
pub fn hostlua_isuserdata(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| {
        matches!(kind, ValueKind::UserData | ValueKind::LightUserData)
    })
}

#[export]
pub fn hostlua_islightuserdata(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::LightUserData)
}

#[export]
pub fn hostlua_isthread(state: EngineHandle, index: i32) -> i32 {
    check(state, index, |kind| kind == ValueKind::Thread)
}

/// Lua truthiness: only nil, false and no value are false.
#[export]
pub fn hostlua_toboolean(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| Ok(flag(inst.to_boolean(index))))
}

/// Convert to a float. `isnum`, when non-null, receives whether the
/// conversion succeeded.
///
/// # Safety
///
/// `isnum` must be null or valid for writing an `i32`.
#[export]
pub unsafe fn hostlua_tonumberx(state: EngineHandle, index: i32, isnum: *mut i32) -> f64 {
    // SAFETY: upheld by the caller.
    unsafe { write_out(isnum, 0) };
    with_instance(state, |inst| {
        let converted = inst.to_number(index);
        // SAFETY: upheld by the caller.
        unsafe { write_out(isnum, flag(converted.is_some())) };
        Ok(converted.unwrap_or(0.0))
    })
}

/// Convert to an integer without loss. `isnum` as for `tonumberx`.
///
/// # Safety
///
/// `isnum` must be null or valid for writing an `i32`.
#[export]
pub unsafe fn hostlua_tointegerx(state: EngineHandle, index: i32, isnum: *mut i32) -> i64 {
    // SAFETY: upheld by the caller.
    unsafe { write_out(isnum, 0) };
    with_instance(state, |inst| {
        let converted = inst.to_integer(index);
        // SAFETY: upheld by the caller.
        unsafe { write_out(isnum, flag(converted.is_some())) };
        Ok(converted.unwrap_or(0))
    })
}

/// String at `index`, converting a number in place. Null for other types.
///
/// The pointer is valid while the value stays on the stack.
#[export]
pub fn hostlua_tostring(state: EngineHandle, index: i32) -> StrRef {
    with_instance(state, |inst| {
        Ok(inst
            .to_string_bytes(index)?
            .map_or(StrRef::null(), |(ptr, _)| StrRef::from_ptr(ptr.cast())))
    })
}

/// Like `tostring`, also storing the byte length through `len`.
///
/// # Safety
///
/// `len` must be null or valid for writing an `i64`.
#[export]
pub unsafe fn hostlua_tolstring(state: EngineHandle, index: i32, len: *mut i64) -> StrRef {
    // SAFETY: upheld by the caller.
    unsafe { write_out(len, 0) };
    with_instance(state, |inst| {
        let Some((ptr, n)) = inst.to_string_bytes(index)? else {
            return Ok(StrRef::null());
        };
        // SAFETY: upheld by the caller.
        unsafe { write_out(len, n as i64) };
        Ok(StrRef::from_ptr(ptr.cast()))
    })
}

/// Address of a userdata block, or the pointer of a light userdata.
#[export]
pub fn hostlua_touserdata(state: EngineHandle, index: i32) -> *mut c_void {
    with_instance(state, |inst| Ok(inst.to_userdata(index)))
}

/// Identity of a reference value, for hashing and debugging only.
#[export]
pub fn hostlua_topointer(state: EngineHandle, index: i32) -> *const c_void {
    with_instance(state, |inst| Ok(inst.to_pointer(index)))
}

/// String length, table border or userdata size; 0 otherwise.
#[export]
pub fn hostlua_rawlen(state: EngineHandle, index: i32) -> i64 {
    with_instance(state, |inst| match inst.try_value_at(index) {
        Some(Value::Nil) | None => Ok(0),
        Some(_) => inst.raw_len(index),
    })
}

/// Primitive equality, without metamethods. Invalid indices compare false.
#[export]
pub fn hostlua_rawequal(state: EngineHandle, index1: i32, index2: i32) -> i32 {
    with_instance(state, |inst| Ok(flag(inst.raw_equal(index1, index2))))
}
