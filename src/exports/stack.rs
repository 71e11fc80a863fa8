//! Stack manipulation and pushing values.

use std::ffi::c_void;

use hostlua_core::{EngineHandle, HostFn, StrRef, boundary, upvalue_index};
use hostlua_macros::export;
use mlua::Value;

use super::{flag, report, with_instance};
use crate::engine::Instance;
use crate::error::BridgeError;

/// Push a string and return the engine's copy, which is NUL-terminated.
fn push_bytes(inst: &Instance, bytes: &[u8]) -> Result<StrRef, BridgeError> {
    inst.push_string(bytes)?;
    Ok(inst
        .to_string_bytes(-1)?
        .map_or(StrRef::null(), |(ptr, _)| StrRef::from_ptr(ptr.cast())))
}

// ============================================================================
// Stack
// ============================================================================

#[export]
pub fn hostlua_gettop(state: EngineHandle) -> i32 {
    with_instance(state, |inst| Ok(inst.top()))
}

#[export]
pub fn hostlua_settop(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.set_top(index))
}

/// Pop `n` values.
#[export]
pub fn hostlua_pop(state: EngineHandle, n: i32) {
    with_instance(state, |inst| {
        if n < 0 {
            return Err(BridgeError::Argument(format!("cannot pop {n} values")));
        }
        inst.set_top(-n - 1)
    })
}

/// Push a copy of the value at `index`.
#[export]
pub fn hostlua_pushvalue(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.push_copy(index))
}

#[export]
pub fn hostlua_absindex(state: EngineHandle, index: i32) -> i32 {
    with_instance(state, |inst| inst.abs_index(index))
}

#[export]
pub fn hostlua_insert(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.insert(index))
}

#[export]
pub fn hostlua_remove(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.remove(index))
}

#[export]
pub fn hostlua_replace(state: EngineHandle, index: i32) {
    with_instance(state, |inst| inst.replace(index))
}

/// Pseudo-index of upvalue `n` (1-based) inside a host closure.
///
/// An `n` with no pseudo-index reports `ErrArg` and returns `0`, which is
/// never an acceptable index.
#[export]
pub fn hostlua_upvalueindex(n: i32) -> i32 {
    boundary::clear_last_error();
    upvalue_index(n).unwrap_or_else(|| {
        report(BridgeError::Argument(format!("no upvalue pseudo-index for {n}")));
        0
    })
}

// ============================================================================
// Push
// ============================================================================

#[export]
pub fn hostlua_pushnil(state: EngineHandle) {
    with_instance(state, |inst| inst.push(Value::Nil))
}

#[export]
pub fn hostlua_pushboolean(state: EngineHandle, b: i32) {
    with_instance(state, |inst| inst.push(Value::Boolean(b != 0)))
}

#[export]
pub fn hostlua_pushnumber(state: EngineHandle, n: f64) {
    with_instance(state, |inst| inst.push(Value::Number(n)))
}

#[export]
pub fn hostlua_pushinteger(state: EngineHandle, n: i64) {
    with_instance(state, |inst| inst.push(Value::Integer(n)))
}

/// Push a copy of `s`, or nil when `s` is null.
///
/// # Safety
///
/// `s` must be null or a NUL-terminated string.
#[export]
pub unsafe fn hostlua_pushstring(state: EngineHandle, s: StrRef) -> StrRef {
    with_instance(state, |inst| {
        // SAFETY: upheld by the caller.
        match unsafe { s.to_bytes() } {
            Some(bytes) => push_bytes(inst, bytes),
            None => inst.push(Value::Nil).map(|()| StrRef::null()),
        }
    })
}

/// Push `len` bytes starting at `s`. Embedded NULs are kept.
///
/// # Safety
///
/// `s` must be valid for reads of `len` bytes.
#[export]
pub unsafe fn hostlua_pushlstring(state: EngineHandle, s: *const u8, len: i64) -> StrRef {
    with_instance(state, |inst| {
        let len = usize::try_from(len)
            .map_err(|_| BridgeError::Argument(format!("negative string length {len}")))?;
        let bytes: &[u8] = if len == 0 {
            &[]
        } else if s.is_null() {
            return Err(BridgeError::NullArgument("string"));
        } else {
            // SAFETY: upheld by the caller.
            unsafe { std::slice::from_raw_parts(s, len) }
        };
        push_bytes(inst, bytes)
    })
}

/// Pop `n` upvalues and push a closure calling `f`.
#[export]
pub fn hostlua_pushcclosure(state: EngineHandle, f: Option<HostFn>, n: i32) {
    with_instance(state, |inst| {
        let f = f.ok_or(BridgeError::NullArgument("function"))?;
        inst.push_host_closure(f, n)
    })
}

#[export]
pub fn hostlua_pushlightuserdata(state: EngineHandle, p: *mut c_void) {
    with_instance(state, |inst| inst.push_light_userdata(p))
}

#[export]
pub fn hostlua_pushglobaltable(state: EngineHandle) {
    with_instance(state, |inst| inst.push_globals())
}

/// Push the running thread. Returns 1 if it is the main thread.
#[export]
pub fn hostlua_pushthread(state: EngineHandle) -> i32 {
    with_instance(state, |inst| inst.push_thread().map(flag))
}

/// Push the host closure that is running, or nil outside any closure.
#[export]
pub fn hostlua_pushcurrentfunction(state: EngineHandle) {
    with_instance(state, |inst| inst.push_current_function())
}

// ============================================================================
// Closures
// ============================================================================

/// Push upvalue `n` of the host closure at `funcindex` and return its name,
/// which is always empty. Returns null and pushes nothing when there is no
/// such upvalue.
#[export]
pub fn hostlua_getupvalue(state: EngineHandle, funcindex: i32, n: i32) -> StrRef {
    with_instance(state, |inst| {
        Ok(if inst.push_upvalue(funcindex, n)? {
            StrRef::from_static(c"")
        } else {
            StrRef::null()
        })
    })
}

/// Pop a function and return its number of upvalues.
#[export]
pub fn hostlua_getnumupvalues(state: EngineHandle) -> i32 {
    with_instance(state, |inst| Ok(inst.pop_upvalue_count()? as i32))
}

