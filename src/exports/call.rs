//! Loading and running code, raising errors, debug hooks.

use std::path::Path;

use hostlua_core::{EngineHandle, HookFn, HookMask, StrRef};
use hostlua_macros::export;

use super::{arg_bytes, with_instance, with_instance_status};
use crate::error::BridgeError;

/// Compile `s` and push the chunk as a function, or push the error message
/// and return `errsyntax` / `errmem`.
///
/// # Safety
///
/// `s` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_loadstring(state: EngineHandle, s: StrRef) -> i32 {
    with_instance_status(state, |inst| {
        // SAFETY: upheld by the caller.
        let source = unsafe { arg_bytes(s, "source") }?;
        inst.load(source, &String::from_utf8_lossy(source))
    })
}

/// Compile `len` bytes at `buff`, naming the chunk `name` (or the
/// instance's default chunk name when null). Binary chunks are rejected.
///
/// # Safety
///
/// `buff` must be valid for reads of `len` bytes and `name` must be null or
/// a NUL-terminated string.
#[export]
pub unsafe fn hostlua_loadbuffer(state: EngineHandle, buff: *const u8, len: i64, name: StrRef) -> i32 {
    with_instance_status(state, |inst| {
        let len = usize::try_from(len)
            .map_err(|_| BridgeError::Argument(format!("negative buffer length {len}")))?;
        let source: &[u8] = if len == 0 {
            &[]
        } else if buff.is_null() {
            return Err(BridgeError::NullArgument("buffer"));
        } else {
            // SAFETY: upheld by the caller.
            unsafe { std::slice::from_raw_parts(buff, len) }
        };
        // SAFETY: upheld by the caller.
        let chunk_name = match unsafe { name.to_bytes() } {
            Some(name) => String::from_utf8_lossy(name).into_owned(),
            None => inst.config().chunk_name.clone(),
        };
        inst.load(source, &chunk_name)
    })
}

/// Compile the file at `filename`. An unreadable file pushes a message and
/// returns `errfile`.
///
/// # Safety
///
/// `filename` must be a NUL-terminated string.
#[export]
pub unsafe fn hostlua_loadfile(state: EngineHandle, filename: StrRef) -> i32 {
    with_instance_status(state, |inst| {
        // SAFETY: upheld by the caller.
        let path = unsafe { filename.to_str() }
            .ok_or_else(|| BridgeError::Argument("file name is null or not UTF-8".into()))?;
        inst.load_file(Path::new(path))
    })
}

/// Call the function below the top `nargs` values, leaving `nresults`
/// results (all of them for `multret`).
///
/// Errors are not caught: inside a host callback they propagate once the
/// callback returns; at top level they close the instance (`errfatal`).
#[export]
pub fn hostlua_call(state: EngineHandle, nargs: i32, nresults: i32) -> i32 {
    with_instance_status(state, |inst| {
        inst.call(nargs, nresults).map(|outcome| outcome.status())
    })
}

/// Call in protected mode. On error the message is pushed (transformed by
/// the handler at stack index `msgh` if non-zero) and its status returned.
#[export]
pub fn hostlua_pcall(state: EngineHandle, nargs: i32, nresults: i32, msgh: i32) -> i32 {
    with_instance_status(state, |inst| inst.pcall(nargs, nresults, msgh))
}

/// Pop the top value and raise it as an error. See `hostlua_call` for
/// where it goes.
#[export]
pub fn hostlua_error(state: EngineHandle) -> i32 {
    with_instance_status(state, |inst| inst.error().map(|outcome| outcome.status()))
}

/// Install `f` for the events in `mask`, or remove the hook when `f` is
/// null or `mask` is 0. `count` applies to `maskcount`.
#[export]
pub fn hostlua_sethook(state: EngineHandle, f: Option<HookFn>, mask: i32, count: i32) {
    with_instance(state, |inst| {
        let mask = HookMask::from_bits(mask)
            .ok_or_else(|| BridgeError::Argument(format!("unknown hook mask {mask:#x}")))?;
        inst.set_hook(f, mask, count);
        Ok(())
    })
}

/// Mask of the installed hook, 0 when none.
#[export]
pub fn hostlua_gethookmask(state: EngineHandle) -> i32 {
    with_instance(state, |inst| Ok(inst.hook_mask().bits()))
}

