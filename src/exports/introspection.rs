//! Table walking and error inspection. None of these need an instance.

use hostlua_core::{Status, StrRef, TableError, boundary};
use hostlua_macros::export;

use super::{report, write_out};
use crate::error::BridgeError;
use crate::{logging, registration_table};

fn index_failure(err: TableError) -> StrRef {
    report(BridgeError::Table(err));
    StrRef::null()
}

#[export]
pub fn hostlua_constant_count() -> i32 {
    registration_table().constant_count() as i32
}

/// Name of constant `index`, or null with `errindex` when out of range.
#[export]
pub fn hostlua_constant_name(index: i32) -> StrRef {
    boundary::clear_last_error();
    match registration_table().constant_name_c(i64::from(index)) {
        Ok(name) => StrRef::from_ptr(name.as_ptr()),
        Err(err) => index_failure(err),
    }
}

/// Store constant `index` through `out`.
///
/// # Safety
///
/// `out` must be null or valid for writing an `i64`.
#[export]
pub unsafe fn hostlua_constant_value(index: i32, out: *mut i64) -> i32 {
    boundary::clear_last_error();
    match registration_table().constant_value(i64::from(index)) {
        Ok(value) => {
            if out.is_null() {
                return report(BridgeError::NullArgument("out")).code();
            }
            // SAFETY: checked non-null; validity upheld by the caller.
            unsafe { write_out(out, value) };
            Status::Ok.code()
        }
        Err(err) => report(BridgeError::Table(err)).code(),
    }
}

#[export]
pub fn hostlua_function_count() -> i32 {
    registration_table().function_count() as i32
}

#[export]
pub fn hostlua_function_name(index: i32) -> StrRef {
    boundary::clear_last_error();
    match registration_table().function_name_c(i64::from(index)) {
        Ok(name) => StrRef::from_ptr(name.as_ptr()),
        Err(err) => index_failure(err),
    }
}

/// Signature descriptor of function `index`: parameter tags, then the
/// return tag, separated by single spaces.
#[export]
pub fn hostlua_function_signature(index: i32) -> StrRef {
    boundary::clear_last_error();
    match registration_table().function_descriptor_c(i64::from(index)) {
        Ok(descriptor) => StrRef::from_ptr(descriptor.as_ptr()),
        Err(err) => index_failure(err),
    }
}

/// Status of the most recent failed call on this thread, or `ok`.
#[export]
pub fn hostlua_last_error() -> i32 {
    boundary::last_error().code()
}

/// Message of the most recent failure on this thread, or null.
///
/// Valid until the next call on this thread that can fail.
#[export]
pub fn hostlua_last_error_message() -> StrRef {
    StrRef::from_ptr(boundary::last_error_message_ptr())
}

/// Print library events to stderr. A null filter reads `HOSTLUA_LOG`.
///
/// # Safety
///
/// `filter` must be null or a NUL-terminated string.
#[export]
pub unsafe fn hostlua_init_logging(filter: StrRef) -> i32 {
    boundary::clear_last_error();
    let directives = if filter.is_null() {
        None
    } else {
        // SAFETY: upheld by the caller.
        match unsafe { filter.to_str() } {
            Some(directives) => Some(directives),
            None => {
                return report(BridgeError::Argument("log filter is not UTF-8".into())).code();
            }
        }
    };

    if logging::init_logging(directives) {
        Status::Ok.code()
    } else {
        report(BridgeError::Argument(
            "log filter rejected or a subscriber is already installed".into(),
        ))
        .code()
    }
}
