//! Per-thread error slot and the panic guard wrapped around every export.
//!
//! Functions whose return kind cannot carry a status (void, pointers,
//! numbers) report failures here. The slot holds the status of the most
//! recent failed call on this thread until the next call clears it.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};

use crate::param_kind::Marshal;
use crate::status::Status;

struct LastError {
    status: Status,
    message: CString,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Record a failure for the current thread.
pub fn set_last_error(status: Status, message: impl Into<String>) {
    let mut message = message.into();
    message.retain(|c| c != '\0');
    let message = CString::new(message).unwrap_or_default();
    let _ = LAST_ERROR.try_with(|slot| {
        *slot.borrow_mut() = Some(LastError { status, message });
    });
}

pub fn clear_last_error() {
    let _ = LAST_ERROR.try_with(|slot| slot.borrow_mut().take());
}

/// Status of the last failure, or [`Status::Ok`].
pub fn last_error() -> Status {
    LAST_ERROR
        .try_with(|slot| slot.borrow().as_ref().map_or(Status::Ok, |e| e.status))
        .unwrap_or(Status::Ok)
}

/// Run `f` with the last error message, if any.
pub fn with_last_error_message<R>(f: impl FnOnce(Option<&CStr>) -> R) -> R {
    LAST_ERROR.with(|slot| f(slot.borrow().as_ref().map(|e| e.message.as_c_str())))
}

/// Pointer to the last error message, valid until the next failure or clear
/// on this thread. Null when there is no error.
pub fn last_error_message_ptr() -> *const std::ffi::c_char {
    with_last_error_message(|msg| msg.map_or(std::ptr::null(), CStr::as_ptr))
}

/// Run an export body, converting a panic into [`Status::ErrPanic`].
///
/// Unwinding out of an `extern "C"` function aborts the process, so every
/// generated export goes through here.
pub fn guard<R: Marshal>(name: &'static str, f: impl FnOnce() -> R) -> R {
    tracing::trace!(export = name, "boundary call");
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(export = name, %message, "panic caught at boundary");
            set_last_error(Status::ErrPanic, format!("{name}: {message}"));
            R::failure()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
