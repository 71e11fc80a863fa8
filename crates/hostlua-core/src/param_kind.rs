//! Marshalling kinds for values crossing the C boundary.
//!
//! Every exported function is described by a sequence of [`ParamKind`]s.
//! The set is closed: a new exported function whose parameter types do not
//! map onto one of these kinds needs a new variant here, never an ad hoc
//! encoding in the descriptor string.
//!
//! The [`Marshal`] trait ties a Rust type to its kind. The `#[export]`
//! attribute reads `<T as Marshal>::KIND` for every parameter and the return
//! type, so the advertised signature is derived from the real one.

use std::ffi::{CStr, c_char};
use std::fmt;
use std::str::FromStr;

use crate::handle::EngineHandle;
use crate::signature::SignatureError;

/// Callback invoked by the engine with the handle of the calling instance.
///
/// Used for host closures (`pushcclosure`) and the panic hook (`atpanic`).
/// A closure returns the number of results it pushed, or a negative value
/// to raise the value on top of its frame as an error.
pub type HostFn = unsafe extern "C" fn(EngineHandle) -> i32;

/// Debug hook callback: `(handle, event, current line)`.
pub type HookFn = unsafe extern "C" fn(EngineHandle, i32, i32);

/// Marshalling category of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Engine instance handle, a 64-bit generational index.
    OpaqueHandle,
    Int32,
    Int64,
    Float64,
    /// NUL-terminated `char*`.
    StringRef,
    /// Untyped address: byte buffers, out-parameters, userdata blocks.
    RawPointer,
    /// Nullable C function pointer.
    NativeFunctionPointer,
    /// Only valid as a return kind.
    Void,
}

impl ParamKind {
    /// All kinds, in tag order.
    pub const ALL: [ParamKind; 8] = [
        ParamKind::OpaqueHandle,
        ParamKind::Int32,
        ParamKind::Int64,
        ParamKind::Float64,
        ParamKind::StringRef,
        ParamKind::RawPointer,
        ParamKind::NativeFunctionPointer,
        ParamKind::Void,
    ];

    /// Textual tag used in signature descriptors.
    pub const fn tag(self) -> &'static str {
        match self {
            ParamKind::OpaqueHandle => "handle",
            ParamKind::Int32 => "i32",
            ParamKind::Int64 => "i64",
            ParamKind::Float64 => "f64",
            ParamKind::StringRef => "str",
            ParamKind::RawPointer => "ptr",
            ParamKind::NativeFunctionPointer => "fnptr",
            ParamKind::Void => "void",
        }
    }

    /// Look up a kind by its tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ParamKind {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| SignatureError::UnknownToken(s.to_string()))
    }
}

// ============================================================================
// StrRef
// ============================================================================

/// A NUL-terminated string pointer at the boundary.
///
/// Incoming strings are borrowed for the duration of the call. Outgoing
/// strings point either into static tables or into an engine string that
/// stays alive while its value remains on the instance's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct StrRef(*const c_char);

impl StrRef {
    pub const fn null() -> Self {
        Self(std::ptr::null())
    }

    pub const fn from_ptr(ptr: *const c_char) -> Self {
        Self(ptr)
    }

    pub fn from_static(s: &'static CStr) -> Self {
        Self(s.as_ptr())
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    pub fn as_ptr(self) -> *const c_char {
        self.0
    }

    /// Borrow the bytes before the terminator.
    ///
    /// # Safety
    ///
    /// A non-null pointer must reference a NUL-terminated buffer that stays
    /// valid and unmodified for `'a`.
    pub unsafe fn to_bytes<'a>(self) -> Option<&'a [u8]> {
        if self.0.is_null() {
            return None;
        }
        // SAFETY: upheld by the caller.
        Some(unsafe { CStr::from_ptr(self.0) }.to_bytes())
    }

    /// Borrow the string as UTF-8. Invalid UTF-8 yields `None`.
    ///
    /// # Safety
    ///
    /// Same contract as [`StrRef::to_bytes`].
    pub unsafe fn to_str<'a>(self) -> Option<&'a str> {
        // SAFETY: upheld by the caller.
        unsafe { self.to_bytes() }.and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

// ============================================================================
// Marshal
// ============================================================================

/// A Rust type allowed at the boundary.
pub trait Marshal: Sized {
    /// Kind advertised in the function table.
    const KIND: ParamKind;

    /// Value returned to the host when a call fails before producing a result.
    fn failure() -> Self;
}

macro_rules! impl_marshal {
    ($($ty:ty => $kind:ident, $failure:expr;)*) => {
        $(
            impl Marshal for $ty {
                const KIND: ParamKind = ParamKind::$kind;

                fn failure() -> Self {
                    $failure
                }
            }
        )*
    };
}

impl_marshal! {
    EngineHandle => OpaqueHandle, EngineHandle::NULL;
    i32 => Int32, -1;
    i64 => Int64, 0;
    f64 => Float64, 0.0;
    StrRef => StringRef, StrRef::null();
    Option<HostFn> => NativeFunctionPointer, None;
    Option<HookFn> => NativeFunctionPointer, None;
    () => Void, ();
}

impl<T> Marshal for *mut T {
    const KIND: ParamKind = ParamKind::RawPointer;

    fn failure() -> Self {
        std::ptr::null_mut()
    }
}

impl<T> Marshal for *const T {
    const KIND: ParamKind = ParamKind::RawPointer;

    fn failure() -> Self {
        std::ptr::null()
    }
}
