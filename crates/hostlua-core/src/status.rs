//! Numeric vocabulary shared with the host: status codes, value kinds,
//! hook events and masks, library selection flags.
//!
//! Every value here is also published through the constant table, so the
//! host never needs to hard-code them.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Lua version implemented by the embedded engine.
pub const LUA_VERSION_NUM: i64 = 504;

/// Revision of this boundary. Bumped when an exported signature changes.
pub const ABI_VERSION: i64 = 1;

/// Pseudo-index addressing the per-instance registry table.
pub const REGISTRY_INDEX: i32 = -1_001_000;

/// `nresults` value requesting every result of a call.
pub const MULTRET: i32 = -1;

/// Conventional return value of a host closure raising an error.
pub const CALLBACK_ERROR: i32 = -1;

/// Pseudo-index of upvalue `n` (1-based) of the running host closure.
///
/// `None` when `n` is not positive or the index would not fit an `i32`.
pub const fn upvalue_index(n: i32) -> Option<i32> {
    if n < 1 {
        return None;
    }
    REGISTRY_INDEX.checked_sub(n)
}

/// Status code returned by status-reporting exports.
///
/// Non-negative codes are the engine's own; negative codes are detected by
/// the boundary itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    /// Runtime error.
    ErrRun = 2,
    /// Syntax error while loading a chunk.
    ErrSyntax = 3,
    /// Allocation failure or memory limit reached.
    ErrMem = 4,
    /// Error while running the message handler.
    ErrErr = 5,
    /// A file could not be opened or read.
    ErrFile = 6,
    /// Null, stale or foreign engine handle.
    ErrHandle = -1,
    /// Table index or stack index out of range.
    ErrIndex = -2,
    /// Invalid argument: null string, wrong value type, bad count.
    ErrArg = -3,
    /// A Rust panic was caught at the boundary.
    ErrPanic = -4,
    /// Unprotected error at top level; the instance has been closed.
    ErrFatal = -5,
}

impl Status {
    pub const ALL: [Status; 12] = [
        Status::Ok,
        Status::Yield,
        Status::ErrRun,
        Status::ErrSyntax,
        Status::ErrMem,
        Status::ErrErr,
        Status::ErrFile,
        Status::ErrHandle,
        Status::ErrIndex,
        Status::ErrArg,
        Status::ErrPanic,
        Status::ErrFatal,
    ];

    pub fn code(self) -> i32 {
        self.into()
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Name used in the constant table.
    pub const fn name(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Yield => "yield",
            Status::ErrRun => "errrun",
            Status::ErrSyntax => "errsyntax",
            Status::ErrMem => "errmem",
            Status::ErrErr => "errerr",
            Status::ErrFile => "errfile",
            Status::ErrHandle => "errhandle",
            Status::ErrIndex => "errindex",
            Status::ErrArg => "errarg",
            Status::ErrPanic => "errpanic",
            Status::ErrFatal => "errfatal",
        }
    }
}

/// Type tag of a stack value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum ValueKind {
    /// Index above the top of the frame.
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserData = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    UserData = 7,
    Thread = 8,
}

impl ValueKind {
    pub const ALL: [ValueKind; 10] = [
        ValueKind::None,
        ValueKind::Nil,
        ValueKind::Boolean,
        ValueKind::LightUserData,
        ValueKind::Number,
        ValueKind::String,
        ValueKind::Table,
        ValueKind::Function,
        ValueKind::UserData,
        ValueKind::Thread,
    ];

    pub fn code(self) -> i32 {
        self.into()
    }

    /// Name used in the constant table.
    pub const fn constant_name(self) -> &'static str {
        match self {
            ValueKind::None => "tnone",
            ValueKind::Nil => "tnil",
            ValueKind::Boolean => "tboolean",
            ValueKind::LightUserData => "tlightuserdata",
            ValueKind::Number => "tnumber",
            ValueKind::String => "tstring",
            ValueKind::Table => "ttable",
            ValueKind::Function => "tfunction",
            ValueKind::UserData => "tuserdata",
            ValueKind::Thread => "tthread",
        }
    }

    /// Lua's name for the type, as returned by `typename`.
    pub const fn type_name(self) -> &'static str {
        match self {
            ValueKind::None => "no value",
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::LightUserData | ValueKind::UserData => "userdata",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Thread => "thread",
        }
    }
}

/// Event passed to a debug hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum HookEvent {
    Call = 0,
    Return = 1,
    Line = 2,
    Count = 3,
    TailCall = 4,
}

impl HookEvent {
    pub const ALL: [HookEvent; 5] = [
        HookEvent::Call,
        HookEvent::Return,
        HookEvent::Line,
        HookEvent::Count,
        HookEvent::TailCall,
    ];

    pub const fn constant_name(self) -> &'static str {
        match self {
            HookEvent::Call => "hookcall",
            HookEvent::Return => "hookret",
            HookEvent::Line => "hookline",
            HookEvent::Count => "hookcount",
            HookEvent::TailCall => "hooktailcall",
        }
    }
}

bitflags! {
    /// Events a debug hook subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookMask: i32 {
        const CALL = 1 << 0;
        const RET = 1 << 1;
        const LINE = 1 << 2;
        const COUNT = 1 << 3;
    }
}

impl HookMask {
    pub const CONSTANTS: [(&'static str, HookMask); 4] = [
        ("maskcall", HookMask::CALL),
        ("maskret", HookMask::RET),
        ("maskline", HookMask::LINE),
        ("maskcount", HookMask::COUNT),
    ];
}

bitflags! {
    /// Standard libraries to open in a new instance.
    ///
    /// The base library is always present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LibFlags: i32 {
        const COROUTINE = 1 << 0;
        const TABLE = 1 << 1;
        const IO = 1 << 2;
        const OS = 1 << 3;
        const STRING = 1 << 4;
        const UTF8 = 1 << 5;
        const MATH = 1 << 6;
        const PACKAGE = 1 << 7;
        const ALL_SAFE = Self::COROUTINE.bits()
            | Self::TABLE.bits()
            | Self::IO.bits()
            | Self::OS.bits()
            | Self::STRING.bits()
            | Self::UTF8.bits()
            | Self::MATH.bits()
            | Self::PACKAGE.bits();
    }
}

impl LibFlags {
    pub const CONSTANTS: [(&'static str, LibFlags); 9] = [
        ("lib_coroutine", LibFlags::COROUTINE),
        ("lib_table", LibFlags::TABLE),
        ("lib_io", LibFlags::IO),
        ("lib_os", LibFlags::OS),
        ("lib_string", LibFlags::STRING),
        ("lib_utf8", LibFlags::UTF8),
        ("lib_math", LibFlags::MATH),
        ("lib_package", LibFlags::PACKAGE),
        ("lib_all_safe", LibFlags::ALL_SAFE),
    ];
}

/// Result of an engine operation that may end the instance.
///
/// `Failure` carries a recoverable status; `Fatal` means the panic hook ran
/// and the instance is gone.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Failure(Status),
    Fatal(String),
}

impl<T> Outcome<T> {
    /// Status code reported to the host.
    pub fn status(&self) -> Status {
        match self {
            Outcome::Ok(_) => Status::Ok,
            Outcome::Failure(status) => *status,
            Outcome::Fatal(_) => Status::ErrFatal,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Failure(status) => Outcome::Failure(status),
            Outcome::Fatal(reason) => Outcome::Fatal(reason),
        }
    }
}
