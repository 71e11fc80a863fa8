//! Errors produced while servicing an exported call.

use hostlua_core::{EngineHandle, Status, TableError};
use thiserror::Error;

/// Failure of a boundary operation.
///
/// Every variant but [`BridgeError::Lua`] is detected by the boundary and
/// reported through the last-error slot. Engine errors are raised inside the
/// instance instead, see `Instance::fail`.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("stale or unknown engine handle {0}")]
    StaleHandle(EngineHandle),

    #[error("stack index {index} is not valid (top is {top})")]
    InvalidIndex { index: i32, top: usize },

    #[error("stack overflow: more than {max} slots")]
    StackOverflow { max: usize },

    #[error("null {0} argument")]
    NullArgument(&'static str),

    #[error("expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    Argument(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("cannot read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

impl BridgeError {
    pub fn status(&self) -> Status {
        match self {
            BridgeError::StaleHandle(_) => Status::ErrHandle,
            BridgeError::InvalidIndex { .. }
            | BridgeError::StackOverflow { .. }
            | BridgeError::Table(_) => Status::ErrIndex,
            BridgeError::NullArgument(_)
            | BridgeError::TypeMismatch { .. }
            | BridgeError::Argument(_) => Status::ErrArg,
            BridgeError::File { .. } => Status::ErrFile,
            BridgeError::Lua(err) => status_of(err),
        }
    }
}

/// Status an engine error maps to.
pub fn status_of(err: &mlua::Error) -> Status {
    match err {
        mlua::Error::SyntaxError { .. } => Status::ErrSyntax,
        mlua::Error::MemoryError(_) => Status::ErrMem,
        mlua::Error::CallbackError { cause, .. } => status_of(cause),
        _ => Status::ErrRun,
    }
}

/// Message an engine error carries, without callback tracebacks.
pub fn message_of(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) | mlua::Error::MemoryError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => message_of(cause),
        other => other.to_string(),
    }
}
