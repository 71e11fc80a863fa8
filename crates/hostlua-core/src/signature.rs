//! Function signatures and table entries.

use std::fmt;

use thiserror::Error;

use crate::param_kind::ParamKind;

/// Errors produced while parsing a signature descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("empty signature descriptor")]
    Empty,

    #[error("unknown kind tag '{0}'")]
    UnknownToken(String),

    #[error("'void' is only valid as the return kind (parameter {position})")]
    VoidParameter { position: usize },
}

/// Ordered parameter kinds plus the return kind.
///
/// The textual form lists the parameter tags in order followed by the return
/// tag, separated by single spaces: `"handle i32 void"` takes a handle and an
/// `i32` and returns nothing. A function without parameters has a one-token
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    params: Vec<ParamKind>,
    ret: ParamKind,
}

impl FunctionSignature {
    /// Create a signature.
    ///
    /// # Panics
    ///
    /// Panics if a parameter kind is [`ParamKind::Void`]. The `#[export]`
    /// attribute never produces such a signature because `()` cannot be
    /// written as a parameter type.
    pub fn new(params: Vec<ParamKind>, ret: ParamKind) -> Self {
        assert!(
            !params.contains(&ParamKind::Void),
            "void is not a parameter kind"
        );
        Self { params, ret }
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn ret(&self) -> ParamKind {
        self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Encode as a descriptor string.
    pub fn descriptor(&self) -> String {
        self.to_string()
    }

    /// Parse a descriptor string.
    pub fn parse(descriptor: &str) -> Result<Self, SignatureError> {
        let mut kinds = descriptor
            .split_whitespace()
            .map(str::parse::<ParamKind>)
            .collect::<Result<Vec<_>, _>>()?;

        let ret = kinds.pop().ok_or(SignatureError::Empty)?;
        if let Some(position) = kinds.iter().position(|k| *k == ParamKind::Void) {
            return Err(SignatureError::VoidParameter { position });
        }

        Ok(Self { params: kinds, ret })
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.params {
            write!(f, "{} ", param)?;
        }
        write!(f, "{}", self.ret)
    }
}

/// A named integer constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantEntry {
    pub name: &'static str,
    pub value: i64,
}

impl ConstantEntry {
    pub const fn new(name: &'static str, value: i64) -> Self {
        Self { name, value }
    }
}

/// An exported function and its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: &'static str,
    pub signature: FunctionSignature,
}

impl FunctionEntry {
    pub fn new(name: &'static str, signature: FunctionSignature) -> Self {
        Self { name, signature }
    }
}
