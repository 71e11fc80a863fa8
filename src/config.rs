//! Per-instance engine configuration.

use hostlua_core::LibFlags;
use mlua::StdLib;

use crate::error::BridgeError;

/// Chunk name used when `loadbuffer` is given none.
pub const DEFAULT_CHUNK_NAME: &str = "=(buffer)";

/// Settings applied when an instance is created.
///
/// ```
/// use hostlua::{EngineConfig, LibFlags};
///
/// let config = EngineConfig::new()
///     .with_libs(LibFlags::STRING | LibFlags::TABLE)
///     .with_memory_limit(8 * 1024 * 1024);
/// assert_eq!(config.memory_limit, Some(8 * 1024 * 1024));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Libraries opened on creation, on top of the base library.
    pub libs: LibFlags,
    /// Allocation ceiling in bytes. `None` is unlimited.
    pub memory_limit: Option<usize>,
    pub chunk_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            libs: LibFlags::empty(),
            memory_limit: None,
            chunk_name: DEFAULT_CHUNK_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_libs(mut self, libs: LibFlags) -> Self {
        self.libs = libs;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_chunk_name(mut self, name: impl Into<String>) -> Self {
        self.chunk_name = name.into();
        self
    }

    /// Build from raw boundary arguments. A limit of zero means unlimited.
    pub fn from_raw(libs: i32, memory_limit: i64) -> Result<Self, BridgeError> {
        let libs = LibFlags::from_bits(libs)
            .ok_or_else(|| BridgeError::Argument(format!("unknown library flags {libs:#x}")))?;
        let memory_limit = match memory_limit {
            0 => None,
            n if n < 0 => {
                return Err(BridgeError::Argument(format!(
                    "memory limit must not be negative, got {n}"
                )));
            }
            n => Some(usize::try_from(n).map_err(|_| {
                BridgeError::Argument(format!("memory limit {n} does not fit this platform"))
            })?),
        };
        Ok(Self {
            libs,
            memory_limit,
            ..Self::default()
        })
    }

    pub(crate) fn std_libs(&self) -> StdLib {
        std_libs(self.libs)
    }
}

/// Map library flags onto the engine's library set.
pub(crate) fn std_libs(flags: LibFlags) -> StdLib {
    const MAPPING: [(LibFlags, StdLib); 8] = [
        (LibFlags::COROUTINE, StdLib::COROUTINE),
        (LibFlags::TABLE, StdLib::TABLE),
        (LibFlags::IO, StdLib::IO),
        (LibFlags::OS, StdLib::OS),
        (LibFlags::STRING, StdLib::STRING),
        (LibFlags::UTF8, StdLib::UTF8),
        (LibFlags::MATH, StdLib::MATH),
        (LibFlags::PACKAGE, StdLib::PACKAGE),
    ];

    MAPPING
        .into_iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(StdLib::NONE, |libs, (_, lib)| libs | lib)
}
