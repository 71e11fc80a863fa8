//! The published registration table.
//!
//! [`RegistrationTable`] holds the constant and function tables in the order
//! they were added. Positions are stable for the life of the table: hosts
//! enumerate once at startup and may cache indices. There is no mutation API
//! after [`TableBuilder::build`]; a table is published by placing it behind
//! an immutable static.
//!
//! Names and descriptors are stored a second time as [`CString`]s so the
//! boundary can hand out `char*` without allocating per call.

use std::ffi::{CStr, CString};
use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::signature::{ConstantEntry, FunctionEntry, FunctionSignature};

/// Which of the two tables an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Constants,
    Functions,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Constants => f.write_str("constant"),
            TableKind::Functions => f.write_str("function"),
        }
    }
}

/// Errors from building or reading a registration table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Index outside `[0, count)`.
    #[error("{table} index {index} out of range (count {count})")]
    IndexOutOfRange {
        table: TableKind,
        index: i64,
        count: usize,
    },

    #[error("{table} name must not be empty")]
    EmptyName { table: TableKind },

    #[error("{table} name '{name}' contains a NUL byte")]
    InvalidName { table: TableKind, name: String },

    #[error("duplicate {table} name '{name}'")]
    DuplicateName { table: TableKind, name: String },
}

struct PublishedConstant {
    entry: ConstantEntry,
    c_name: CString,
}

struct PublishedFunction {
    entry: FunctionEntry,
    c_name: CString,
    descriptor: String,
    c_descriptor: CString,
}

/// Immutable, index-addressable constant and function tables.
pub struct RegistrationTable {
    constants: Vec<PublishedConstant>,
    functions: Vec<PublishedFunction>,
    constants_by_name: FxHashMap<&'static str, usize>,
    functions_by_name: FxHashMap<&'static str, usize>,
}

impl RegistrationTable {
    pub fn builder() -> TableBuilder {
        TableBuilder::default()
    }

    // ==========================================================================
    // Constants
    // ==========================================================================

    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    pub fn constant(&self, index: i64) -> Result<&ConstantEntry, TableError> {
        self.published_constant(index).map(|c| &c.entry)
    }

    pub fn constant_name(&self, index: i64) -> Result<&'static str, TableError> {
        self.constant(index).map(|c| c.name)
    }

    pub fn constant_name_c(&self, index: i64) -> Result<&CStr, TableError> {
        self.published_constant(index).map(|c| c.c_name.as_c_str())
    }

    pub fn constant_value(&self, index: i64) -> Result<i64, TableError> {
        self.constant(index).map(|c| c.value)
    }

    /// Value of a constant by name.
    pub fn find_constant(&self, name: &str) -> Option<i64> {
        let index = *self.constants_by_name.get(name)?;
        Some(self.constants[index].entry.value)
    }

    pub fn constants(&self) -> impl Iterator<Item = &ConstantEntry> {
        self.constants.iter().map(|c| &c.entry)
    }

    // ==========================================================================
    // Functions
    // ==========================================================================

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn function(&self, index: i64) -> Result<&FunctionEntry, TableError> {
        self.published_function(index).map(|f| &f.entry)
    }

    pub fn function_name(&self, index: i64) -> Result<&'static str, TableError> {
        self.function(index).map(|f| f.name)
    }

    pub fn function_name_c(&self, index: i64) -> Result<&CStr, TableError> {
        self.published_function(index).map(|f| f.c_name.as_c_str())
    }

    pub fn function_signature(&self, index: i64) -> Result<&FunctionSignature, TableError> {
        self.function(index).map(|f| &f.signature)
    }

    pub fn function_descriptor(&self, index: i64) -> Result<&str, TableError> {
        self.published_function(index).map(|f| f.descriptor.as_str())
    }

    pub fn function_descriptor_c(&self, index: i64) -> Result<&CStr, TableError> {
        self.published_function(index)
            .map(|f| f.c_descriptor.as_c_str())
    }

    /// Position of a function by name.
    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions_by_name.get(name).copied()
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.functions.iter().map(|f| &f.entry)
    }

    fn published_constant(&self, index: i64) -> Result<&PublishedConstant, TableError> {
        checked(index, self.constants.len(), TableKind::Constants).map(|i| &self.constants[i])
    }

    fn published_function(&self, index: i64) -> Result<&PublishedFunction, TableError> {
        checked(index, self.functions.len(), TableKind::Functions).map(|i| &self.functions[i])
    }
}

impl fmt::Debug for RegistrationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationTable")
            .field("constant_count", &self.constants.len())
            .field("function_count", &self.functions.len())
            .finish()
    }
}

fn checked(index: i64, count: usize, table: TableKind) -> Result<usize, TableError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < count)
        .ok_or(TableError::IndexOutOfRange {
            table,
            index,
            count,
        })
}

// ============================================================================
// Builder
// ============================================================================

/// Accumulates entries and validates them once in [`TableBuilder::build`].
#[derive(Debug, Default)]
pub struct TableBuilder {
    constants: Vec<ConstantEntry>,
    functions: Vec<FunctionEntry>,
}

impl TableBuilder {
    pub fn constant(mut self, name: &'static str, value: i64) -> Self {
        self.constants.push(ConstantEntry::new(name, value));
        self
    }

    pub fn constants(mut self, entries: impl IntoIterator<Item = ConstantEntry>) -> Self {
        self.constants.extend(entries);
        self
    }

    pub fn function(mut self, entry: FunctionEntry) -> Self {
        self.functions.push(entry);
        self
    }

    pub fn functions(mut self, entries: impl IntoIterator<Item = FunctionEntry>) -> Self {
        self.functions.extend(entries);
        self
    }

    /// Validate names and freeze the table.
    pub fn build(self) -> Result<RegistrationTable, TableError> {
        let mut constants_by_name = FxHashMap::default();
        let mut constants = Vec::with_capacity(self.constants.len());
        for entry in self.constants {
            let c_name = validate_name(entry.name, TableKind::Constants)?;
            if constants_by_name.insert(entry.name, constants.len()).is_some() {
                return Err(TableError::DuplicateName {
                    table: TableKind::Constants,
                    name: entry.name.to_string(),
                });
            }
            constants.push(PublishedConstant { entry, c_name });
        }

        let mut functions_by_name = FxHashMap::default();
        let mut functions = Vec::with_capacity(self.functions.len());
        for entry in self.functions {
            let c_name = validate_name(entry.name, TableKind::Functions)?;
            if functions_by_name.insert(entry.name, functions.len()).is_some() {
                return Err(TableError::DuplicateName {
                    table: TableKind::Functions,
                    name: entry.name.to_string(),
                });
            }
            let descriptor = entry.signature.descriptor();
            // Descriptors are built from fixed ASCII tags.
            let c_descriptor = CString::new(descriptor.clone())
                .unwrap_or_else(|_| unreachable!("kind tags never contain NUL"));
            functions.push(PublishedFunction {
                entry,
                c_name,
                descriptor,
                c_descriptor,
            });
        }

        Ok(RegistrationTable {
            constants,
            functions,
            constants_by_name,
            functions_by_name,
        })
    }
}

fn validate_name(name: &'static str, table: TableKind) -> Result<CString, TableError> {
    if name.is_empty() {
        return Err(TableError::EmptyName { table });
    }
    CString::new(name).map_err(|_| TableError::InvalidName {
        table,
        name: name.to_string(),
    })
}
