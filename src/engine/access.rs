//! Table, global, metatable and userdata access.
//!
//! Operations that can run metamethods return `mlua::Error`s wrapped in
//! [`BridgeError::Lua`]; the dispatcher raises those inside the instance.
//! Misuse of the boundary (wrong target type for a raw operation, bad
//! sizes) is reported as an argument error instead.

use std::ffi::c_void;

use hostlua_core::ValueKind;
use mlua::{Table, Value};

use super::userdata::{self, HostBlock};
use super::{Instance, kind_of};
use crate::error::BridgeError;

fn expect_table(value: Value) -> Result<Table, BridgeError> {
    match value {
        Value::Table(t) => Ok(t),
        other => Err(BridgeError::TypeMismatch {
            expected: "table",
            found: kind_of(&other).type_name(),
        }),
    }
}

impl Instance {
    fn key(&self, bytes: &[u8]) -> Result<Value, BridgeError> {
        Ok(Value::String(self.lua.create_string(bytes)?))
    }

    /// `target[key]`, honoring `__index`.
    pub(crate) fn index_value(&self, target: &Value, key: Value) -> Result<Value, BridgeError> {
        match target {
            Value::Table(t) => Ok(t.get::<Value>(key)?),
            Value::UserData(ud) => Ok(userdata::index(ud.clone(), key)?),
            other => Err(mlua::Error::runtime(format!(
                "attempt to index a {} value",
                kind_of(other).type_name()
            ))
            .into()),
        }
    }

    /// `target[key] = value`, honoring `__newindex`.
    pub(crate) fn assign_value(
        &self,
        target: &Value,
        key: Value,
        value: Value,
    ) -> Result<(), BridgeError> {
        match target {
            Value::Table(t) => Ok(t.set(key, value)?),
            Value::UserData(ud) => Ok(userdata::new_index(ud.clone(), key, value)?),
            other => Err(mlua::Error::runtime(format!(
                "attempt to index a {} value",
                kind_of(other).type_name()
            ))
            .into()),
        }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub fn new_table(&self) -> Result<(), BridgeError> {
        let table = self.lua.create_table()?;
        self.push(Value::Table(table))
    }

    /// Pop a key, push `t[key]` where `t` is at `index`.
    pub fn get_table(&self, index: i32) -> Result<ValueKind, BridgeError> {
        let target = self.value_at(index)?;
        let key = self.pop()?;
        let value = self.index_value(&target, key)?;
        let kind = kind_of(&value);
        self.push(value)?;
        Ok(kind)
    }

    /// Pop a value and a key, assign `t[key] = value` where `t` is at `index`.
    pub fn set_table(&self, index: i32) -> Result<(), BridgeError> {
        let target = self.value_at(index)?;
        let mut popped = self.pop_n(2)?.into_iter();
        let (Some(key), Some(value)) = (popped.next(), popped.next()) else {
            unreachable!("pop_n(2) returns two values");
        };
        self.assign_value(&target, key, value)
    }

    pub fn get_field(&self, index: i32, name: &[u8]) -> Result<ValueKind, BridgeError> {
        let target = self.value_at(index)?;
        let value = self.index_value(&target, self.key(name)?)?;
        let kind = kind_of(&value);
        self.push(value)?;
        Ok(kind)
    }

    pub fn set_field(&self, index: i32, name: &[u8]) -> Result<(), BridgeError> {
        let target = self.value_at(index)?;
        let key = self.key(name)?;
        let value = self.pop()?;
        self.assign_value(&target, key, value)
    }

    pub fn raw_get(&self, index: i32) -> Result<ValueKind, BridgeError> {
        let table = expect_table(self.value_at(index)?)?;
        let key = self.pop()?;
        let value = table.raw_get::<Value>(key)?;
        let kind = kind_of(&value);
        self.push(value)?;
        Ok(kind)
    }

    pub fn raw_set(&self, index: i32) -> Result<(), BridgeError> {
        let table = expect_table(self.value_at(index)?)?;
        let mut popped = self.pop_n(2)?.into_iter();
        let (Some(key), Some(value)) = (popped.next(), popped.next()) else {
            unreachable!("pop_n(2) returns two values");
        };
        table.raw_set(key, value)?;
        Ok(())
    }

    pub fn raw_get_i(&self, index: i32, n: i64) -> Result<ValueKind, BridgeError> {
        let table = expect_table(self.value_at(index)?)?;
        let value = table.raw_get::<Value>(n)?;
        let kind = kind_of(&value);
        self.push(value)?;
        Ok(kind)
    }

    pub fn raw_set_i(&self, index: i32, n: i64) -> Result<(), BridgeError> {
        let table = expect_table(self.value_at(index)?)?;
        let value = self.pop()?;
        table.raw_set(n, value)?;
        Ok(())
    }

    // ========================================================================
    // Globals
    // ========================================================================

    pub fn get_global(&self, name: &[u8]) -> Result<ValueKind, BridgeError> {
        let value = self.lua.globals().get::<Value>(self.key(name)?)?;
        let kind = kind_of(&value);
        self.push(value)?;
        Ok(kind)
    }

    pub fn set_global(&self, name: &[u8]) -> Result<(), BridgeError> {
        let key = self.key(name)?;
        let value = self.pop()?;
        self.lua.globals().set(key, value)?;
        Ok(())
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Create `registry[tname]` unless present, and push it.
    ///
    /// Returns whether a new table was created.
    pub fn new_metatable(&self, tname: &[u8]) -> Result<bool, BridgeError> {
        let key = self.key(tname)?;
        let existing = self.registry.raw_get::<Value>(key.clone())?;
        if !matches!(existing, Value::Nil) {
            self.push(existing)?;
            return Ok(false);
        }

        let metatable = self.lua.create_table()?;
        metatable.raw_set("__name", key.clone())?;
        self.registry.raw_set(key, metatable.clone())?;
        self.push(Value::Table(metatable))?;
        Ok(true)
    }

    /// Push `registry[tname]`.
    pub fn get_named_metatable(&self, tname: &[u8]) -> Result<ValueKind, BridgeError> {
        let value = self.registry.raw_get::<Value>(self.key(tname)?)?;
        let kind = kind_of(&value);
        self.push(value)?;
        Ok(kind)
    }

    /// Pop a table or nil and make it the metatable of the value at `index`.
    pub fn set_metatable(&self, index: i32) -> Result<(), BridgeError> {
        let target = self.value_at(index)?;
        let metatable = match self.value_at(-1)? {
            Value::Nil => None,
            Value::Table(t) => Some(t),
            other => {
                return Err(BridgeError::TypeMismatch {
                    expected: "table or nil",
                    found: kind_of(&other).type_name(),
                });
            }
        };

        match &target {
            Value::Table(t) => {
                let _ = t.set_metatable(metatable);
            }
            Value::UserData(ud) => ud.borrow::<HostBlock>()?.set_metatable(metatable),
            other => {
                return Err(BridgeError::TypeMismatch {
                    expected: "table or userdata",
                    found: kind_of(other).type_name(),
                });
            }
        }
        self.pop()?;
        Ok(())
    }

    /// Push the metatable of the value at `index`, if it has one.
    pub fn get_metatable(&self, index: i32) -> Result<bool, BridgeError> {
        let metatable = match self.value_at(index)? {
            Value::Table(t) => t.metatable(),
            Value::UserData(ud) => ud.borrow::<HostBlock>().ok().and_then(|b| b.metatable()),
            _ => None,
        };
        match metatable {
            Some(mt) => {
                self.push(Value::Table(mt))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Userdata
    // ========================================================================

    /// Push a zeroed block of `size` bytes and return its address.
    pub fn new_userdata(&self, size: usize) -> Result<*mut c_void, BridgeError> {
        let ud = self
            .lua
            .create_userdata(HostBlock::new(size, &self.finalizers))?;
        let ptr = ud.borrow::<HostBlock>()?.data_ptr();
        self.push(Value::UserData(ud))?;
        Ok(ptr)
    }

    /// Block address if the value at `index` is a block whose metatable is
    /// `registry[tname]`.
    pub fn test_userdata(&self, index: i32, tname: &[u8]) -> Result<Option<*mut c_void>, BridgeError> {
        let Some(Value::UserData(ud)) = self.try_value_at(index) else {
            return Ok(None);
        };
        let Ok(block) = ud.borrow::<HostBlock>() else {
            return Ok(None);
        };
        let Some(metatable) = block.metatable() else {
            return Ok(None);
        };
        let expected = self.registry.raw_get::<Value>(self.key(tname)?)?;
        let matches = matches!(&expected, Value::Table(t) if t.to_pointer() == metatable.to_pointer());
        Ok(matches.then(|| block.data_ptr()))
    }

    /// Like [`Instance::test_userdata`], raising an argument error on mismatch.
    pub fn check_userdata(&self, index: i32, tname: &[u8]) -> Result<*mut c_void, BridgeError> {
        if let Some(ptr) = self.test_userdata(index, tname)? {
            return Ok(ptr);
        }
        let found = self.kind_at(index).type_name();
        Err(mlua::Error::runtime(format!(
            "bad argument #{index} ({} expected, got {found})",
            String::from_utf8_lossy(tname)
        ))
        .into())
    }
}
