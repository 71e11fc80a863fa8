//! Bookkeeping for host closures.
//!
//! Two weak tables in the engine let the boundary find its way back from a
//! closure to its upvalues and from a running frame to its closure, without
//! keeping collected closures alive:
//!
//! - `records`, weak keys: closure -> [`ClosureRecord`]
//! - `running`, weak values: closure id -> closure

use std::cell::Cell;
use std::rc::Rc;

use mlua::{Function, Lua, Table, UserData, Value};

use super::stack::Upvalues;

struct ClosureRecord {
    upvalues: Upvalues,
}

impl UserData for ClosureRecord {}

pub(crate) struct HostClosures {
    records: Table,
    running: Table,
    next_id: Cell<i64>,
}

fn weak_table(lua: &Lua, mode: &str) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    let metatable = lua.create_table()?;
    metatable.raw_set("__mode", mode)?;
    let _ = table.set_metatable(Some(metatable));
    Ok(table)
}

impl HostClosures {
    pub fn new(lua: &Lua) -> mlua::Result<Self> {
        Ok(Self {
            records: weak_table(lua, "k")?,
            running: weak_table(lua, "v")?,
            next_id: Cell::new(0),
        })
    }

    /// Id for a closure about to be created.
    pub fn next_id(&self) -> i64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub fn track(&self, lua: &Lua, id: i64, function: &Function, upvalues: &Upvalues) -> mlua::Result<()> {
        let record = lua.create_userdata(ClosureRecord {
            upvalues: Rc::clone(upvalues),
        })?;
        self.records.raw_set(function.clone(), record)?;
        self.running.raw_set(id, function.clone())
    }

    /// The closure with `id`, while it is alive.
    pub fn function(&self, id: i64) -> Option<Function> {
        self.running.raw_get::<Option<Function>>(id).ok().flatten()
    }

    /// Upvalues of `value` if it is a host closure.
    pub fn upvalues_of(&self, value: &Value) -> Option<Upvalues> {
        let Value::Function(function) = value else {
            return None;
        };
        match self.records.raw_get::<Value>(function.clone()).ok()? {
            Value::UserData(ud) => ud
                .borrow::<ClosureRecord>()
                .ok()
                .map(|record| Rc::clone(&record.upvalues)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn tracked_closures_are_found() {
        let lua = Lua::new();
        let closures = HostClosures::new(&lua).unwrap();
        let upvalues: Upvalues = Rc::new(RefCell::new(vec![Value::Integer(3)]));

        let id = closures.next_id();
        let function = lua.create_function(|_, ()| Ok(())).unwrap();
        closures.track(&lua, id, &function, &upvalues).unwrap();

        let found = Value::Function(closures.function(id).unwrap());
        assert_eq!(found.to_pointer(), Value::Function(function.clone()).to_pointer());
        let shared = closures.upvalues_of(&Value::Function(function)).unwrap();
        assert!(Rc::ptr_eq(&shared, &upvalues));
    }

    #[test]
    fn untracked_functions_have_no_record() {
        let lua = Lua::new();
        let closures = HostClosures::new(&lua).unwrap();
        let function: Function = lua.load("return function() end").eval().unwrap();
        assert!(closures.upvalues_of(&Value::Function(function)).is_none());
        assert!(closures.upvalues_of(&Value::Integer(1)).is_none());
        assert!(closures.function(7).is_none());
    }

    #[test]
    fn collected_closures_drop_out() {
        let lua = Lua::new();
        let closures = HostClosures::new(&lua).unwrap();
        let upvalues: Upvalues = Rc::default();

        let id = closures.next_id();
        let function = lua.create_function(|_, ()| Ok(())).unwrap();
        closures.track(&lua, id, &function, &upvalues).unwrap();
        drop(function);
        lua.gc_collect().unwrap();
        lua.gc_collect().unwrap();
        assert!(closures.function(id).is_none());
        assert_eq!(Rc::strong_count(&upvalues), 1);
    }
}
