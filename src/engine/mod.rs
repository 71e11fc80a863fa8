//! Engine instances.
//!
//! An [`Instance`] pairs one `mlua::Lua` state with the explicit value stack
//! the host manipulates through the exported functions. Instances are
//! created by `newstate`, registered in the thread's handle arena and only
//! reached through their [`EngineHandle`].
//!
//! No `RefCell` borrow of an instance is ever held across a call into the
//! engine: scripts may call host closures, which re-enter the boundary on
//! the same instance.

mod access;
mod call;
mod closures;
pub(crate) mod stack;
pub(crate) mod userdata;

use std::cell::{Cell, RefCell};
use std::ffi::c_void;

use hostlua_core::{EngineHandle, HookMask, HostFn, ValueKind};
use mlua::{Lua, LuaOptions, Table, Thread, Value};

use crate::config::EngineConfig;
use crate::error::BridgeError;
use closures::HostClosures;
use stack::{Slot, ValueStack};
use userdata::{Finalizers, HostBlock};

pub use stack::MAX_STACK_SLOTS;

/// Name under which the per-instance registry table is anchored.
const REGISTRY_KEY: &str = "hostlua.registry";

pub struct Instance {
    handle: Cell<EngineHandle>,
    stack: RefCell<ValueStack>,
    registry: Table,
    closures: HostClosures,
    finalizers: Finalizers,
    main_thread: Thread,
    panic_hook: Cell<Option<HostFn>>,
    hook_mask: Cell<HookMask>,
    config: EngineConfig,
    // Dropped last: everything above holds references into the state.
    lua: Lua,
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Blocks dropped while the state closes must not call back into it.
        self.finalizers.clear();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.get())
            .field("top", &self.top())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Tag of an engine value.
pub(crate) fn kind_of(value: &Value) -> ValueKind {
    match value {
        Value::Nil => ValueKind::Nil,
        Value::Boolean(_) => ValueKind::Boolean,
        Value::LightUserData(_) => ValueKind::LightUserData,
        Value::Integer(_) | Value::Number(_) => ValueKind::Number,
        Value::String(_) => ValueKind::String,
        Value::Table(_) => ValueKind::Table,
        Value::Function(_) => ValueKind::Function,
        Value::Thread(_) => ValueKind::Thread,
        _ => ValueKind::UserData,
    }
}

impl Instance {
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn new(config: EngineConfig) -> Result<Self, BridgeError> {
        let lua = Lua::new_with(config.std_libs(), LuaOptions::default())?;
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit)?;
        }
        let registry = lua.create_table()?;
        lua.set_named_registry_value(REGISTRY_KEY, registry.clone())?;
        let closures = HostClosures::new(&lua)?;
        let main_thread = lua.current_thread();
        userdata::install_getmetatable(&lua)?;

        tracing::debug!(libs = ?config.libs, memory_limit = ?config.memory_limit, "engine instance created");

        Ok(Self {
            handle: Cell::new(EngineHandle::NULL),
            stack: RefCell::new(ValueStack::new()),
            registry,
            closures,
            finalizers: Finalizers::default(),
            main_thread,
            panic_hook: Cell::new(None),
            hook_mask: Cell::new(HookMask::empty()),
            config,
            lua,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.get()
    }

    pub(crate) fn set_handle(&self, handle: EngineHandle) {
        self.handle.set(handle);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn open_libs(&self) -> Result<(), BridgeError> {
        self.lua.load_std_libs(mlua::StdLib::ALL_SAFE)?;
        Ok(())
    }

    /// Install the panic hook, returning the previous one.
    pub fn set_panic_hook(&self, hook: Option<HostFn>) -> Option<HostFn> {
        self.panic_hook.replace(hook)
    }

    pub(crate) fn panic_hook(&self) -> Option<HostFn> {
        self.panic_hook.get()
    }

    /// Run the finalizers of every block still alive. Called by `close`
    /// while the handle is live, so finalizers may be host closures.
    pub fn run_finalizers(&self) {
        self.finalizers.run_all();
    }

    pub fn collect_garbage(&self) -> Result<(), BridgeError> {
        self.lua.gc_collect()?;
        Ok(())
    }

    pub fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    pub fn top(&self) -> i32 {
        self.stack.borrow().top() as i32
    }

    pub fn set_top(&self, index: i32) -> Result<(), BridgeError> {
        self.stack.borrow_mut().set_top(index)
    }

    pub fn abs_index(&self, index: i32) -> Result<i32, BridgeError> {
        self.stack.borrow().abs_index(index)
    }

    pub fn insert(&self, index: i32) -> Result<(), BridgeError> {
        self.stack.borrow_mut().insert(index)
    }

    pub fn remove(&self, index: i32) -> Result<(), BridgeError> {
        self.stack.borrow_mut().remove(index).map(drop)
    }

    pub fn replace(&self, index: i32) -> Result<(), BridgeError> {
        self.stack.borrow_mut().replace(index)
    }

    pub fn push(&self, value: Value) -> Result<(), BridgeError> {
        self.stack.borrow_mut().push(value)
    }

    pub fn pop(&self) -> Result<Value, BridgeError> {
        self.stack.borrow_mut().pop()
    }

    pub fn pop_n(&self, n: usize) -> Result<Vec<Value>, BridgeError> {
        self.stack.borrow_mut().pop_n(n)
    }

    /// Push a copy of the value at `index`.
    pub fn push_copy(&self, index: i32) -> Result<(), BridgeError> {
        let value = self.value_at(index)?;
        self.push(value)
    }

    /// Value at `index`, including the registry and upvalue pseudo-indices.
    pub fn value_at(&self, index: i32) -> Result<Value, BridgeError> {
        let stack = self.stack.borrow();
        match stack.resolve(index)? {
            Slot::Registry => Ok(Value::Table(self.registry.clone())),
            slot => stack.get(slot).ok_or(BridgeError::InvalidIndex {
                index,
                top: stack.top(),
            }),
        }
    }

    /// Like [`Instance::value_at`], with `None` for an unacceptable index.
    pub fn try_value_at(&self, index: i32) -> Option<Value> {
        self.value_at(index).ok()
    }

    /// Overwrite a stack or upvalue slot in place.
    pub(crate) fn set_value_at(&self, index: i32, value: Value) -> Result<(), BridgeError> {
        let mut stack = self.stack.borrow_mut();
        let slot = stack.resolve(index)?;
        stack.set(slot, value)
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.borrow().depth()
    }

    // ========================================================================
    // Push
    // ========================================================================

    pub fn push_string(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        let s = self.lua.create_string(bytes)?;
        self.push(Value::String(s))
    }

    pub fn push_light_userdata(&self, ptr: *mut c_void) -> Result<(), BridgeError> {
        self.push(Value::LightUserData(mlua::LightUserData(ptr)))
    }

    pub fn push_globals(&self) -> Result<(), BridgeError> {
        self.push(Value::Table(self.lua.globals()))
    }

    /// Push the running thread. True when it is the main thread.
    pub fn push_thread(&self) -> Result<bool, BridgeError> {
        let current = Value::Thread(self.lua.current_thread());
        let is_main = current.to_pointer() == Value::Thread(self.main_thread.clone()).to_pointer();
        self.push(current)?;
        Ok(is_main)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn kind_at(&self, index: i32) -> ValueKind {
        self.try_value_at(index)
            .map_or(ValueKind::None, |value| kind_of(&value))
    }

    pub fn is_integer(&self, index: i32) -> bool {
        matches!(self.try_value_at(index), Some(Value::Integer(_)))
    }

    /// Numbers and strings convertible to numbers.
    pub fn is_number(&self, index: i32) -> bool {
        match self.try_value_at(index) {
            Some(Value::Integer(_) | Value::Number(_)) => true,
            Some(value @ Value::String(_)) => {
                matches!(self.lua.coerce_number(value), Ok(Some(_)))
            }
            _ => false,
        }
    }

    /// Strings and numbers.
    pub fn is_string(&self, index: i32) -> bool {
        matches!(
            self.try_value_at(index),
            Some(Value::String(_) | Value::Integer(_) | Value::Number(_))
        )
    }

    pub fn is_host_function(&self, index: i32) -> bool {
        match self.try_value_at(index) {
            Some(Value::Function(f)) => f.info().what == "C",
            _ => false,
        }
    }

    pub fn to_boolean(&self, index: i32) -> bool {
        !matches!(
            self.try_value_at(index),
            None | Some(Value::Nil | Value::Boolean(false))
        )
    }

    pub fn to_number(&self, index: i32) -> Option<f64> {
        match self.try_value_at(index)? {
            Value::Integer(n) => Some(n as f64),
            Value::Number(n) => Some(n),
            value @ Value::String(_) => self.lua.coerce_number(value).ok().flatten(),
            _ => None,
        }
    }

    pub fn to_integer(&self, index: i32) -> Option<i64> {
        match self.try_value_at(index)? {
            Value::Integer(n) => Some(n),
            value @ (Value::Number(_) | Value::String(_)) => {
                self.lua.coerce_integer(value).ok().flatten()
            }
            _ => None,
        }
    }

    /// Bytes of the string at `index`, converting a number in place.
    ///
    /// The pointer stays valid while the value remains in that slot.
    pub fn to_string_bytes(&self, index: i32) -> Result<Option<(*const u8, usize)>, BridgeError> {
        let value = self.value_at(index)?;
        let s = match value {
            Value::String(s) => s,
            Value::Integer(_) | Value::Number(_) => {
                let Some(s) = self.lua.coerce_string(value)? else {
                    return Ok(None);
                };
                self.set_value_at(index, Value::String(s.clone()))?;
                s
            }
            _ => return Ok(None),
        };
        let bytes = s.as_bytes();
        Ok(Some((bytes.as_ptr(), bytes.len())))
    }

    /// Address of a userdata block or the value of a light userdata.
    pub fn to_userdata(&self, index: i32) -> *mut c_void {
        match self.try_value_at(index) {
            Some(Value::LightUserData(ud)) => ud.0,
            Some(Value::UserData(ud)) => ud
                .borrow::<HostBlock>()
                .map_or(std::ptr::null_mut(), |block| block.data_ptr()),
            _ => std::ptr::null_mut(),
        }
    }

    pub fn to_pointer(&self, index: i32) -> *const c_void {
        match self.try_value_at(index) {
            Some(Value::LightUserData(ud)) => ud.0.cast_const(),
            Some(value) => value.to_pointer(),
            None => std::ptr::null(),
        }
    }

    /// Raw length: string bytes, table border, userdata block size.
    pub fn raw_len(&self, index: i32) -> Result<i64, BridgeError> {
        Ok(match self.value_at(index)? {
            Value::String(s) => s.as_bytes().len() as i64,
            Value::Table(t) => t.raw_len() as i64,
            Value::UserData(ud) => ud.borrow::<HostBlock>().map_or(0, |b| b.len() as i64),
            _ => 0,
        })
    }

    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        match (self.try_value_at(a), self.try_value_at(b)) {
            (Some(a), Some(b)) => raw_equal(&a, &b),
            _ => false,
        }
    }

    /// Events the installed debug hook subscribes to.
    pub fn hook_mask(&self) -> HookMask {
        self.hook_mask.get()
    }
}

/// Primitive equality, without metamethods.
pub(crate) fn raw_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
            *i as f64 == *n && n.fract() == 0.0
        }
        (Value::LightUserData(x), Value::LightUserData(y)) => x.0 == y.0,
        (Value::String(x), Value::String(y)) => *x.as_bytes() == *y.as_bytes(),
        _ => kind_of(a) == kind_of(b) && !a.to_pointer().is_null() && a.to_pointer() == b.to_pointer(),
    }
}
