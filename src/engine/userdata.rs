//! Host-owned memory blocks exposed to scripts as full userdata.
//!
//! The engine decides the lifetime of a block; the host only receives the
//! address of its bytes. A block's metatable is stored on the Rust side and
//! the engine-facing metamethods forward to it, which lets the host attach
//! `newmetatable` tables the way it would with a plain Lua state.
//!
//! # Finalizers
//!
//! A block is armed for finalization when it receives a metatable that
//! already holds a `__gc` function; adding the field later has no effect.
//! The finalizer runs once, when the block is collected or its instance is
//! closed, and receives the block's address as a light userdata so
//! `touserdata(1)` yields the same pointer `newuserdata` returned.

use std::cell::{RefCell, UnsafeCell};
use std::ffi::c_void;
use std::rc::Rc;

use mlua::{
    AnyUserData, Function, LightUserData, Lua, MetaMethod, MultiValue, Table, UserData,
    UserDataMethods, Value,
};
use rustc_hash::FxHashMap;

use super::kind_of;

// ============================================================================
// Finalizers
// ============================================================================

#[derive(Default)]
struct FinalizerSet {
    next_id: u64,
    armed: FxHashMap<u64, (*mut c_void, Function)>,
}

/// Armed `__gc` functions of one instance's blocks, keyed by block id.
#[derive(Clone, Default)]
pub(crate) struct Finalizers(Rc<RefCell<FinalizerSet>>);

impl Finalizers {
    fn next_id(&self) -> u64 {
        let mut set = self.0.borrow_mut();
        set.next_id += 1;
        set.next_id
    }

    fn arm(&self, id: u64, ptr: *mut c_void, finalizer: Option<Function>) {
        let mut set = self.0.borrow_mut();
        match finalizer {
            Some(f) => {
                set.armed.insert(id, (ptr, f));
            }
            None => {
                set.armed.remove(&id);
            }
        }
    }

    fn take(&self, id: u64) -> Option<(*mut c_void, Function)> {
        self.0.borrow_mut().armed.remove(&id)
    }

    pub fn armed(&self) -> usize {
        self.0.borrow().armed.len()
    }

    /// Run every armed finalizer, newest block first.
    pub fn run_all(&self) {
        let mut pending: Vec<_> = self.0.borrow_mut().armed.drain().collect();
        pending.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        for (_, (ptr, finalizer)) in pending {
            run_finalizer(ptr, &finalizer);
        }
    }

    /// Disarm everything without running it.
    pub fn clear(&self) {
        self.0.borrow_mut().armed.clear();
    }
}

fn run_finalizer(ptr: *mut c_void, finalizer: &Function) {
    if let Err(err) = finalizer.call::<()>(LightUserData(ptr)) {
        tracing::warn!(error = %err, "error in __gc finalizer");
    }
}

// ============================================================================
// Blocks
// ============================================================================

pub(crate) struct HostBlock {
    // The host writes through the address; no reference to the bytes is
    // ever formed on this side.
    bytes: Box<[UnsafeCell<u8>]>,
    id: u64,
    metatable: RefCell<Option<Table>>,
    finalizers: Finalizers,
}

impl HostBlock {
    /// Zero-filled block of `size` bytes.
    pub fn new(size: usize, finalizers: &Finalizers) -> Self {
        Self {
            bytes: (0..size).map(|_| UnsafeCell::new(0)).collect(),
            id: finalizers.next_id(),
            metatable: RefCell::new(None),
            finalizers: finalizers.clone(),
        }
    }

    /// Address of the first byte. Stable for the lifetime of the block.
    pub fn data_ptr(&self) -> *mut c_void {
        UnsafeCell::raw_get(self.bytes.as_ptr()).cast()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn metatable(&self) -> Option<Table> {
        self.metatable.borrow().clone()
    }

    /// Replace the host metatable, arming or disarming the finalizer.
    pub fn set_metatable(&self, metatable: Option<Table>) {
        let finalizer = metatable
            .as_ref()
            .and_then(|mt| mt.raw_get::<Option<Function>>("__gc").ok().flatten());
        self.finalizers.arm(self.id, self.data_ptr(), finalizer);
        *self.metatable.borrow_mut() = metatable;
    }
}

impl Drop for HostBlock {
    fn drop(&mut self) {
        if let Some((ptr, finalizer)) = self.finalizers.take(self.id) {
            run_finalizer(ptr, &finalizer);
        }
    }
}

// ============================================================================
// Metamethod forwarding
// ============================================================================

/// Field of a block's host metatable, or nil for anything else.
fn metafield(ud: &AnyUserData, name: &str) -> mlua::Result<Value> {
    let metatable = match ud.borrow::<HostBlock>() {
        Ok(block) => block.metatable(),
        Err(_) => None,
    };
    match metatable {
        Some(mt) => mt.raw_get::<Value>(name),
        None => Ok(Value::Nil),
    }
}

/// Host metamethod of a binary operation, looked up on the first operand
/// and then the second.
fn binary_metamethod(name: &str, a: &Value, b: &Value) -> mlua::Result<Option<Function>> {
    for operand in [a, b] {
        if let Value::UserData(ud) = operand {
            if let Value::Function(f) = metafield(ud, name)? {
                return Ok(Some(f));
            }
        }
    }
    Ok(None)
}

fn type_error(action: &str) -> mlua::Error {
    mlua::Error::runtime(format!("attempt to {action} a userdata value"))
}

fn compare_error(a: &Value, b: &Value) -> mlua::Error {
    let (a, b) = (kind_of(a).type_name(), kind_of(b).type_name());
    if a == b {
        mlua::Error::runtime(format!("attempt to compare two {a} values"))
    } else {
        mlua::Error::runtime(format!("attempt to compare {a} with {b}"))
    }
}

/// `ud[key]` through the host metatable.
pub(crate) fn index(ud: AnyUserData, key: Value) -> mlua::Result<Value> {
    match metafield(&ud, "__index")? {
        Value::Function(f) => f.call::<Value>((ud, key)),
        Value::Table(t) => t.get::<Value>(key),
        _ => Err(type_error("index")),
    }
}

/// `ud[key] = value` through the host metatable.
pub(crate) fn new_index(ud: AnyUserData, key: Value, value: Value) -> mlua::Result<()> {
    match metafield(&ud, "__newindex")? {
        Value::Function(f) => f.call::<()>((ud, key, value)),
        Value::Table(t) => t.set(key, value),
        _ => Err(type_error("index")),
    }
}

/// `ud(...)` through the host metatable.
pub(crate) fn call(ud: AnyUserData, args: MultiValue) -> mlua::Result<MultiValue> {
    match metafield(&ud, "__call")? {
        Value::Function(f) => {
            let mut call_args = MultiValue::new();
            call_args.push_back(Value::UserData(ud));
            call_args.extend(args);
            f.call::<MultiValue>(call_args)
        }
        _ => Err(type_error("call")),
    }
}

impl UserData for HostBlock {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(MetaMethod::Index, |_, (ud, key): (AnyUserData, Value)| {
            index(ud, key)
        });

        methods.add_meta_function(
            MetaMethod::NewIndex,
            |_, (ud, key, value): (AnyUserData, Value, Value)| new_index(ud, key, value),
        );

        methods.add_meta_function(MetaMethod::Call, |_, (ud, args): (AnyUserData, MultiValue)| {
            call(ud, args)
        });

        methods.add_meta_function(MetaMethod::Len, |_, ud: AnyUserData| {
            match metafield(&ud, "__len")? {
                Value::Function(f) => f.call::<Value>(ud),
                _ => Ok(Value::Integer(ud.borrow::<HostBlock>()?.len() as i64)),
            }
        });

        // Only reached for operands that are not raw-equal.
        methods.add_meta_function(MetaMethod::Eq, |_, (a, b): (Value, Value)| {
            match binary_metamethod("__eq", &a, &b)? {
                Some(f) => f.call::<Value>((a, b)),
                None => Ok(Value::Boolean(false)),
            }
        });

        methods.add_meta_function(MetaMethod::Lt, |_, (a, b): (Value, Value)| {
            match binary_metamethod("__lt", &a, &b)? {
                Some(f) => f.call::<Value>((a, b)),
                None => Err(compare_error(&a, &b)),
            }
        });

        methods.add_meta_function(MetaMethod::Le, |_, (a, b): (Value, Value)| {
            match binary_metamethod("__le", &a, &b)? {
                Some(f) => f.call::<Value>((a, b)),
                None => Err(compare_error(&a, &b)),
            }
        });

        methods.add_meta_function(MetaMethod::Concat, |_, (a, b): (Value, Value)| {
            match binary_metamethod("__concat", &a, &b)? {
                Some(f) => f.call::<Value>((a, b)),
                None => Err(type_error("concatenate")),
            }
        });

        methods.add_meta_function(MetaMethod::ToString, |lua, ud: AnyUserData| {
            match metafield(&ud, "__tostring")? {
                Value::Function(f) => f.call::<Value>(ud),
                _ => {
                    let name = match metafield(&ud, "__name")? {
                        Value::String(s) => s.to_string_lossy().to_string(),
                        _ => "userdata".to_string(),
                    };
                    let text = format!("{name}: {:p}", ud.borrow::<HostBlock>()?.data_ptr());
                    Ok(Value::String(lua.create_string(text)?))
                }
            }
        });
    }
}

/// Make the global `getmetatable` report a block's host metatable,
/// honoring its `__metatable` field.
pub(crate) fn install_getmetatable(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    let Some(builtin) = globals.get::<Option<Function>>("getmetatable")? else {
        return Ok(());
    };
    let wrapper = lua.create_function(move |_, value: Value| {
        if let Value::UserData(ud) = &value {
            if let Ok(block) = ud.borrow::<HostBlock>() {
                let Some(mt) = block.metatable() else {
                    return Ok(Value::Nil);
                };
                return match mt.raw_get::<Value>("__metatable")? {
                    Value::Nil => Ok(Value::Table(mt)),
                    guard => Ok(guard),
                };
            }
        }
        builtin.call::<Value>(value)
    })?;
    globals.set("getmetatable", wrapper)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn block(lua: &Lua, size: usize, finalizers: &Finalizers) -> AnyUserData {
        lua.create_userdata(HostBlock::new(size, finalizers)).unwrap()
    }

    /// Block with a host metatable built by `setup`.
    fn block_with(lua: &Lua, finalizers: &Finalizers, setup: &str) -> AnyUserData {
        let ud = block(lua, 8, finalizers);
        let mt: Table = lua.load(setup).eval().unwrap();
        ud.borrow::<HostBlock>().unwrap().set_metatable(Some(mt));
        ud
    }

    #[test]
    fn blocks_are_zeroed_and_stable() {
        let block = HostBlock::new(16, &Finalizers::default());
        assert_eq!(block.len(), 16);
        let ptr = block.data_ptr() as *const u8;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 16) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(block.data_ptr(), block.data_ptr());
    }

    #[test]
    fn writes_through_the_address_survive_later_accesses() {
        let block = HostBlock::new(4, &Finalizers::default());
        let ptr = block.data_ptr().cast::<u8>();
        unsafe { ptr.add(2).write(0xab) };
        assert_eq!(block.len(), 4);
        let again = block.data_ptr().cast::<u8>();
        assert_eq!(unsafe { again.add(2).read() }, 0xab);
        assert_eq!(unsafe { again.read() }, 0);
    }

    #[test]
    fn zero_sized_blocks_have_an_address() {
        let block = HostBlock::new(0, &Finalizers::default());
        assert_eq!(block.len(), 0);
        assert!(!block.data_ptr().is_null());
    }

    #[test]
    fn length_defaults_to_block_size() {
        let lua = Lua::new();
        lua.globals()
            .set("block", block(&lua, 24, &Finalizers::default()))
            .unwrap();
        let len: i64 = lua.load("return #block").eval().unwrap();
        assert_eq!(len, 24);
    }

    #[test]
    fn index_forwards_to_host_metatable() {
        let lua = Lua::new();
        let ud = block(&lua, 4, &Finalizers::default());

        let methods = lua.create_table().unwrap();
        methods
            .set(
                "size",
                lua.create_function(|_, ud: AnyUserData| Ok(ud.borrow::<HostBlock>()?.len()))
                    .unwrap(),
            )
            .unwrap();
        let mt = lua.create_table().unwrap();
        mt.set("__index", methods).unwrap();
        mt.set("__name", "Block").unwrap();
        ud.borrow::<HostBlock>().unwrap().set_metatable(Some(mt));

        lua.globals().set("block", ud).unwrap();
        let size: i64 = lua.load("return block:size()").eval().unwrap();
        assert_eq!(size, 4);
        let text: String = lua.load("return tostring(block)").eval().unwrap();
        assert!(text.starts_with("Block: "));
    }

    #[test]
    fn index_without_metatable_errors() {
        let lua = Lua::new();
        lua.globals()
            .set("block", block(&lua, 1, &Finalizers::default()))
            .unwrap();
        let err = lua.load("return block.x").exec().unwrap_err();
        assert!(err.to_string().contains("attempt to index a userdata value"));
    }

    // ========================================================================
    // Operators
    // ========================================================================

    #[test]
    fn comparisons_and_concat_forward_to_host_metatable() {
        let lua = Lua::new();
        let finalizers = Finalizers::default();
        let setup = "return {
            __eq = function(a, b) return true end,
            __lt = function(a, b) return false end,
            __le = function(a, b) return true end,
            __concat = function(a, b) return 'joined' end,
        }";
        lua.globals().set("a", block_with(&lua, &finalizers, setup)).unwrap();
        lua.globals().set("b", block_with(&lua, &finalizers, setup)).unwrap();

        let (eq, lt, le, joined): (bool, bool, bool, String) = lua
            .load("return a == b, a < b, a <= b, a .. 'x'")
            .eval()
            .unwrap();
        assert!(eq);
        assert!(!lt);
        assert!(le);
        assert_eq!(joined, "joined");
    }

    #[test]
    fn operators_without_metamethods() {
        let lua = Lua::new();
        let finalizers = Finalizers::default();
        lua.globals().set("a", block(&lua, 1, &finalizers)).unwrap();
        lua.globals().set("b", block(&lua, 1, &finalizers)).unwrap();

        let (same, different): (bool, bool) = lua.load("return a == a, a == b").eval().unwrap();
        assert!(same);
        assert!(!different);

        let err = lua.load("return a < b").exec().unwrap_err();
        assert!(err.to_string().contains("attempt to compare"), "{err}");
        let err = lua.load("return a .. 'x'").exec().unwrap_err();
        assert!(err.to_string().contains("attempt to concatenate"), "{err}");
    }

    #[test]
    fn getmetatable_sees_host_metatable() {
        let lua = Lua::new();
        install_getmetatable(&lua).unwrap();
        let finalizers = Finalizers::default();
        lua.globals()
            .set("named", block_with(&lua, &finalizers, "return { __name = 'Box' }"))
            .unwrap();
        lua.globals()
            .set(
                "locked",
                block_with(&lua, &finalizers, "return { __metatable = 'locked' }"),
            )
            .unwrap();
        lua.globals().set("bare", block(&lua, 1, &finalizers)).unwrap();

        let (name, locked, bare, plain): (String, String, bool, bool) = lua
            .load(
                "return getmetatable(named).__name, getmetatable(locked), \
                 getmetatable(bare) == nil, getmetatable(setmetatable({}, {})) ~= nil",
            )
            .eval()
            .unwrap();
        assert_eq!(name, "Box");
        assert_eq!(locked, "locked");
        assert!(bare);
        assert!(plain);
    }

    // ========================================================================
    // Finalizers
    // ========================================================================

    /// Metatable whose `__gc` records the address it was given.
    fn recording_metatable(lua: &Lua, seen: &Rc<Cell<usize>>) -> Table {
        let seen = Rc::clone(seen);
        let gc = lua
            .create_function(move |_, ptr: Value| {
                if let Value::LightUserData(ptr) = ptr {
                    seen.set(ptr.0 as usize);
                }
                Ok(())
            })
            .unwrap();
        let mt = lua.create_table().unwrap();
        mt.set("__gc", gc).unwrap();
        mt
    }

    #[test]
    fn collected_block_runs_finalizer_once() {
        let lua = Lua::new();
        let finalizers = Finalizers::default();
        let seen = Rc::new(Cell::new(0));

        let ud = block(&lua, 8, &finalizers);
        let address = {
            let block = ud.borrow::<HostBlock>().unwrap();
            block.set_metatable(Some(recording_metatable(&lua, &seen)));
            block.data_ptr() as usize
        };
        assert_eq!(finalizers.armed(), 1);

        drop(ud);
        lua.gc_collect().unwrap();
        lua.gc_collect().unwrap();
        assert_eq!(seen.get(), address);
        assert_eq!(finalizers.armed(), 0);
    }

    #[test]
    fn gc_added_after_setmetatable_is_ignored() {
        let lua = Lua::new();
        let finalizers = Finalizers::default();
        let seen = Rc::new(Cell::new(0));

        let ud = block(&lua, 8, &finalizers);
        let mt = lua.create_table().unwrap();
        ud.borrow::<HostBlock>().unwrap().set_metatable(Some(mt.clone()));
        let armed = recording_metatable(&lua, &seen);
        mt.set("__gc", armed.get::<Function>("__gc").unwrap()).unwrap();
        assert_eq!(finalizers.armed(), 0);

        drop(ud);
        lua.gc_collect().unwrap();
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn run_all_drains_armed_finalizers() {
        let lua = Lua::new();
        let finalizers = Finalizers::default();
        let seen = Rc::new(Cell::new(0));

        let ud = block(&lua, 8, &finalizers);
        ud.borrow::<HostBlock>()
            .unwrap()
            .set_metatable(Some(recording_metatable(&lua, &seen)));
        finalizers.run_all();
        assert_ne!(seen.get(), 0);

        // Collection afterwards does not run it again.
        seen.set(0);
        drop(ud);
        lua.gc_collect().unwrap();
        assert_eq!(seen.get(), 0);
    }
}
