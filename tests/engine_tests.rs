//! Integration tests driving an instance through the exported functions:
//! loading and running chunks, the value stack, tables and userdata.

use std::ffi::{CStr, c_void};
use std::path::PathBuf;

use hostlua::*;

fn s(c: &'static CStr) -> StrRef {
    StrRef::from_static(c)
}

fn read(ptr: StrRef) -> String {
    assert!(!ptr.is_null(), "expected a string, got null");
    unsafe { CStr::from_ptr(ptr.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Owns an instance for the duration of a test.
struct State(EngineHandle);

impl State {
    fn new() -> Self {
        let handle = hostlua_newstate();
        assert!(!handle.is_null());
        Self(handle)
    }

    fn with_libs() -> Self {
        let state = Self::new();
        assert_eq!(hostlua_openlibs(state.0), Status::Ok.code());
        state
    }

    fn run(&self, code: &'static CStr, nresults: i32) -> i32 {
        let status = unsafe { hostlua_loadstring(self.0, s(code)) };
        if status != Status::Ok.code() {
            return status;
        }
        hostlua_pcall(self.0, 0, nresults, 0)
    }

    fn integer(&self, index: i32) -> i64 {
        let mut ok = 0;
        let value = unsafe { hostlua_tointegerx(self.0, index, &mut ok) };
        assert_eq!(ok, 1, "value at {index} is not an integer");
        value
    }

    fn string(&self, index: i32) -> String {
        read(hostlua_tostring(self.0, index))
    }
}

impl Drop for State {
    fn drop(&mut self) {
        hostlua_close(self.0);
    }
}

fn load_script(filename: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test_scripts")
        .join(filename)
}

// =============================================================================
// Loading and running
// =============================================================================

#[test]
fn test_return_one_plus_one() {
    let state = State::new();
    assert_eq!(
        unsafe { hostlua_loadstring(state.0, s(c"return 1+1")) },
        Status::Ok.code()
    );
    assert_eq!(hostlua_type(state.0, -1), ValueKind::Function.code());
    assert_eq!(hostlua_pcall(state.0, 0, 1, 0), Status::Ok.code());
    assert_eq!(hostlua_isinteger(state.0, -1), 1);
    assert_eq!(state.integer(-1), 2);
}

#[test]
fn test_syntax_error_then_valid_load() {
    let state = State::new();
    assert_eq!(
        unsafe { hostlua_loadstring(state.0, s(c"return +")) },
        Status::ErrSyntax.code()
    );
    assert_eq!(hostlua_type(state.0, -1), ValueKind::String.code());
    assert!(!state.string(-1).is_empty());
    hostlua_pop(state.0, 1);

    assert_eq!(state.run(c"return 40 + 2", 1), Status::Ok.code());
    assert_eq!(state.integer(-1), 42);
}

#[test]
fn test_runtime_error_is_caught() {
    let state = State::new();
    assert_eq!(state.run(c"error('nope')", 0), Status::ErrRun.code());
    assert!(state.string(-1).contains("nope"));

    // The instance keeps working afterwards.
    assert_eq!(state.run(c"return 'still here'", 1), Status::Ok.code());
    assert_eq!(state.string(-1), "still here");
}

#[test]
fn test_call_with_arguments_and_multret() {
    let state = State::new();
    assert_eq!(
        state.run(c"return function(a, b) return a + b, a * b end", 1),
        Status::Ok.code()
    );
    hostlua_pushinteger(state.0, 6);
    hostlua_pushinteger(state.0, 7);
    assert_eq!(hostlua_pcall(state.0, 2, MULTRET, 0), Status::Ok.code());
    assert_eq!(hostlua_gettop(state.0), 2);
    assert_eq!(state.integer(1), 13);
    assert_eq!(state.integer(2), 42);
}

#[test]
fn test_unprotected_call_succeeds() {
    let state = State::new();
    unsafe { hostlua_loadstring(state.0, s(c"return 5")) };
    assert_eq!(hostlua_call(state.0, 0, 1), Status::Ok.code());
    assert_eq!(state.integer(-1), 5);
}

#[test]
fn test_loadbuffer_names_chunk() {
    let state = State::new();
    let code = b"error('where')";
    let status = unsafe {
        hostlua_loadbuffer(state.0, code.as_ptr(), code.len() as i64, s(c"=my_chunk"))
    };
    assert_eq!(status, Status::Ok.code());
    assert_eq!(hostlua_pcall(state.0, 0, 0, 0), Status::ErrRun.code());
    assert!(state.string(-1).starts_with("my_chunk:1:"), "{}", state.string(-1));
}

#[test]
fn test_binary_chunks_are_rejected() {
    let state = State::new();
    let code = b"\x1bLua\x54\x00";
    let status = unsafe {
        hostlua_loadbuffer(state.0, code.as_ptr(), code.len() as i64, StrRef::null())
    };
    assert_ne!(status, Status::Ok.code());
}

#[test]
fn test_loadfile() {
    let state = State::with_libs();
    let path = std::ffi::CString::new(load_script("answer.lua").to_str().unwrap()).unwrap();
    let status = unsafe { hostlua_loadfile(state.0, StrRef::from_ptr(path.as_ptr())) };
    assert_eq!(status, Status::Ok.code());
    assert_eq!(hostlua_pcall(state.0, 0, 1, 0), Status::Ok.code());
    assert_eq!(state.integer(-1), 42);

    let status = unsafe { hostlua_loadfile(state.0, s(c"/no/such/file.lua")) };
    assert_eq!(status, Status::ErrFile.code());
}

#[test]
fn test_message_handler() {
    let state = State::new();
    state.run(c"return function(m) return 'handled' end", 1);
    unsafe { hostlua_loadstring(state.0, s(c"error('x')")) };
    assert_eq!(hostlua_pcall(state.0, 0, 0, 1), Status::ErrRun.code());
    assert_eq!(state.string(-1), "handled");
}

// =============================================================================
// Value stack
// =============================================================================

#[test]
fn test_stack_manipulation() {
    let state = State::new();
    for n in 1..=4 {
        hostlua_pushinteger(state.0, n);
    }
    assert_eq!(hostlua_gettop(state.0), 4);
    assert_eq!(hostlua_absindex(state.0, -1), 4);

    hostlua_insert(state.0, 1); // 4 1 2 3
    assert_eq!(state.integer(1), 4);

    hostlua_remove(state.0, 2); // 4 2 3
    assert_eq!(hostlua_gettop(state.0), 3);
    assert_eq!(state.integer(2), 2);

    hostlua_pushvalue(state.0, 1); // 4 2 3 4
    hostlua_replace(state.0, 2); // 4 4 3
    assert_eq!(state.integer(2), 4);

    hostlua_settop(state.0, 5);
    assert_eq!(hostlua_isnil(state.0, 5), 1);
    hostlua_pop(state.0, 4);
    assert_eq!(hostlua_gettop(state.0), 1);
}

#[test]
fn test_bad_index_is_reported() {
    let state = State::new();
    hostlua_pushvalue(state.0, 3);
    assert_eq!(hostlua_last_error(), Status::ErrIndex.code());
    assert_eq!(hostlua_gettop(state.0), 0);

    assert_eq!(hostlua_type(state.0, 3), ValueKind::None.code());
    assert_eq!(hostlua_isnone(state.0, 3), 1);
    assert_eq!(hostlua_isnoneornil(state.0, 3), 1);
}

#[test]
fn test_stack_limit() {
    let state = State::new();
    hostlua_settop(state.0, MAX_STACK_SLOTS as i32);
    assert_eq!(hostlua_last_error(), Status::Ok.code());
    hostlua_pushnil(state.0);
    assert_eq!(hostlua_last_error(), Status::ErrIndex.code());
    assert_eq!(hostlua_gettop(state.0), MAX_STACK_SLOTS as i32);
    hostlua_settop(state.0, 0);
}

#[test]
fn test_oversized_result_count_leaves_stack_intact() {
    let state = State::new();
    unsafe { hostlua_loadstring(state.0, s(c"return 1")) };
    for nresults in [1_500_000, i32::MAX] {
        assert_eq!(
            hostlua_pcall(state.0, 0, nresults, 0),
            Status::ErrIndex.code()
        );
        assert_eq!(hostlua_gettop(state.0), 1);
    }
    assert_eq!(hostlua_pcall(state.0, 0, 1, 0), Status::Ok.code());
    assert_eq!(state.integer(-1), 1);
}

#[test]
fn test_upvalueindex_rejects_out_of_range() {
    assert_eq!(hostlua_upvalueindex(1), REGISTRY_INDEX - 1);
    assert_eq!(hostlua_last_error(), Status::Ok.code());
    for n in [0, -1, i32::MAX, i32::MIN] {
        assert_eq!(hostlua_upvalueindex(n), 0, "{n}");
        assert_eq!(hostlua_last_error(), Status::ErrArg.code());
    }
}

#[test]
fn test_conversions() {
    let state = State::new();
    hostlua_pushnumber(state.0, 2.5);
    hostlua_pushinteger(state.0, 10);
    unsafe { hostlua_pushstring(state.0, s(c"0x10")) };
    hostlua_pushboolean(state.0, 0);

    let mut ok = -1;
    assert_eq!(unsafe { hostlua_tonumberx(state.0, 1, &mut ok) }, 2.5);
    assert_eq!(ok, 1);
    assert_eq!(unsafe { hostlua_tointegerx(state.0, 1, &mut ok) }, 0);
    assert_eq!(ok, 0);
    assert_eq!(state.integer(3), 16);
    assert_eq!(hostlua_isnumber(state.0, 3), 1);
    assert_eq!(hostlua_isstring(state.0, 2), 1);
    assert_eq!(hostlua_toboolean(state.0, 4), 0);
    assert_eq!(hostlua_toboolean(state.0, 2), 1);

    // tostring converts the number in place.
    assert_eq!(state.string(2), "10");
    assert_eq!(hostlua_type(state.0, 2), ValueKind::String.code());
    assert!(hostlua_tostring(state.0, 4).is_null());
}

#[test]
fn test_strings_with_embedded_nul() {
    let state = State::new();
    let bytes = b"a\0b";
    let copy = unsafe { hostlua_pushlstring(state.0, bytes.as_ptr(), 3) };
    assert!(!copy.is_null());

    let mut len = 0i64;
    let ptr = unsafe { hostlua_tolstring(state.0, -1, &mut len) };
    assert_eq!(len, 3);
    let round = unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<u8>(), 3) };
    assert_eq!(round, bytes);
    assert_eq!(hostlua_rawlen(state.0, -1), 3);
}

#[test]
fn test_typenames() {
    let state = State::new();
    assert_eq!(read(hostlua_typename(state.0, ValueKind::Table.code())), "table");
    assert_eq!(read(hostlua_typename(state.0, ValueKind::None.code())), "no value");
    assert!(hostlua_typename(state.0, 99).is_null());
}

#[test]
fn test_light_userdata_and_pointers() {
    let state = State::new();
    let mut target = 5u32;
    let p = (&mut target as *mut u32).cast::<c_void>();
    hostlua_pushlightuserdata(state.0, p);
    assert_eq!(hostlua_islightuserdata(state.0, -1), 1);
    assert_eq!(hostlua_isuserdata(state.0, -1), 1);
    assert_eq!(hostlua_touserdata(state.0, -1), p);

    hostlua_newtable(state.0);
    hostlua_pushvalue(state.0, -1);
    assert_eq!(hostlua_rawequal(state.0, -1, -2), 1);
    assert_eq!(hostlua_topointer(state.0, -1), hostlua_topointer(state.0, -2));
    assert!(!hostlua_topointer(state.0, -1).is_null());
}

// =============================================================================
// Tables and globals
// =============================================================================

#[test]
fn test_fields_and_globals() {
    let state = State::new();
    hostlua_newtable(state.0);
    hostlua_pushinteger(state.0, 3);
    unsafe { hostlua_setfield(state.0, -2, s(c"x")) };
    unsafe { hostlua_setglobal(state.0, s(c"point")) };
    assert_eq!(hostlua_gettop(state.0), 0);

    assert_eq!(state.run(c"return point.x * 2", 1), Status::Ok.code());
    assert_eq!(state.integer(-1), 6);

    assert_eq!(
        unsafe { hostlua_getglobal(state.0, s(c"point")) },
        ValueKind::Table.code()
    );
    assert_eq!(
        unsafe { hostlua_getfield(state.0, -1, s(c"x")) },
        ValueKind::Number.code()
    );
    assert_eq!(state.integer(-1), 3);
}

#[test]
fn test_gettable_honors_metamethods() {
    let state = State::new();
    state.run(
        c"return setmetatable({}, { __index = function(_, k) return k .. '!' end })",
        1,
    );
    unsafe { hostlua_pushstring(state.0, s(c"hi")) };
    assert_eq!(hostlua_gettable(state.0, 1), ValueKind::String.code());
    assert_eq!(state.string(-1), "hi!");

    unsafe { hostlua_pushstring(state.0, s(c"hi")) };
    assert_eq!(hostlua_rawget(state.0, 1), ValueKind::Nil.code());
}

#[test]
fn test_raw_sequence() {
    let state = State::new();
    hostlua_newtable(state.0);
    for n in 1..=5 {
        hostlua_pushinteger(state.0, n * n);
        hostlua_rawseti(state.0, 1, n);
    }
    assert_eq!(hostlua_rawlen(state.0, 1), 5);
    assert_eq!(hostlua_rawgeti(state.0, 1, 4), ValueKind::Number.code());
    assert_eq!(state.integer(-1), 16);

    hostlua_pushinteger(state.0, 1);
    unsafe { hostlua_pushstring(state.0, s(c"one")) };
    hostlua_settable(state.0, 1);
    hostlua_pushinteger(state.0, 1);
    hostlua_gettable(state.0, 1);
    assert_eq!(state.string(-1), "one");
}

#[test]
fn test_registry_and_global_table() {
    let state = State::new();
    let registry = constant_entries()
        .into_iter()
        .find(|c| c.name == "registryindex")
        .unwrap()
        .value as i32;
    assert_eq!(hostlua_istable(state.0, registry), 1);

    hostlua_pushglobaltable(state.0);
    unsafe { hostlua_getfield(state.0, -1, s(c"print")) };
    assert_eq!(hostlua_isfunction(state.0, -1), 1);
    assert_eq!(hostlua_iscfunction(state.0, -1), 1);
}

#[test]
fn test_libraries_follow_config() {
    let bare = State::new();
    assert_eq!(bare.run(c"return string", 1), Status::Ok.code());
    assert_eq!(hostlua_isnil(bare.0, -1), 1);

    let with_string = hostlua_newstate_with(LibFlags::STRING.bits(), 0);
    assert!(!with_string.is_null());
    unsafe { hostlua_loadstring(with_string, s(c"return string.upper('abc')")) };
    assert_eq!(hostlua_pcall(with_string, 0, 1, 0), Status::Ok.code());
    assert_eq!(read(hostlua_tostring(with_string, -1)), "ABC");
    hostlua_close(with_string);

    let opened = State::with_libs();
    assert_eq!(opened.run(c"return math.max(1, 9)", 1), Status::Ok.code());
    assert_eq!(opened.integer(-1), 9);
}

// =============================================================================
// Metatables and userdata
// =============================================================================

#[test]
fn test_userdata_with_named_metatable() {
    let state = State::new();
    let block = hostlua_newuserdata(state.0, 16).cast::<u8>();
    assert!(!block.is_null());
    unsafe { block.write(9) };

    assert_eq!(unsafe { hostlua_newmetatable(state.0, s(c"Buffer")) }, 1);
    assert_eq!(unsafe { hostlua_newmetatable(state.0, s(c"Buffer")) }, 0);
    hostlua_pop(state.0, 1);
    assert_eq!(hostlua_setmetatable(state.0, 1), 1);
    assert_eq!(hostlua_gettop(state.0), 1);

    let found = unsafe { hostlua_testudata(state.0, 1, s(c"Buffer")) };
    assert_eq!(found.cast::<u8>(), block);
    assert_eq!(unsafe { found.cast::<u8>().read() }, 9);
    assert!(unsafe { hostlua_testudata(state.0, 1, s(c"Other")) }.is_null());
    assert_eq!(hostlua_rawlen(state.0, 1), 16);

    assert_eq!(hostlua_getmetatable(state.0, 1), 1);
    unsafe { hostlua_getfield(state.0, -1, s(c"__name")) };
    assert_eq!(state.string(-1), "Buffer");
}

#[test]
fn test_userdata_metamethods_reach_scripts() {
    let state = State::new();
    hostlua_newuserdata(state.0, 4);
    unsafe { hostlua_newmetatable(state.0, s(c"Box")) };
    state.run(c"return { kind = 'box' }", 1);
    unsafe { hostlua_setfield(state.0, -2, s(c"__index")) };
    hostlua_setmetatable(state.0, 1);
    unsafe { hostlua_setglobal(state.0, s(c"b")) };

    assert_eq!(state.run(c"return b.kind, #b", 2), Status::Ok.code());
    assert_eq!(state.string(-2), "box");
    assert_eq!(state.integer(-1), 4);
}

#[test]
fn test_scripts_see_userdata_metatable() {
    let state = State::new();
    hostlua_newuserdata(state.0, 4);
    unsafe { hostlua_newmetatable(state.0, s(c"Box")) };
    hostlua_setmetatable(state.0, 1);
    unsafe { hostlua_setglobal(state.0, s(c"b")) };

    assert_eq!(state.run(c"return getmetatable(b).__name", 1), Status::Ok.code());
    assert_eq!(state.string(-1), "Box");
}

#[test]
fn test_userdata_comparison_and_concat_metamethods() {
    let state = State::new();
    assert_eq!(
        state.run(
            c"return {
                __eq = function(a, b) return true end,
                __lt = function(a, b) return false end,
                __le = function(a, b) return true end,
                __concat = function(a, b) return 'joined' end,
            }",
            1
        ),
        Status::Ok.code()
    );
    for name in [c"a", c"b"] {
        hostlua_newuserdata(state.0, 1);
        hostlua_pushvalue(state.0, 1);
        hostlua_setmetatable(state.0, -2);
        unsafe { hostlua_setglobal(state.0, s(name)) };
    }

    assert_eq!(
        state.run(c"return a == b, a < b, a <= b, a .. 'x'", 4),
        Status::Ok.code()
    );
    assert_eq!(hostlua_toboolean(state.0, -4), 1);
    assert_eq!(hostlua_toboolean(state.0, -3), 0);
    assert_eq!(hostlua_toboolean(state.0, -2), 1);
    assert_eq!(state.string(-1), "joined");
}

#[test]
fn test_getnamedmetatable() {
    let state = State::new();
    assert_eq!(
        unsafe { hostlua_getnamedmetatable(state.0, s(c"Missing")) },
        ValueKind::Nil.code()
    );
    unsafe { hostlua_newmetatable(state.0, s(c"Present")) };
    assert_eq!(
        unsafe { hostlua_getnamedmetatable(state.0, s(c"Present")) },
        ValueKind::Table.code()
    );
    assert_eq!(hostlua_rawequal(state.0, -1, -2), 1);
}

#[test]
fn test_null_strings_are_argument_errors() {
    let state = State::new();
    hostlua_newtable(state.0);
    assert_eq!(
        unsafe { hostlua_getfield(state.0, 1, StrRef::null()) },
        -1
    );
    assert_eq!(hostlua_last_error(), Status::ErrArg.code());
    assert_eq!(
        unsafe { hostlua_loadstring(state.0, StrRef::null()) },
        Status::ErrArg.code()
    );
    assert!(unsafe { hostlua_pushstring(state.0, StrRef::null()) }.is_null());
    assert_eq!(hostlua_isnil(state.0, -1), 1);
}
