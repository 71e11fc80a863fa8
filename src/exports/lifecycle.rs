//! Creating, configuring and closing instances.

use hostlua_core::{EngineHandle, HostFn, Status, boundary};
use hostlua_macros::export;

use super::{report, report_stale, with_instance, with_instance_status};
use crate::config::EngineConfig;
use crate::engine::Instance;
use crate::error::BridgeError;
use crate::registry;

fn create(config: Result<EngineConfig, BridgeError>) -> EngineHandle {
    boundary::clear_last_error();
    match config.and_then(Instance::new) {
        Ok(instance) => registry::register(instance),
        Err(err) => {
            report(err);
            EngineHandle::NULL
        }
    }
}

/// New instance with only the base library. Null on failure.
#[export]
pub fn hostlua_newstate() -> EngineHandle {
    create(Ok(EngineConfig::default()))
}

/// New instance opening the `lib_*` flags in `libs`, limited to
/// `memory_limit` bytes (0 for unlimited).
#[export]
pub fn hostlua_newstate_with(libs: i32, memory_limit: i64) -> EngineHandle {
    create(EngineConfig::from_raw(libs, memory_limit))
}

/// Run pending `__gc` finalizers, retire the handle and release the
/// instance.
///
/// Closing from inside one of the instance's own callbacks is allowed; the
/// state is released once the engine unwinds back to the host.
#[export]
pub fn hostlua_close(state: EngineHandle) -> i32 {
    boundary::clear_last_error();
    let Some(instance) = registry::lookup(state) else {
        report_stale(state);
        return Status::ErrHandle.code();
    };
    // The handle stays live so finalizers may call host closures.
    instance.run_finalizers();
    drop(instance);
    drop(registry::retire(state));
    Status::Ok.code()
}

/// Open the safe standard libraries.
#[export]
pub fn hostlua_openlibs(state: EngineHandle) -> i32 {
    with_instance_status(state, |inst| inst.open_libs().map(|()| Status::Ok))
}

/// Install the hook called before an instance is closed by an unprotected
/// error. Returns the previous hook.
#[export]
pub fn hostlua_atpanic(state: EngineHandle, panicf: Option<HostFn>) -> Option<HostFn> {
    with_instance(state, |inst| Ok(inst.set_panic_hook(panicf)))
}

/// Run a full garbage collection cycle.
#[export]
pub fn hostlua_gc_collect(state: EngineHandle) -> i32 {
    with_instance_status(state, |inst| inst.collect_garbage().map(|()| Status::Ok))
}

/// Bytes currently allocated by the instance.
#[export]
pub fn hostlua_memory_used(state: EngineHandle) -> i64 {
    with_instance(state, |inst| Ok(inst.memory_used() as i64))
}
