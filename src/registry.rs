//! The thread's live instances, addressed by generational handle.
//!
//! Handles are thread-affine: an instance created on one thread is unknown
//! on every other thread, and using its handle there reports
//! [`Status::ErrHandle`](hostlua_core::Status::ErrHandle) like any stale
//! handle.
//!
//! Lookups hand out a cloned `Rc` and release the arena immediately, so a
//! host callback may create or close instances while the engine is running.

use std::cell::RefCell;
use std::rc::Rc;

use hostlua_core::{EngineHandle, HandleArena};

use crate::engine::Instance;

thread_local! {
    static INSTANCES: RefCell<HandleArena<Rc<Instance>>> = RefCell::new(HandleArena::new());
}

/// Register a new instance and return its handle.
pub(crate) fn register(instance: Instance) -> EngineHandle {
    let instance = Rc::new(instance);
    let handle = INSTANCES.with(|arena| arena.borrow_mut().insert(Rc::clone(&instance)));
    instance.set_handle(handle);
    tracing::debug!(%handle, "instance registered");
    handle
}

pub(crate) fn lookup(handle: EngineHandle) -> Option<Rc<Instance>> {
    if handle.is_null() {
        return None;
    }
    INSTANCES
        .try_with(|arena| arena.borrow().get(handle).cloned())
        .ok()
        .flatten()
}

/// Remove an instance. The state is closed when the last `Rc` drops.
pub(crate) fn retire(handle: EngineHandle) -> Option<Rc<Instance>> {
    let removed = INSTANCES
        .try_with(|arena| arena.borrow_mut().remove(handle))
        .ok()
        .flatten();
    if removed.is_some() {
        tracing::debug!(%handle, "instance retired");
    }
    removed
}

/// Number of live instances on this thread.
pub fn live_instances() -> usize {
    INSTANCES.try_with(|arena| arena.borrow().len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn register_lookup_retire() {
        let before = live_instances();
        let handle = register(Instance::new(EngineConfig::default()).unwrap());
        assert_eq!(live_instances(), before + 1);

        let instance = lookup(handle).unwrap();
        assert_eq!(instance.handle(), handle);
        drop(instance);

        assert!(retire(handle).is_some());
        assert!(lookup(handle).is_none());
        assert!(retire(handle).is_none());
        assert_eq!(live_instances(), before);
    }

    #[test]
    fn reused_slot_gets_new_handle() {
        let first = register(Instance::new(EngineConfig::default()).unwrap());
        retire(first);
        let second = register(Instance::new(EngineConfig::default()).unwrap());
        assert_ne!(first, second);
        assert!(lookup(first).is_none());
        assert!(lookup(second).is_some());
        retire(second);
    }

    #[test]
    fn null_handle_is_unknown() {
        assert!(lookup(EngineHandle::NULL).is_none());
    }
}
