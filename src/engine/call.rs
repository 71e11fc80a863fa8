//! Loading chunks, calling values, host closures and error raising.
//!
//! # Raising
//!
//! An engine error that reaches the boundary is *raised*:
//!
//! - inside a host closure frame it is recorded on the frame and rethrown
//!   into the engine once the closure returns, so the host's callback sees a
//!   failure status and should return promptly;
//! - at top level (no frame) there is nothing to unwind into: the error
//!   message is pushed, the panic hook runs and the instance is retired.
//!   Its handle is stale afterwards.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use hostlua_core::{EngineHandle, HookEvent, HookFn, HookMask, HostFn, MULTRET, Outcome, Status, boundary};
use mlua::{ChunkMode, HookTriggers, MultiValue, Value, VmState};

use super::stack::Upvalues;
use super::userdata;
use super::{Instance, kind_of};
use crate::error::{BridgeError, message_of, status_of};
use crate::registry;

/// Engine error carrying the value a host closure raised. Values other
/// than strings and numbers are described by type; the object itself does
/// not survive the trip through a Rust callback.
fn error_from_value(value: &Value) -> mlua::Error {
    let message = match value {
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("(error object is a {} value)", kind_of(other).type_name()),
    };
    mlua::Error::runtime(message)
}

/// Body of every host closure: open a frame, run the host function, close
/// the frame and hand its results (or its error) back to the engine.
fn invoke_host(
    handle: EngineHandle,
    callback: HostFn,
    id: i64,
    upvalues: &Upvalues,
    args: MultiValue,
) -> mlua::Result<MultiValue> {
    let instance = registry::lookup(handle)
        .ok_or_else(|| mlua::Error::runtime(format!("engine instance {handle} is closed")))?;

    let function = instance.closures.function(id);
    instance
        .stack
        .borrow_mut()
        .push_frame(args.into_iter().collect(), Rc::clone(upvalues), function)
        .map_err(|err| mlua::Error::runtime(err.to_string()))?;

    // SAFETY: the host registered `callback` for this instance through
    // `pushcclosure`; it receives the instance's own handle.
    let returned = unsafe { callback(handle) };

    let frame = instance.stack.borrow_mut().pop_frame();
    if let Some(err) = frame.pending {
        return Err(err);
    }

    let mut values = frame.values;
    if returned < 0 {
        let raised = values.pop().unwrap_or(Value::Nil);
        return Err(error_from_value(&raised));
    }

    let wanted = returned as usize;
    if wanted > values.len() {
        return Err(mlua::Error::runtime(format!(
            "host function returned {wanted} results but its frame holds {}",
            values.len()
        )));
    }
    let results = values.split_off(values.len() - wanted);
    Ok(results.into_iter().collect())
}

impl Instance {
    // ========================================================================
    // Raising
    // ========================================================================

    /// Raise an engine error, see the module docs.
    pub(crate) fn raise<T>(&self, err: mlua::Error) -> Outcome<T> {
        let status = status_of(&err);
        let message = message_of(&err);

        if self.depth() > 0 {
            tracing::debug!(handle = %self.handle(), ?status, %message, "error raised into host frame");
            boundary::set_last_error(status, message);
            self.stack.borrow_mut().set_pending(err);
            return Outcome::Failure(status);
        }

        self.fatal(message)
    }

    fn fatal<T>(&self, message: String) -> Outcome<T> {
        let handle = self.handle();
        tracing::error!(%handle, %message, "unprotected error, closing instance");

        if let Ok(s) = self.lua.create_string(&message) {
            let _ = self.push(Value::String(s));
        }
        if let Some(hook) = self.panic_hook() {
            // SAFETY: installed by the host through `atpanic` for this
            // instance. The handle is still live while the hook runs.
            unsafe { hook(handle) };
        }
        // The caller holds its own `Rc`, so the state survives until it
        // returns.
        drop(registry::retire(handle));

        boundary::set_last_error(Status::ErrFatal, message.clone());
        Outcome::Fatal(message)
    }

    /// Route a failed operation: engine errors are raised, boundary errors
    /// are reported. Returns the status for the host.
    pub(crate) fn fail(&self, err: BridgeError) -> Status {
        match err {
            BridgeError::Lua(err) => self.raise::<()>(err).status(),
            err => {
                let status = err.status();
                tracing::warn!(handle = %self.handle(), ?status, error = %err, "boundary call failed");
                boundary::set_last_error(status, err.to_string());
                status
            }
        }
    }

    // ========================================================================
    // Host closures
    // ========================================================================

    /// Pop `n` upvalues and push a closure running `callback`.
    pub fn push_host_closure(&self, callback: HostFn, n: i32) -> Result<(), BridgeError> {
        let n = usize::try_from(n)
            .map_err(|_| BridgeError::Argument(format!("negative upvalue count {n}")))?;
        let upvalues: Upvalues = Rc::new(RefCell::new(self.pop_n(n)?));
        let handle = self.handle();
        let id = self.closures.next_id();
        let captured = Rc::clone(&upvalues);
        let function = self.lua.create_function(move |_, args: MultiValue| {
            invoke_host(handle, callback, id, &captured, args)
        })?;
        self.closures.track(&self.lua, id, &function, &upvalues)?;
        self.push(Value::Function(function))
    }

    /// Push the host closure whose frame is running, or nil at top level.
    pub fn push_current_function(&self) -> Result<(), BridgeError> {
        let function = self.stack.borrow().current_function();
        self.push(function.map_or(Value::Nil, Value::Function))
    }

    /// Pop a function and return its upvalue count. Only host closures
    /// expose upvalues; script functions report none.
    pub fn pop_upvalue_count(&self) -> Result<usize, BridgeError> {
        let value = self.value_at(-1)?;
        if !matches!(value, Value::Function(_)) {
            return Err(BridgeError::TypeMismatch {
                expected: "function",
                found: kind_of(&value).type_name(),
            });
        }
        self.pop()?;
        Ok(self
            .closures
            .upvalues_of(&value)
            .map_or(0, |upvalues| upvalues.borrow().len()))
    }

    /// Push upvalue `n` (1-based) of the host closure at `funcindex`.
    /// False, with nothing pushed, when there is no such upvalue.
    pub fn push_upvalue(&self, funcindex: i32, n: i32) -> Result<bool, BridgeError> {
        let function = self.value_at(funcindex)?;
        let Some(upvalues) = self.closures.upvalues_of(&function) else {
            return Ok(false);
        };
        let value = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| upvalues.borrow().get(i).cloned());
        match value {
            Some(value) => {
                self.push(value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Compile a chunk and push it, or push the error message.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load(&self, source: &[u8], chunk_name: &str) -> Result<Status, BridgeError> {
        let loaded = self
            .lua
            .load(source.to_vec())
            .set_name(chunk_name)
            .set_mode(ChunkMode::Text)
            .into_function();

        match loaded {
            Ok(function) => {
                self.push(Value::Function(function))?;
                Ok(Status::Ok)
            }
            Err(err) => {
                let status = status_of(&err);
                tracing::debug!(handle = %self.handle(), chunk = chunk_name, ?status, "chunk rejected");
                self.push_string(message_of(&err).as_bytes())?;
                Ok(status)
            }
        }
    }

    pub fn load_file(&self, path: &Path) -> Result<Status, BridgeError> {
        match std::fs::read(path) {
            Ok(source) => self.load(&source, &format!("@{}", path.display())),
            Err(source) => {
                let err = BridgeError::File {
                    path: path.display().to_string(),
                    source,
                };
                self.push_string(err.to_string().as_bytes())?;
                Ok(Status::ErrFile)
            }
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Pop the callee and its `nargs` arguments.
    fn take_call(&self, nargs: i32, nresults: i32) -> Result<(Value, MultiValue), BridgeError> {
        if nresults < MULTRET {
            return Err(BridgeError::Argument(format!("invalid result count {nresults}")));
        }
        let nargs = usize::try_from(nargs)
            .map_err(|_| BridgeError::Argument(format!("negative argument count {nargs}")))?;
        // Fixed result counts are checked before the callee runs.
        if let Ok(wanted) = usize::try_from(nresults) {
            self.stack
                .borrow()
                .ensure_room(wanted.saturating_sub(nargs.saturating_add(1)))?;
        }
        let mut values = self.pop_n(nargs + 1)?.into_iter();
        let callee = values.next().unwrap_or(Value::Nil);
        Ok((callee, values.collect()))
    }

    /// Call a value, honoring `__call` on tables and blocks.
    pub(crate) fn invoke(&self, callee: Value, args: MultiValue) -> mlua::Result<MultiValue> {
        match callee {
            Value::Function(f) => f.call::<MultiValue>(args),
            Value::Table(ref t) => match t.metatable().map(|mt| mt.raw_get::<Value>("__call")) {
                Some(Ok(Value::Function(f))) => {
                    let mut call_args = MultiValue::new();
                    call_args.push_back(callee.clone());
                    call_args.extend(args);
                    f.call::<MultiValue>(call_args)
                }
                _ => Err(mlua::Error::runtime("attempt to call a table value")),
            },
            Value::UserData(ud) => userdata::call(ud, args),
            other => Err(mlua::Error::runtime(format!(
                "attempt to call a {} value",
                kind_of(&other).type_name()
            ))),
        }
    }

    /// Push `nresults` results (all of them for `MULTRET`), padding with
    /// nil. Nothing is pushed when they do not fit.
    fn push_results(&self, results: MultiValue, nresults: i32) -> Result<(), BridgeError> {
        let wanted = usize::try_from(nresults).unwrap_or(results.len());
        self.stack.borrow().ensure_room(wanted)?;
        let mut results = results.into_iter();
        for _ in 0..wanted {
            self.push(results.next().unwrap_or(Value::Nil))?;
        }
        Ok(())
    }

    /// Unprotected call. An error is raised, see the module docs.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, nargs: i32, nresults: i32) -> Result<Outcome<()>, BridgeError> {
        let (callee, args) = self.take_call(nargs, nresults)?;
        match self.invoke(callee, args) {
            Ok(results) => {
                self.push_results(results, nresults)?;
                Ok(Outcome::Ok(()))
            }
            Err(err) => Ok(self.raise(err)),
        }
    }

    /// Protected call. On failure the error message (after the handler at
    /// `msgh`, if non-zero) is pushed and the status returned.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn pcall(&self, nargs: i32, nresults: i32, msgh: i32) -> Result<Status, BridgeError> {
        let handler = match msgh {
            0 => None,
            index => Some(self.value_at(index)?),
        };
        let (callee, args) = self.take_call(nargs, nresults)?;

        let err = match self.invoke(callee, args) {
            Ok(results) => {
                self.push_results(results, nresults)?;
                return Ok(Status::Ok);
            }
            Err(err) => err,
        };

        let mut status = status_of(&err);
        let mut error_value = Value::String(self.lua.create_string(message_of(&err))?);

        if let Some(handler) = handler.filter(|_| status == Status::ErrRun) {
            let mut handler_args = MultiValue::new();
            handler_args.push_back(error_value.clone());
            match self.invoke(handler, handler_args) {
                Ok(mut handled) => error_value = handled.pop_front().unwrap_or(Value::Nil),
                Err(handler_err) => {
                    status = Status::ErrErr;
                    error_value = Value::String(self.lua.create_string(message_of(&handler_err))?);
                }
            }
        }

        tracing::debug!(handle = %self.handle(), ?status, "protected call failed");
        self.push(error_value)?;
        Ok(status)
    }

    /// Pop the top value and raise it.
    pub fn error(&self) -> Result<Outcome<()>, BridgeError> {
        let value = self.pop()?;
        Ok(self.raise(error_from_value(&value)))
    }

    // ========================================================================
    // Debug hooks
    // ========================================================================

    /// Install or clear the debug hook. Hooks observe execution only.
    pub fn set_hook(&self, callback: Option<HookFn>, mask: HookMask, count: i32) {
        let callback = callback.filter(|_| !mask.is_empty());
        let Some(hook) = callback else {
            self.lua.remove_hook();
            self.hook_mask.set(HookMask::empty());
            return;
        };

        let mut triggers = HookTriggers::default();
        triggers.on_calls = mask.contains(HookMask::CALL);
        triggers.on_returns = mask.contains(HookMask::RET);
        triggers.every_line = mask.contains(HookMask::LINE);
        if mask.contains(HookMask::COUNT) && count > 0 {
            triggers.every_nth_instruction = Some(count as u32);
        }

        let handle = self.handle();
        let _ = self.lua.set_hook(triggers, move |_, debug| {
            let event = match debug.event() {
                mlua::DebugEvent::Call => HookEvent::Call,
                mlua::DebugEvent::Ret => HookEvent::Return,
                mlua::DebugEvent::TailCall => HookEvent::TailCall,
                mlua::DebugEvent::Line => HookEvent::Line,
                _ => HookEvent::Count,
            };
            let line = debug.curr_line();
            // SAFETY: installed by the host through `sethook`.
            unsafe { hook(handle, event.into(), line) };
            Ok(VmState::Continue)
        });

        self.hook_mask.set(mask);
    }
}
