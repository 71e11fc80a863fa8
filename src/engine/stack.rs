//! The explicit value stack owned by each engine instance.
//!
//! Values live in one `Vec`, partitioned into frames. The root frame belongs
//! to the host; every host closure invocation opens a new frame whose first
//! slots are the call arguments. Indices follow Lua's rules:
//!
//! - `1..=top` address the current frame from its base
//! - `-1..=-top` address it from the top
//! - [`REGISTRY_INDEX`] is the instance registry (resolved by the instance)
//! - `REGISTRY_INDEX - n` is upvalue `n` of the running host closure

use std::cell::RefCell;
use std::rc::Rc;

use hostlua_core::REGISTRY_INDEX;
use mlua::{Function, Value};

use crate::error::BridgeError;

/// Maximum number of slots across all frames.
pub const MAX_STACK_SLOTS: usize = 1_000_000;

/// Upvalues shared between a host closure and its active frames.
pub(crate) type Upvalues = Rc<RefCell<Vec<Value>>>;

/// A resolved index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Absolute position in the value vector.
    Stack(usize),
    Registry,
    /// Zero-based upvalue position.
    Upvalue(usize),
}

struct Frame {
    base: usize,
    upvalues: Upvalues,
    /// Running host closure; `None` for the root frame.
    function: Option<Function>,
    pending: Option<mlua::Error>,
}

/// What remains of a frame after it is closed.
pub(crate) struct ClosedFrame {
    pub values: Vec<Value>,
    pub pending: Option<mlua::Error>,
}

pub(crate) struct ValueStack {
    values: Vec<Value>,
    frames: Vec<Frame>,
}

impl ValueStack {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            frames: vec![Frame {
                base: 0,
                upvalues: Rc::default(),
                function: None,
                pending: None,
            }],
        }
    }

    fn frame(&self) -> &Frame {
        self.frames
            .last()
            .unwrap_or_else(|| unreachable!("root frame is never popped"))
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .unwrap_or_else(|| unreachable!("root frame is never popped"))
    }

    /// Number of host closure frames above the root.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn top(&self) -> usize {
        self.values.len() - self.frame().base
    }

    /// Fail unless `extra` more values fit under [`MAX_STACK_SLOTS`].
    pub fn ensure_room(&self, extra: usize) -> Result<(), BridgeError> {
        if self.values.len().saturating_add(extra) > MAX_STACK_SLOTS {
            return Err(BridgeError::StackOverflow {
                max: MAX_STACK_SLOTS,
            });
        }
        Ok(())
    }

    /// The host closure owning the current frame.
    pub fn current_function(&self) -> Option<Function> {
        self.frame().function.clone()
    }

    pub fn upvalue_count(&self) -> usize {
        self.frame().upvalues.borrow().len()
    }

    pub fn resolve(&self, index: i32) -> Result<Slot, BridgeError> {
        let invalid = || BridgeError::InvalidIndex {
            index,
            top: self.top(),
        };

        if index > 0 {
            let pos = self.frame().base + (index as usize - 1);
            return if pos < self.values.len() {
                Ok(Slot::Stack(pos))
            } else {
                Err(invalid())
            };
        }
        if index == 0 {
            return Err(invalid());
        }
        if index > REGISTRY_INDEX {
            let depth = index.unsigned_abs() as usize;
            return if depth <= self.top() {
                Ok(Slot::Stack(self.values.len() - depth))
            } else {
                Err(invalid())
            };
        }
        if index == REGISTRY_INDEX {
            return Ok(Slot::Registry);
        }

        let n = (REGISTRY_INDEX - index) as usize;
        if n <= self.frame().upvalues.borrow().len() {
            Ok(Slot::Upvalue(n - 1))
        } else {
            Err(invalid())
        }
    }

    /// Read a stack or upvalue slot. The registry is not stored here.
    pub fn get(&self, slot: Slot) -> Option<Value> {
        match slot {
            Slot::Stack(pos) => self.values.get(pos).cloned(),
            Slot::Upvalue(n) => self.frame().upvalues.borrow().get(n).cloned(),
            Slot::Registry => None,
        }
    }

    pub fn set(&mut self, slot: Slot, value: Value) -> Result<(), BridgeError> {
        match slot {
            Slot::Stack(pos) => {
                self.values[pos] = value;
                Ok(())
            }
            Slot::Upvalue(n) => {
                self.frame().upvalues.borrow_mut()[n] = value;
                Ok(())
            }
            Slot::Registry => Err(BridgeError::Argument(
                "the registry pseudo-index cannot be replaced".into(),
            )),
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), BridgeError> {
        if self.values.len() >= MAX_STACK_SLOTS {
            return Err(BridgeError::StackOverflow {
                max: MAX_STACK_SLOTS,
            });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, BridgeError> {
        if self.top() == 0 {
            return Err(BridgeError::InvalidIndex { index: -1, top: 0 });
        }
        Ok(self.values.pop().unwrap_or(Value::Nil))
    }

    /// Pop `n` values, returned bottom first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, BridgeError> {
        let top = self.top();
        if n > top {
            return Err(BridgeError::InvalidIndex {
                index: -(n.min(i32::MAX as usize) as i32),
                top,
            });
        }
        Ok(self.values.split_off(self.values.len() - n))
    }

    /// Lua `settop`: non-negative sets the top (padding with nil), negative
    /// pops so that `index` becomes the new top.
    pub fn set_top(&mut self, index: i32) -> Result<(), BridgeError> {
        let base = self.frame().base;
        let new_top = if index >= 0 {
            index as usize
        } else {
            let below = index.unsigned_abs() as usize - 1;
            self.top()
                .checked_sub(below)
                .ok_or(BridgeError::InvalidIndex {
                    index,
                    top: self.top(),
                })?
        };
        if base + new_top > MAX_STACK_SLOTS {
            return Err(BridgeError::StackOverflow {
                max: MAX_STACK_SLOTS,
            });
        }
        self.values.resize(base + new_top, Value::Nil);
        Ok(())
    }

    /// Convert a relative index into an absolute one within the frame.
    pub fn abs_index(&self, index: i32) -> Result<i32, BridgeError> {
        match self.resolve(index)? {
            Slot::Stack(pos) => Ok((pos - self.frame().base + 1) as i32),
            Slot::Registry | Slot::Upvalue(_) => Ok(index),
        }
    }

    /// Move the top value into `index`, shifting values above it up.
    pub fn insert(&mut self, index: i32) -> Result<(), BridgeError> {
        let Slot::Stack(pos) = self.resolve(index)? else {
            return Err(pseudo_index(index));
        };
        let value = self.pop()?;
        self.values.insert(pos, value);
        Ok(())
    }

    /// Remove the value at `index`, shifting values above it down.
    pub fn remove(&mut self, index: i32) -> Result<Value, BridgeError> {
        let Slot::Stack(pos) = self.resolve(index)? else {
            return Err(pseudo_index(index));
        };
        Ok(self.values.remove(pos))
    }

    /// Pop the top value into `index`.
    pub fn replace(&mut self, index: i32) -> Result<(), BridgeError> {
        let slot = self.resolve(index)?;
        let value = self.pop()?;
        match slot {
            // The popped value was the target itself.
            Slot::Stack(pos) if pos == self.values.len() => Ok(()),
            slot => self.set(slot, value),
        }
    }

    /// Open a frame holding `args` as its initial slots.
    pub fn push_frame(
        &mut self,
        args: Vec<Value>,
        upvalues: Upvalues,
        function: Option<Function>,
    ) -> Result<(), BridgeError> {
        self.ensure_room(args.len())?;
        let base = self.values.len();
        self.values.extend(args);
        self.frames.push(Frame {
            base,
            upvalues,
            function,
            pending: None,
        });
        Ok(())
    }

    /// Close the current host frame. The root frame is never closed.
    pub fn pop_frame(&mut self) -> ClosedFrame {
        if self.frames.len() == 1 {
            return ClosedFrame {
                values: Vec::new(),
                pending: None,
            };
        }
        let frame = self
            .frames
            .pop()
            .unwrap_or_else(|| unreachable!("checked above"));
        ClosedFrame {
            values: self.values.split_off(frame.base),
            pending: frame.pending,
        }
    }

    /// Record an error to re-raise when the current host frame closes.
    /// The first error wins.
    pub fn set_pending(&mut self, error: mlua::Error) {
        let frame = self.frame_mut();
        if frame.pending.is_none() {
            frame.pending = Some(error);
        }
    }
}

fn pseudo_index(index: i32) -> BridgeError {
    BridgeError::Argument(format!("pseudo-index {index} is not a stack position"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlua_core::upvalue_index;

    fn ints(stack: &ValueStack) -> Vec<i64> {
        (1..=stack.top() as i32)
            .map(|i| match stack.get(stack.resolve(i).unwrap()) {
                Some(Value::Integer(n)) => n,
                other => panic!("expected integer, got {other:?}"),
            })
            .collect()
    }

    fn stack_of(values: &[i64]) -> ValueStack {
        let mut stack = ValueStack::new();
        for v in values {
            stack.push(Value::Integer(*v)).unwrap();
        }
        stack
    }

    #[test]
    fn positive_and_negative_indices() {
        let stack = stack_of(&[10, 20, 30]);
        assert_eq!(stack.resolve(1).unwrap(), Slot::Stack(0));
        assert_eq!(stack.resolve(-1).unwrap(), Slot::Stack(2));
        assert_eq!(stack.resolve(-3).unwrap(), Slot::Stack(0));
        assert!(matches!(
            stack.resolve(4),
            Err(BridgeError::InvalidIndex { index: 4, top: 3 })
        ));
        assert!(stack.resolve(-4).is_err());
        assert!(stack.resolve(0).is_err());
    }

    #[test]
    fn registry_pseudo_index() {
        let stack = ValueStack::new();
        assert_eq!(stack.resolve(REGISTRY_INDEX).unwrap(), Slot::Registry);
        assert!(stack.get(Slot::Registry).is_none());
    }

    #[test]
    fn set_top_pads_and_truncates() {
        let mut stack = stack_of(&[1, 2, 3]);
        stack.set_top(5).unwrap();
        assert_eq!(stack.top(), 5);
        assert!(matches!(stack.get(Slot::Stack(4)), Some(Value::Nil)));

        stack.set_top(-3).unwrap();
        assert_eq!(stack.top(), 3);
        stack.set_top(-2).unwrap();
        assert_eq!(ints(&stack), vec![1, 2]);
        assert!(stack.set_top(-4).is_err());
    }

    #[test]
    fn insert_remove_replace() {
        let mut stack = stack_of(&[1, 2, 3]);
        stack.insert(1).unwrap();
        assert_eq!(ints(&stack), vec![3, 1, 2]);

        stack.remove(2).unwrap();
        assert_eq!(ints(&stack), vec![3, 2]);

        stack.push(Value::Integer(9)).unwrap();
        stack.replace(1).unwrap();
        assert_eq!(ints(&stack), vec![9, 2]);

        stack.replace(-1).unwrap();
        assert_eq!(ints(&stack), vec![9]);
    }

    #[test]
    fn abs_index_is_frame_relative() {
        let mut stack = stack_of(&[1, 2, 3]);
        assert_eq!(stack.abs_index(-1).unwrap(), 3);
        stack
            .push_frame(vec![Value::Integer(7)], Rc::default(), None)
            .unwrap();
        assert_eq!(stack.abs_index(-1).unwrap(), 1);
        assert_eq!(stack.abs_index(REGISTRY_INDEX).unwrap(), REGISTRY_INDEX);
    }

    #[test]
    fn frames_isolate_arguments() {
        let mut stack = stack_of(&[1, 2]);
        stack
            .push_frame(
                vec![Value::Integer(5), Value::Integer(6)],
                Rc::new(RefCell::new(vec![Value::Boolean(true)])),
                None,
            )
            .unwrap();
        assert_eq!(stack.depth(), 1);
        assert_eq!(ints(&stack), vec![5, 6]);
        assert!(matches!(
            stack.get(stack.resolve(upvalue_index(1).unwrap()).unwrap()),
            Some(Value::Boolean(true))
        ));
        assert!(stack.resolve(upvalue_index(2).unwrap()).is_err());

        stack.push(Value::Integer(7)).unwrap();
        let closed = stack.pop_frame();
        assert_eq!(closed.values.len(), 3);
        assert!(closed.pending.is_none());
        assert_eq!(stack.depth(), 0);
        assert_eq!(ints(&stack), vec![1, 2]);
    }

    #[test]
    fn upvalue_writes_are_shared() {
        let upvalues: Upvalues = Rc::new(RefCell::new(vec![Value::Integer(1)]));
        let mut stack = ValueStack::new();
        stack.push_frame(vec![], Rc::clone(&upvalues), None).unwrap();
        stack.push(Value::Integer(42)).unwrap();
        stack.replace(upvalue_index(1).unwrap()).unwrap();
        stack.pop_frame();
        assert!(matches!(upvalues.borrow()[0], Value::Integer(42)));
    }

    #[test]
    fn pending_error_keeps_first() {
        let mut stack = ValueStack::new();
        stack.push_frame(vec![], Rc::default(), None).unwrap();
        stack.set_pending(mlua::Error::runtime("first"));
        stack.set_pending(mlua::Error::runtime("second"));
        let closed = stack.pop_frame();
        assert!(closed.pending.unwrap().to_string().contains("first"));
    }

    #[test]
    fn root_frame_survives_pop_frame() {
        let mut stack = stack_of(&[1]);
        let closed = stack.pop_frame();
        assert!(closed.values.is_empty());
        assert_eq!(stack.top(), 1);
    }

    #[test]
    fn pop_n_respects_frame() {
        let mut stack = stack_of(&[1, 2, 3]);
        let popped = stack.pop_n(2).unwrap();
        assert!(matches!(popped[0], Value::Integer(2)));
        assert!(matches!(popped[1], Value::Integer(3)));
        assert!(stack.pop_n(2).is_err());
    }

    #[test]
    fn ensure_room_rejects_oversized_requests() {
        let stack = stack_of(&[1, 2]);
        assert!(stack.ensure_room(MAX_STACK_SLOTS - 2).is_ok());
        assert!(matches!(
            stack.ensure_room(MAX_STACK_SLOTS - 1),
            Err(BridgeError::StackOverflow { .. })
        ));
        assert!(stack.ensure_room(usize::MAX).is_err());
    }
}
