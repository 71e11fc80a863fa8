//! Generational arena for engine instances.
//!
//! Hosts refer to instances through [`EngineHandle`], a 64-bit value packing
//! a slot index with the slot's generation. Releasing a slot bumps its
//! generation, so an old handle stops resolving instead of pointing at
//! whatever reuses the slot.

use std::fmt;

/// Handle to an instance stored in a [`HandleArena`].
///
/// Layout: high 32 bits generation, low 32 bits slot index. Generations
/// start at 1, so the all-zero value is never issued and serves as the null
/// handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub const NULL: EngineHandle = EngineHandle(0);

    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }

    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineHandle({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Slot storage with generation tracking and a free list.
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Store a value and return its handle.
    pub fn insert(&mut self, value: T) -> EngineHandle {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            EngineHandle::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len())
                .unwrap_or_else(|_| panic!("handle arena exhausted"));
            self.slots.push(Slot {
                generation: 1,
                value: Some(value),
            });
            EngineHandle::new(index, 1)
        }
    }

    /// Resolve a handle. Returns `None` for null, stale or unknown handles.
    pub fn get(&self, handle: EngineHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: EngineHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, handle: EngineHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a value, retiring its handle.
    pub fn remove(&mut self, handle: EngineHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = next_generation(slot.generation);
        self.free_list.push(handle.index());
        self.live -= 1;
        Some(value)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandleArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleArena")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}

// Generation 0 would let index 0 produce the null handle.
fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}
