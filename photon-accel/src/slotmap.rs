// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use std::{
    cmp, fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

const NIL: u32 = u32::MAX;

const OCCUPIED_BIT: u32 = 1;

/// This ID type is used throughout the crate to refer to objects owned by the manager.
///
/// The type parameter denotes the type of object being referred to. An ID is made of a slot index
/// and the generation of that slot at insertion time. Once the object is removed, the slot's
/// generation moves on and the ID never resolves again, even if the slot is reused.
#[repr(C)]
pub struct Id<T = ()> {
    index: u32,
    generation: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// An ID that's guaranteed to be invalid.
    pub const INVALID: Self = Id {
        index: NIL,
        generation: 0,
        marker: PhantomData,
    };

    const fn new(index: u32, generation: u32) -> Self {
        Id {
            index,
            generation,
            marker: PhantomData,
        }
    }

    /// Returns the slot index of the ID.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation of the slot at the time the ID was handed out.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Id")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

/// A slot map handing out generational [`Id`]s.
pub(crate) struct SlotMap<K, V> {
    slots: Vec<Slot<V>>,
    len: u32,
    free_list_head: u32,
    marker: PhantomData<fn(K) -> K>,
}

struct Slot<V> {
    generation: u32,
    value: Option<V>,
    next_free: u32,
}

impl<K, V> Default for SlotMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SlotMap<K, V> {
    #[inline]
    pub fn new() -> Self {
        SlotMap {
            slots: Vec::new(),
            len: 0,
            free_list_head: NIL,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn insert(&mut self, value: V) -> Id<K> {
        if self.free_list_head != NIL {
            let index = self.free_list_head;
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());

            // Vacant slots have an even generation, so this sets the occupied bit.
            let generation = slot.generation.wrapping_add(OCCUPIED_BIT);
            self.free_list_head = slot.next_free;

            slot.generation = generation;
            slot.value = Some(value);
            slot.next_free = NIL;

            self.len += 1;

            Id::new(index, generation)
        } else {
            if self.slots.len() == (NIL - 1) as usize {
                capacity_overflow();
            }

            let index = self.slots.len() as u32;

            self.slots.push(Slot {
                generation: OCCUPIED_BIT,
                value: Some(value),
                next_free: NIL,
            });

            self.len += 1;

            Id::new(index, OCCUPIED_BIT)
        }
    }

    pub fn remove(&mut self, id: Id<K>) -> Option<V> {
        let slot = self.slots.get_mut(id.index as usize)?;

        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take();
        debug_assert!(value.is_some());

        slot.generation = slot.generation.wrapping_add(OCCUPIED_BIT);
        slot.next_free = self.free_list_head;
        self.free_list_head = id.index;

        self.len -= 1;

        value
    }

    #[inline]
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        let slot = self.slots.get(id.index as usize)?;

        if slot.generation == id.generation {
            slot.value.as_ref()
        } else {
            None
        }
    }

    /// Removes every value, yielding them in slot order. The IDs of the removed values never
    /// resolve again.
    pub fn drain(&mut self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.len as usize);

        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(OCCUPIED_BIT);
                slot.next_free = self.free_list_head;
                self.free_list_head = index as u32;

                values.push(value);
            }
        }

        self.len = 0;
        values.reverse();

        values
    }
}

#[cold]
fn capacity_overflow() -> ! {
    panic!("reached the maximum capacity");
}

#[cfg(test)]
mod tests {
    use super::{Id, SlotMap};

    #[test]
    fn basic_usage() {
        let mut map = SlotMap::<(), _>::new();

        let x = map.insert(69);
        let y = map.insert(42);

        assert_eq!(map.get(x), Some(&69));
        assert_eq!(map.get(y), Some(&42));
        assert_eq!(map.len(), 2);

        map.remove(x);

        assert_eq!(map.get(x), None);
        assert_eq!(map.len(), 1);

        let z = map.insert(12);

        // The freed slot is reused with a new generation.
        assert_eq!(z.index(), x.index());
        assert_ne!(z.generation(), x.generation());
        assert_eq!(map.get(x), None);
        assert_eq!(map.get(z), Some(&12));
    }

    #[test]
    fn double_remove() {
        let mut map = SlotMap::<(), _>::new();

        let x = map.insert(1);

        assert_eq!(map.remove(x), Some(1));
        assert_eq!(map.remove(x), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn invalid_id() {
        let map = SlotMap::<(), u32>::new();

        assert_eq!(map.get(Id::INVALID), None);
    }

    #[test]
    fn drain_invalidates_ids() {
        let mut map = SlotMap::<(), _>::new();

        let a = map.insert('a');
        let b = map.insert('b');
        let c = map.insert('c');
        map.remove(b);

        assert_eq!(map.drain(), ['a', 'c']);
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(a), None);
        assert_eq!(map.get(c), None);

        let d = map.insert('d');
        assert_eq!(d.index(), a.index());
        assert_eq!(map.get(a), None);
        assert_eq!(map.get(d), Some(&'d'));
    }
}
