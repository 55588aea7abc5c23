//! Slot recycling storage addressed by small integer ids
use std::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

use crate::{Error, Result};

/// Converts between a typed id and the slot it addresses
pub trait ArenaIndex: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Contiguous storage where freed slots are handed out again in LIFO order.
///
/// Ids are never compacted, so an id stays valid until its slot is freed, regardless of what
/// else is allocated or freed in the meantime.
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    _marker: PhantomData<fn(I) -> I>,
}

impl<I, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<I, T: Clone> Clone for Arena<I, T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            free: self.free.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I: ArenaIndex + Debug, T: Debug> Debug for Arena<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<I: ArenaIndex, T> Arena<I, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Stores `value`, reusing the most recently freed slot if there is one
    pub fn allocate(&mut self, value: T) -> I {
        match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index].is_none());
                self.slots[index] = Some(value);
                I::from_index(index)
            }
            None => {
                self.slots.push(Some(value));
                I::from_index(self.slots.len() - 1)
            }
        }
    }

    /// Empties the slot and returns it to the free list.
    ///
    /// Returns the previous value, or `None` if the slot was already vacant.
    pub fn free(&mut self, id: I) -> Option<T> {
        let index = id.index();
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(value)
    }

    #[inline]
    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index())?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Bounds checked access
    pub fn at(&self, id: I) -> Result<&T> {
        let index = id.index();
        match self.slots.get(index) {
            Some(slot) => slot.as_ref().ok_or(Error::OutOfRange {
                index,
                len: self.slots.len(),
            }),
            None => Err(Error::OutOfRange {
                index,
                len: self.slots.len(),
            }),
        }
    }

    /// Bounds checked mutable access
    pub fn at_mut(&mut self, id: I) -> Result<&mut T> {
        let index = id.index();
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .and_then(|v| v.as_mut())
            .ok_or(Error::OutOfRange { index, len })
    }

    #[inline]
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Number of slots, occupied or not
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots waiting to be reused
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.size() - self.free_count()
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Iterates the occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| Some((I::from_index(i), v.as_ref()?)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| Some((I::from_index(i), v.as_mut()?)))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

impl<I: ArenaIndex + Debug, T> Index<I> for Arena<I, T> {
    type Output = T;

    #[inline]
    fn index(&self, id: I) -> &Self::Output {
        match self.slots[id.index()] {
            Some(ref v) => v,
            None => panic!("slot {id:?} is vacant"),
        }
    }
}

impl<I: ArenaIndex + Debug, T> IndexMut<I> for Arena<I, T> {
    #[inline]
    fn index_mut(&mut self, id: I) -> &mut Self::Output {
        match self.slots[id.index()] {
            Some(ref mut v) => v,
            None => panic!("slot {id:?} is vacant"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Arena, BodyId, Error};

    #[test]
    fn recycles_last_freed_slot() {
        let mut arena = Arena::<BodyId, &str>::new();

        let a = arena.allocate("a");
        let b = arena.allocate("b");
        let c = arena.allocate("c");

        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(arena.size(), 3);
        assert_eq!(arena.used(), 3);

        assert_eq!(arena.free(a), Some("a"));
        assert_eq!(arena.free(c), Some("c"));
        assert_eq!(arena.free(c), None);
        assert_eq!(arena.free_count(), 2);
        assert_eq!(arena.used(), 1);

        // LIFO
        assert_eq!(arena.allocate("d"), c);
        assert_eq!(arena.allocate("e"), a);
        assert_eq!(arena.allocate("f").index(), 3);

        assert_eq!(arena[b], "b");
        assert_eq!(arena[c], "d");
        assert_eq!(arena.used(), arena.size() - arena.free_count());
    }

    #[test]
    fn bounds_checked_access() {
        let mut arena = Arena::<BodyId, u32>::new();
        let a = arena.allocate(5);

        assert_eq!(arena.at(a), Ok(&5));
        assert_eq!(
            arena.at(BodyId::from_index(4)),
            Err(Error::OutOfRange { index: 4, len: 1 })
        );

        arena.free(a);
        assert!(arena.at(a).is_err());
        assert!(arena.get(a).is_none());
    }

    #[test]
    fn ids_survive_other_frees() {
        let mut arena = Arena::<BodyId, usize>::new();
        let ids: Vec<_> = (0..8).map(|i| arena.allocate(i)).collect();

        for id in ids.iter().step_by(2) {
            arena.free(*id);
        }

        for (i, id) in ids.iter().enumerate().skip(1).step_by(2) {
            assert_eq!(arena[*id], i);
        }

        assert_eq!(
            arena.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            [1, 3, 5, 7]
        );
    }
}
