//! Fixed-capacity slot arena.
//!
//! Each entry is explicitly `Free` or `Occupied`. Indices stay stable for the
//! lifetime of the occupant and become reusable as soon as it is released.

use crate::error::{ProtocolError, Result};

#[derive(Debug)]
pub enum Slot<T> {
    Free,
    Occupied(T),
}

impl<T> Slot<T> {
    pub fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }
}

/// `N` slots scanned first-free
#[derive(Debug)]
pub struct SlotPool<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T, const N: usize> SlotPool<T, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::Free),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_free()).count()
    }

    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_free)
    }

    pub fn has_free(&self) -> bool {
        self.first_free().is_some()
    }

    /// Occupy the first free slot and return its index
    pub fn claim(&mut self, value: T) -> Result<usize> {
        let index = self.first_free().ok_or(ProtocolError::SlotsExhausted)?;
        self.slots[index] = Slot::Occupied(value);
        Ok(index)
    }

    /// Occupy a specific slot, replacing anything already there
    pub fn insert_at(&mut self, index: usize, value: T) -> Option<T> {
        match std::mem::replace(self.slots.get_mut(index)?, Slot::Occupied(value)) {
            Slot::Occupied(previous) => Some(previous),
            Slot::Free => None,
        }
    }

    /// Free a slot, handing back its occupant
    pub fn release(&mut self, index: usize) -> Option<T> {
        match std::mem::replace(self.slots.get_mut(index)?, Slot::Free) {
            Slot::Occupied(value) => Some(value),
            Slot::Free => None,
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        match self.slots.get(index)? {
            Slot::Occupied(value) => Some(value),
            Slot::Free => None,
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index)? {
            Slot::Occupied(value) => Some(value),
            Slot::Free => None,
        }
    }

    /// Index of the first occupant matching `predicate`
    pub fn find<F>(&self, mut predicate: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.iter().find(|(_, value)| predicate(value)).map(|(index, _)| index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied(value) => Some((index, value)),
            Slot::Free => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(value) => Some((index, value)),
                Slot::Free => None,
            })
    }
}

impl<T, const N: usize> Default for SlotPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_free_and_reuse() {
        let mut pool: SlotPool<&str, 3> = SlotPool::new();
        assert_eq!(pool.claim("a").unwrap(), 0);
        assert_eq!(pool.claim("b").unwrap(), 1);
        assert_eq!(pool.claim("c").unwrap(), 2);
        assert!(matches!(pool.claim("d"), Err(ProtocolError::SlotsExhausted)));

        assert_eq!(pool.release(1), Some("b"));
        assert_eq!(pool.release(1), None);
        assert_eq!(pool.claim("e").unwrap(), 1);
        assert_eq!(pool.get(1), Some(&"e"));
        assert_eq!(pool.occupied(), 3);
    }

    #[test]
    fn test_indices_stable() {
        let mut pool: SlotPool<u32, 4> = SlotPool::new();
        pool.claim(10).unwrap();
        pool.claim(20).unwrap();
        pool.claim(30).unwrap();
        pool.release(0);
        assert_eq!(pool.find(|v| *v == 30), Some(2));
        assert_eq!(pool.iter().map(|(i, _)| i).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_insert_at_and_out_of_range() {
        let mut pool: SlotPool<u8, 2> = SlotPool::new();
        assert_eq!(pool.insert_at(1, 5), None);
        assert_eq!(pool.insert_at(1, 6), Some(5));
        assert_eq!(pool.insert_at(9, 1), None);
        assert!(pool.get(9).is_none());
        assert_eq!(pool.first_free(), Some(0));
        if let Some(v) = pool.get_mut(1) {
            *v += 1;
        }
        assert_eq!(pool.get(1), Some(&7));
    }
}
