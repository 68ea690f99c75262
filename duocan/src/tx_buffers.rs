//! Bookkeeping of transmit buffers
//!
//! The application reserves a buffer when it queues a frame, the interrupt
//! handler gives it back when the controller reports the frame as sent.
//! Both sides may run concurrently, so the set of free buffers is only
//! modified inside a critical section.

use core::cell::Cell;
use critical_section::Mutex;

/// Largest number of buffers in one direction
pub const MAX_BUFFERS: u8 = 8;

/// A set of buffers, identified by their indices
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferSet(pub u8);

impl FromIterator<u8> for BufferSet {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        let mut set = 0_u8;
        for i in iter.into_iter().filter(|&i| i < MAX_BUFFERS) {
            set |= 1 << i;
        }
        BufferSet(set)
    }
}

impl BufferSet {
    /// Returns the set of the first `count` buffers
    pub fn first(count: u8) -> Self {
        (0..count).collect()
    }

    /// Returns the set of all buffers
    pub fn all() -> Self {
        Self(u8::MAX)
    }

    /// `true` if `index` is part of the set
    pub fn contains(&self, index: u8) -> bool {
        index < MAX_BUFFERS && self.0 & (1 << index) != 0
    }

    /// `true` if no buffer is part of the set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// An iterator visiting all elements in increasing order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

/// An iterator over the buffer indexes of the buffers in a [`BufferSet`].
///
/// This `struct` is created by [`BufferSet::iter`].
pub struct Iter {
    flags: BufferSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < MAX_BUFFERS {
            let i = self.index;
            self.index += 1;
            if self.flags.contains(i) {
                return Some(i);
            }
        }
        None
    }
}

/// Set of free transmit buffers
///
/// Every operation is a single read-modify-write of the free mask inside
/// [`critical_section::with`], so it can be shared between thread mode and
/// the interrupt handler.
pub struct TxBuffers {
    free: Mutex<Cell<u8>>,
    configured: BufferSet,
}

impl TxBuffers {
    /// Tracks the first `count` buffers, all free
    pub fn new(count: u8) -> Self {
        let configured = BufferSet::first(count);
        Self {
            free: Mutex::new(Cell::new(configured.0)),
            configured,
        }
    }

    /// Reserve buffer `index`. Returns `None` if it is in use or not one of
    /// the configured buffers.
    pub fn try_allocate(&self, index: u8) -> Option<u8> {
        if !self.configured.contains(index) {
            return None;
        }
        critical_section::with(|cs| {
            let free = self.free.borrow(cs);
            let mask = 1 << index;
            if free.get() & mask != 0 {
                free.set(free.get() & !mask);
                Some(index)
            } else {
                None
            }
        })
    }

    /// Reserve the free buffer with the lowest index
    pub fn try_allocate_any(&self) -> Option<u8> {
        critical_section::with(|cs| {
            let free = self.free.borrow(cs);
            let index = BufferSet(free.get()).iter().next()?;
            free.set(free.get() & !(1 << index));
            Some(index)
        })
    }

    /// Return buffer `index` to the free set
    ///
    /// Freeing a buffer that is already free is a caller bug. It is not
    /// detected; the buffer simply stays free.
    pub fn free(&self, index: u8) {
        if self.configured.contains(index) {
            critical_section::with(|cs| {
                let free = self.free.borrow(cs);
                free.set(free.get() | 1 << index);
            });
        }
    }

    /// Snapshot of the free buffers
    pub fn free_set(&self) -> BufferSet {
        critical_section::with(|cs| BufferSet(self.free.borrow(cs).get()))
    }
}
