//! Triple-buffered value for handing snapshots from one writer thread to one reader
//! thread without locks.
//!
//! The writer always owns one slot privately, the reader owns another, and the third
//! sits in the middle carrying a "fresh" bit. Publishing swaps the writer's slot into
//! the middle; reading swaps the middle into the reader's slot when it is fresh. Neither
//! side can ever touch the slot the other holds.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const INDEX_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

struct Shared<T> {
    slots: [UnsafeCell<T>; 3],
    middle: AtomicU8,
}

// SAFETY: a slot is only ever accessed by the handle that currently owns its index;
// ownership moves between handles through the AcqRel swap on `middle`.
unsafe impl<T: Send> Sync for Shared<T> {}

/// Creates a value with all three slots set to `initial`.
pub fn atomic_value<T: Clone + Send>(initial: T) -> (AtomicValueWriter<T>, AtomicValueReader<T>) {
    let shared = Arc::new(Shared {
        slots: [
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial),
        ],
        middle: AtomicU8::new(1),
    });
    (
        AtomicValueWriter {
            shared: Arc::clone(&shared),
            back: 2,
            writing: false,
        },
        AtomicValueReader { shared, front: 0 },
    )
}

/// Writer half: the application thread.
pub struct AtomicValueWriter<T> {
    shared: Arc<Shared<T>>,
    back: u8,
    writing: bool,
}

// SAFETY: the writer only touches the slot it owns.
unsafe impl<T: Send> Send for AtomicValueWriter<T> {}

impl<T> AtomicValueWriter<T> {
    /// Starts a write, returning the private slot. Its content is the value published
    /// two writes ago, not the latest one.
    ///
    /// # Panics
    /// If a write is already in progress.
    pub fn write_begin(&mut self) -> &mut T {
        assert!(!self.writing, "write_begin called twice without write_end");
        self.writing = true;
        // SAFETY: `back` is owned by this writer until write_end publishes it.
        unsafe { &mut *self.shared.slots[self.back as usize].get() }
    }

    /// Publishes the slot filled since [`Self::write_begin`].
    pub fn write_end(&mut self) {
        assert!(self.writing, "write_end called without write_begin");
        self.writing = false;
        let previous = self.shared.middle.swap(self.back | FRESH, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
    }

    pub fn write(&mut self, value: T) {
        *self.write_begin() = value;
        self.write_end();
    }
}

/// Reader half: the audio thread.
pub struct AtomicValueReader<T> {
    shared: Arc<Shared<T>>,
    front: u8,
}

// SAFETY: the reader only touches the slot it owns.
unsafe impl<T: Send> Send for AtomicValueReader<T> {}

impl<T> AtomicValueReader<T> {
    /// Claims the most recently published value.
    pub fn get_read_ptr(&mut self) -> &T {
        if self.shared.middle.load(Ordering::Acquire) & FRESH != 0 {
            let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
            self.front = previous & INDEX_MASK;
        }
        // SAFETY: `front` is owned by this reader until the next swap.
        unsafe { &*self.shared.slots[self.front as usize].get() }
    }

    /// True if a write was published since the last [`Self::get_read_ptr`].
    pub fn has_update(&self) -> bool {
        self.shared.middle.load(Ordering::Acquire) & FRESH != 0
    }
}
