//! Lock-free primitives shared between the control thread and the workers.

use atomic_float::AtomicF64;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cache-line aligned atomic bool.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Cache-line aligned atomic f64.
///
/// Used for node timestamps and event-flow time marks, all in whole notes.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicDouble {
    value: AtomicF64,
}

impl AtomicDouble {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: f64) -> f64 {
        self.value.swap(value, Ordering::AcqRel)
    }

    /// Adds `delta`, returning the previous value.
    #[inline]
    pub fn add(&self, delta: f64) -> f64 {
        self.value.fetch_add(delta, Ordering::AcqRel)
    }

    /// Raises the stored value to `value` if it is larger. Returns true if it changed.
    #[inline]
    pub fn raise_to(&self, value: f64) -> bool {
        let mut current = self.value.load(Ordering::Acquire);
        while value > current {
            match self.value.compare_exchange_weak(
                current,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

impl Default for AtomicDouble {
    fn default() -> Self {
        Self::new(0.0)
    }
}
