//! Single-producer single-consumer byte ring over mirrored memory.
//!
//! Offsets only ever grow; the position inside the buffer is `offset % capacity`.
//! Because the backing pages are mapped twice, [`RingProducer::write_ptr`] and
//! [`RingConsumer::read_ptr`] always return one contiguous slice covering every
//! free (resp. filled) byte, even across the wrap point.
//!
//! ```ignore
//! let (mut producer, mut consumer) = RingBuffer::new(4096)?.split();
//! producer.write_ptr()[..3].copy_from_slice(b"abc");
//! producer.advance_write_ptr(3);
//! assert_eq!(&consumer.read_ptr()[..3], b"abc");
//! consumer.advance_read_ptr(3);
//! ```

mod mirror;

pub use mirror::page_size;

use crate::Result;
use mirror::MirroredMemory;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
#[repr(align(64))]
struct Offset(AtomicU64);

/// Shared state of a ring. Readable from any thread; mutated only through the
/// producer/consumer handles returned by [`RingBuffer::split`].
pub struct RingBuffer {
    memory: MirroredMemory,
    write_offset: Offset,
    read_offset: Offset,
}

impl RingBuffer {
    /// Allocates a ring of at least `requested` bytes.
    ///
    /// Capacity is rounded up to a power of two and to at least one page. Fails with
    /// [`Error::NoMem`](crate::Error::NoMem) when that overflows, and with
    /// [`Error::SystemResources`](crate::Error::SystemResources) when the operating
    /// system refuses the mirrored mapping.
    pub fn new(requested: usize) -> Result<Self> {
        let capacity = requested
            .max(1)
            .checked_next_power_of_two()
            .ok_or(crate::Error::NoMem)?
            .max(page_size());
        let memory = MirroredMemory::new(capacity)?;
        Ok(Self {
            memory,
            write_offset: Offset::default(),
            read_offset: Offset::default(),
        })
    }

    /// Hands out the writer and reader roles. Each may move to its own thread.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let shared = Arc::new(self);
        (
            RingProducer {
                ring: Arc::clone(&shared),
            },
            RingConsumer { ring: shared },
        )
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    /// Bytes written and not yet read.
    #[inline]
    pub fn fill_count(&self) -> usize {
        // read first: a concurrent writer can only make the result smaller than reality
        let read = self.read_offset.0.load(Ordering::Acquire);
        let write = self.write_offset.0.load(Ordering::Acquire);
        (write - read) as usize
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.capacity() - self.fill_count()
    }

    #[inline]
    fn position(&self, offset: u64) -> usize {
        (offset as usize) & (self.capacity() - 1)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("fill_count", &self.fill_count())
            .finish()
    }
}

/// Writer half of a [`RingBuffer`].
pub struct RingProducer {
    ring: Arc<RingBuffer>,
}

impl RingProducer {
    /// Shared counters, for observers such as the scheduler.
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Every free byte, as one contiguous slice.
    #[inline]
    pub fn write_ptr(&mut self) -> &mut [u8] {
        let free = self.ring.free_count();
        let write = self.ring.write_offset.0.load(Ordering::Relaxed);
        let start = self.ring.position(write);
        // SAFETY: start < capacity and free <= capacity, so the range lies inside the
        // double mapping; only this handle writes to the free region.
        unsafe { std::slice::from_raw_parts_mut(self.ring.memory.as_ptr().add(start), free) }
    }

    /// Free space viewed as samples. The write position must be 4-byte aligned,
    /// which holds as long as the writer only ever advances by whole samples.
    #[inline]
    pub fn write_ptr_f32(&mut self) -> &mut [f32] {
        let bytes = self.write_ptr();
        debug_assert_eq!(bytes.as_ptr() as usize % 4, 0);
        let len = bytes.len() / 4;
        // SAFETY: pages are page aligned and offsets are multiples of 4.
        unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut f32, len) }
    }

    /// Commits `count` bytes previously written through [`Self::write_ptr`].
    ///
    /// # Panics
    /// If `count` exceeds the free space.
    #[inline]
    pub fn advance_write_ptr(&mut self, count: usize) {
        assert!(
            count <= self.ring.free_count(),
            "advance_write_ptr({}) exceeds free space {}",
            count,
            self.ring.free_count()
        );
        self.ring
            .write_offset
            .0
            .fetch_add(count as u64, Ordering::Release);
    }

    /// Drops everything not yet read.
    pub fn clear(&mut self) {
        let read = self.ring.read_offset.0.load(Ordering::Acquire);
        self.ring.write_offset.0.store(read, Ordering::Release);
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.ring.free_count()
    }

    #[inline]
    pub fn fill_count(&self) -> usize {
        self.ring.fill_count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Reader half of a [`RingBuffer`].
pub struct RingConsumer {
    ring: Arc<RingBuffer>,
}

impl RingConsumer {
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Every filled byte, as one contiguous slice.
    #[inline]
    pub fn read_ptr(&self) -> &[u8] {
        let fill = self.ring.fill_count();
        let read = self.ring.read_offset.0.load(Ordering::Relaxed);
        let start = self.ring.position(read);
        // SAFETY: see write_ptr; the filled region is only written before publication.
        unsafe { std::slice::from_raw_parts(self.ring.memory.as_ptr().add(start), fill) }
    }

    #[inline]
    pub fn read_ptr_f32(&self) -> &[f32] {
        let bytes = self.read_ptr();
        debug_assert_eq!(bytes.as_ptr() as usize % 4, 0);
        // SAFETY: as in write_ptr_f32.
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, bytes.len() / 4) }
    }

    /// Releases `count` bytes back to the writer.
    ///
    /// # Panics
    /// If `count` exceeds the filled space.
    #[inline]
    pub fn advance_read_ptr(&mut self, count: usize) {
        assert!(
            count <= self.ring.fill_count(),
            "advance_read_ptr({}) exceeds fill count {}",
            count,
            self.ring.fill_count()
        );
        self.ring
            .read_offset
            .0
            .fetch_add(count as u64, Ordering::Release);
    }

    #[inline]
    pub fn fill_count(&self) -> usize {
        self.ring.fill_count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
