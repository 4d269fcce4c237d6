//! Pieces shared by the stream implementations.

use cadence_core::{Error, RingBuffer, RingConsumer, RingProducer, Result, StreamParams};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thread_priority::ThreadPriority;

/// Ring sized to hold `params.latency` seconds of interleaved f32 frames.
pub(crate) fn stream_ring(params: &StreamParams) -> Result<(RingProducer, RingConsumer)> {
    let frames = (params.latency * params.sample_rate as f64).ceil().max(1.0) as usize;
    let ring = RingBuffer::new(frames * params.channel_layout.bytes_per_frame())?;
    Ok(ring.split())
}

/// Fills every free whole frame with silence.
pub(crate) fn prime_with_silence(producer: &mut RingProducer, bytes_per_frame: usize) {
    let frames = producer.free_count() / bytes_per_frame;
    let samples = frames * bytes_per_frame / std::mem::size_of::<f32>();
    producer.write_ptr_f32()[..samples].fill(0.0);
    producer.advance_write_ptr(frames * bytes_per_frame);
}

/// Drops every buffered whole frame.
pub(crate) fn drain(consumer: &mut RingConsumer, bytes_per_frame: usize) {
    let frames = consumer.fill_count() / bytes_per_frame;
    consumer.advance_read_ptr(frames * bytes_per_frame);
}

/// A thread that wakes every `period` and hands its tick function the wall-clock time
/// since it started. Owns `state` until stopped.
pub(crate) struct ClockThread<T> {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> ClockThread<T> {
    pub(crate) fn spawn<F>(name: String, period: Duration, mut state: T, mut tick: F) -> Result<Self>
    where
        F: FnMut(&mut T, Duration) + Send + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                let started = Instant::now();
                let (lock, cvar) = &*thread_stop;
                loop {
                    {
                        let mut stopped = lock.lock();
                        if !*stopped {
                            cvar.wait_for(&mut stopped, period);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    tick(&mut state, started.elapsed());
                }
                state
            })
            .map_err(|e| Error::SystemResources(format!("spawning clock thread: {}", e)))?;
        Ok(Self { stop, handle })
    }

    /// Stops the thread and takes the state back. `None` if the thread panicked.
    pub(crate) fn stop(self) -> Option<T> {
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock() = true;
            cvar.notify_all();
        }
        self.handle.join().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ChannelLayout;

    #[test]
    fn test_ring_holds_latency() {
        let params = StreamParams {
            channel_layout: ChannelLayout::stereo(),
            sample_rate: 48000,
            latency: 0.1,
        };
        let (producer, _consumer) = stream_ring(&params).unwrap();
        assert!(producer.capacity() >= 4800 * 8);
    }

    #[test]
    fn test_prime_and_drain() {
        let params = StreamParams {
            channel_layout: ChannelLayout::stereo(),
            sample_rate: 48000,
            latency: 0.01,
        };
        let (mut producer, mut consumer) = stream_ring(&params).unwrap();
        prime_with_silence(&mut producer, 8);
        assert!(producer.free_count() < 8);
        assert!(consumer.read_ptr_f32().iter().all(|&s| s == 0.0));
        drain(&mut consumer, 8);
        assert!(consumer.fill_count() < 8);
    }

    #[test]
    fn test_clock_thread_ticks_and_returns_state() {
        let clock = ClockThread::spawn(
            "test-clock".to_string(),
            Duration::from_millis(1),
            0u32,
            |ticks, _elapsed| *ticks += 1,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(30));
        let ticks = clock.stop().unwrap();
        assert!(ticks > 0);
    }
}
