//! Lock-free ring buffer for decoded PCM
//!
//! Single producer (the network task pushing decoded frames) and single
//! consumer (the audio hardware callback). Bounded: when full, the newest
//! samples are dropped. Reading never blocks and never allocates; missing
//! samples are zero-filled.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded SPSC ring of i16 samples
pub struct PcmRingBuffer {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl PcmRingBuffer {
    /// Create a new ring buffer holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push samples, returning how many were accepted.
    /// Samples that do not fit are dropped and counted as overflow.
    pub fn push_slice(&self, samples: &[i16]) -> usize {
        for (pushed, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                self.overflow_count
                    .fetch_add(samples.len() - pushed, Ordering::Relaxed);
                return pushed;
            }
        }
        samples.len()
    }

    /// Fill `out` from the buffer, zero-filling on underrun.
    /// Returns the number of real samples copied.
    pub fn read_into(&self, out: &mut [i16]) -> usize {
        let mut read = 0;
        while read < out.len() {
            match self.queue.pop() {
                Some(sample) => {
                    out[read] = sample;
                    read += 1;
                }
                None => break,
            }
        }

        if read < out.len() {
            out[read..].fill(0);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        read
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Samples currently buffered
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Samples dropped because the buffer was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Reads that had to zero-fill
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedPcmBuffer = Arc<PcmRingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedPcmBuffer {
    Arc::new(PcmRingBuffer::new(capacity))
}
