//! Lock-free queue between the capture and playback callbacks
//!
//! Single-producer single-consumer: the capture callback pushes mono blocks,
//! the playback callback pops them. Neither side ever blocks.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mono block of captured samples
#[derive(Clone)]
pub struct CaptureBlock {
    /// Mono f32 samples
    pub samples: Vec<f32>,
    /// Capture timestamp in microseconds since stream start
    pub timestamp: u64,
    /// Block sequence number
    pub sequence: u32,
}

impl CaptureBlock {
    pub fn new(samples: Vec<f32>, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            timestamp,
            sequence,
        }
    }

    /// Block duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }
}

/// Lock-free block queue with overflow/underrun accounting
pub struct BlockQueue {
    queue: ArrayQueue<CaptureBlock>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl BlockQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a block; returns false on overflow (block dropped)
    pub fn push(&self, block: CaptureBlock) -> bool {
        match self.queue.push(block) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a block; returns None on underrun
    pub fn pop(&self) -> Option<CaptureBlock> {
        match self.queue.pop() {
            Some(block) => Some(block),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a block queue
pub type SharedBlockQueue = Arc<BlockQueue>;

/// Create a new shared block queue
pub fn create_shared_queue(capacity: usize) -> SharedBlockQueue {
    Arc::new(BlockQueue::new(capacity))
}
