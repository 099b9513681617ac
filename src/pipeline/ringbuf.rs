//! Overwriting frame ring between the camera delivery thread and the worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::trace;

use crate::capture::Frame;

/// Bounded frame ring. When full the oldest frame is overwritten and released,
/// so a slow worker never backs pressure up into the camera.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Condvar,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct QueueState {
    ring: HeapRb<Frame>,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Counters for one queue's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub written: usize,
    pub read: usize,
    /// Overwritten, superseded by a newer frame, or arrived after close
    pub dropped: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ring: HeapRb::new(capacity.max(1)),
                closed: false,
            }),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: push a frame, overwriting the oldest when full.
    ///
    /// Returns false if the queue is closed; the frame is released either way.
    pub fn push(&self, frame: Frame) -> bool {
        let evicted = {
            let mut state = self.lock();
            if state.closed {
                drop(state);
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = frame.sequence(), "frame arrived after close");
                return false;
            }
            state.ring.push_overwrite(frame)
        };
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();

        // Released outside the lock; the hook belongs to the provider.
        if let Some(old) = evicted {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(sequence = old.sequence(), "frame overwritten before pickup");
        }
        true
    }

    /// Consumer: block until a frame is available and return the newest one.
    ///
    /// Older queued frames are released. Returns `None` once the queue is
    /// closed; anything still queued at that point is released as well.
    pub fn next_frame(&self) -> Option<Frame> {
        let mut state = self.lock();
        loop {
            if state.closed {
                let leftovers: Vec<Frame> = state.ring.pop_iter().collect();
                drop(state);
                self.stats
                    .frames_dropped
                    .fetch_add(leftovers.len(), Ordering::Relaxed);
                return None;
            }

            if !state.ring.is_empty() {
                let mut superseded = Vec::new();
                let mut newest = None;
                while let Some(frame) = state.ring.try_pop() {
                    if let Some(previous) = newest.replace(frame) {
                        superseded.push(previous);
                    }
                }
                drop(state);
                self.stats
                    .frames_dropped
                    .fetch_add(superseded.len(), Ordering::Relaxed);
                self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                return newest;
            }

            state = match self.ready.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Stop accepting frames and wake the consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicking provider hook must not wedge the camera thread.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat, Resolution};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn frame(sequence: u64, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        Frame::new(
            FrameMetadata::new(sequence, Resolution::new(2, 2), PixelFormat::I420),
            Vec::new(),
            Instant::now(),
        )
        .with_release_hook(Box::new(move |_| {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn overflow_releases_the_oldest_frame() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(2);

        for seq in 0..3 {
            assert!(queue.push(frame(seq, &released)));
        }

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn next_frame_takes_the_newest_and_releases_the_rest() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(3);
        for seq in 0..3 {
            queue.push(frame(seq, &released));
        }

        let newest = queue.next_frame().expect("frame");
        assert_eq!(newest.sequence(), 2);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());

        drop(newest);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn push_after_close_releases_immediately() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(3);
        queue.close();

        assert!(!queue.push(frame(0, &released)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_releases_queued_frames_and_ends_consumption() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(3);
        queue.push(frame(0, &released));
        queue.push(frame(1, &released));
        queue.close();

        assert!(queue.next_frame().is_none());
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn close_wakes_a_blocked_consumer() {
        let queue = Arc::new(FrameQueue::new(3));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.next_frame().is_none())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().expect("consumer thread"));
    }
}
