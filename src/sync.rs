//! CPU/GPU synchronization primitives.
//!
//! - [`Timeline`]: a monotonic fence. Values are allocated ahead of time and
//!   signalled out of order without ever going backwards.
//! - [`FrameSemaphore`]: bounds the number of frames the CPU may have queued
//!   on the GPU. Permits travel into GPU completion callbacks and return on
//!   drop.
//! - [`CompletionSink`]: a dedicated worker thread. GPU callbacks only forward
//!   jobs to it; anything heavier than bookkeeping (the cache merge) runs
//!   there.
//!
//! Waiting calls take a `pump` closure. On native wgpu, completion callbacks
//! only fire while someone polls the device, so a waiter that did not pump
//! would deadlock against its own GPU work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How long a waiter sleeps between pumps.
const PUMP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct TimelineInner {
    value: AtomicU64,
    next: AtomicU64,
    lock: Mutex<()>,
    changed: Condvar,
}

/// Monotonic fence shared between the frame thread, GPU callbacks and the
/// completion sink.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    inner: Arc<TimelineInner>,
}

impl Timeline {
    /// A timeline at value 0. Allocated values start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest value signalled so far.
    pub fn value(&self) -> u64 {
        self.inner.value.load(Ordering::Acquire)
    }

    /// Reserve `count` consecutive values and return the first. Values are
    /// never handed out twice.
    pub fn allocate(&self, count: u64) -> u64 {
        self.inner.next.fetch_add(count, Ordering::Relaxed) + 1
    }

    /// Raise the timeline to at least `value`.
    pub fn signal(&self, value: u64) {
        let previous = self.inner.value.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            let _guard = self.inner.lock.lock();
            self.inner.changed.notify_all();
        }
    }

    pub fn reached(&self, value: u64) -> bool {
        self.value() >= value
    }

    /// Block until the timeline reaches `value`, calling `pump` between
    /// checks.
    pub fn wait(&self, value: u64, mut pump: impl FnMut()) {
        while !self.reached(value) {
            pump();
            let mut guard = self.inner.lock.lock();
            if self.reached(value) {
                break;
            }
            self.inner.changed.wait_for(&mut guard, PUMP_INTERVAL);
        }
    }
}

#[derive(Debug)]
struct SemaphoreInner {
    permits: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

/// Counting semaphore bounding frames in flight.
#[derive(Clone, Debug)]
pub struct FrameSemaphore {
    inner: Arc<SemaphoreInner>,
}

/// One frame's slot. Dropping it returns the permit.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct FramePermit {
    inner: Arc<SemaphoreInner>,
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        let mut permits = self.inner.permits.lock();
        *permits += 1;
        self.inner.released.notify_one();
    }
}

impl FrameSemaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner {
                permits: Mutex::new(capacity),
                released: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Frames currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.inner.capacity - *self.inner.permits.lock()
    }

    pub fn try_acquire(&self) -> Option<FramePermit> {
        let mut permits = self.inner.permits.lock();
        if *permits == 0 {
            return None;
        }
        *permits -= 1;
        Some(FramePermit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Block until a permit is available, calling `pump` while waiting.
    pub fn acquire(&self, mut pump: impl FnMut()) -> FramePermit {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            pump();
            let mut permits = self.inner.permits.lock();
            if *permits == 0 {
                self.inner.released.wait_for(&mut permits, PUMP_INTERVAL);
            }
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Cloneable handle that forwards jobs to the completion sink.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::Sender<Message>,
}

impl CompletionSender {
    /// Queue a job. Jobs sent after shutdown are dropped.
    pub fn send(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            tracing::trace!("completion sink closed, dropping job");
        }
    }
}

/// Worker thread running jobs forwarded by GPU callbacks, in order.
pub struct CompletionSink {
    sender: CompletionSender,
    worker: Option<JoinHandle<()>>,
}

impl CompletionSink {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = std::thread::Builder::new()
            .name("completion-sink".into())
            .spawn(move || {
                while let Ok(Message::Run(job)) = rx.recv() {
                    job();
                }
                tracing::debug!("completion sink stopped");
            })?;
        Ok(Self {
            sender: CompletionSender { tx },
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> CompletionSender {
        self.sender.clone()
    }

    pub fn send(&self, job: impl FnOnce() + Send + 'static) {
        self.sender.send(job);
    }
}

impl Drop for CompletionSink {
    fn drop(&mut self) {
        let _ = self.sender.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("completion sink panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_timeline_never_goes_backwards() {
        let timeline = Timeline::new();
        timeline.signal(5);
        timeline.signal(3);
        assert_eq!(timeline.value(), 5);
        assert!(timeline.reached(4));
        assert!(!timeline.reached(6));
    }

    #[test]
    fn test_timeline_allocations_are_unique() {
        let timeline = Timeline::new();
        let a = timeline.allocate(2);
        let b = timeline.allocate(2);
        assert_eq!(a, 1);
        assert_eq!(b, 3);
        assert!(timeline.value() < a);
    }

    #[test]
    fn test_timeline_wait_across_threads() {
        let timeline = Timeline::new();
        let remote = timeline.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            remote.signal(1);
            remote.signal(2);
        });
        timeline.wait(2, || {});
        assert!(timeline.reached(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_pumps_until_signalled() {
        let timeline = Timeline::new();
        let mut pumps = 0;
        timeline.wait(1, || {
            pumps += 1;
            if pumps == 3 {
                timeline.signal(1);
            }
        });
        assert_eq!(pumps, 3);
    }

    #[test]
    fn test_semaphore_bounds_in_flight() {
        let semaphore = FrameSemaphore::new(2);
        let a = semaphore.try_acquire().unwrap();
        let _b = semaphore.try_acquire().unwrap();
        assert!(semaphore.try_acquire().is_none());
        assert_eq!(semaphore.in_flight(), 2);

        drop(a);
        assert_eq!(semaphore.in_flight(), 1);
        assert!(semaphore.try_acquire().is_some());
    }

    #[test]
    fn test_semaphore_acquire_waits_for_release() {
        let semaphore = FrameSemaphore::new(1);
        let held = semaphore.try_acquire().unwrap();
        let mut pending = Some(held);
        let _permit = semaphore.acquire(|| {
            // The "GPU" finishes the frame during the first pump.
            pending.take();
        });
        assert_eq!(semaphore.in_flight(), 1);
    }

    #[test]
    fn test_completion_sink_runs_jobs_in_order() {
        let sink = CompletionSink::spawn().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = Arc::clone(&log);
            sink.send(move || log.lock().push(i));
        }
        drop(sink);
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_sender_outlives_sink() {
        let sink = CompletionSink::spawn().unwrap();
        let sender = sink.sender();
        let ran = Arc::new(AtomicUsize::new(0));
        drop(sink);
        let counter = Arc::clone(&ran);
        sender.send(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
