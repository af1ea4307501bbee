//! Read/write lock guarding the index store
//!
//! Any number of readers share the lock; one writer holds it exclusively. A writer that
//! announces itself blocks readers arriving after the announcement, but readers that
//! were already waiting when a write lock is released are admitted before the next
//! writer gets in. Every wait polls the caller's cancellation token.

use super::StoreError;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct LockState {
    /// Read locks currently held
    readers: usize,
    writer: bool,
    /// Writers waiting for the lock
    pending_writers: usize,
    /// Readers currently waiting for the lock
    blocked_readers: usize,
    /// Readers that were already waiting at the last write release
    waiting_readers: usize,
    /// Bumped on every write release
    epoch: u64,
    write_acquired_at: Option<Instant>,
}

impl LockState {
    fn reader_must_wait(&self, arrival_epoch: u64) -> bool {
        self.writer || (self.pending_writers > 0 && arrival_epoch == self.epoch)
    }

    fn writer_must_wait(&self) -> bool {
        self.writer || self.readers > 0 || self.waiting_readers > 0
    }

    /// Bookkeeping for a reader leaving the wait queue, admitted or not
    fn leave_read_queue(&mut self, arrival_epoch: u64) {
        self.blocked_readers -= 1;
        if arrival_epoch != self.epoch {
            self.waiting_readers = self.waiting_readers.saturating_sub(1);
        }
    }
}

pub struct IndexLock {
    state: Mutex<LockState>,
    changed: Condvar,
    poll_interval: Duration,
}

impl IndexLock {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
            poll_interval,
        }
    }

    pub fn acquire_read(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let arrival_epoch = state.epoch;
        if !state.reader_must_wait(arrival_epoch) {
            state.readers += 1;
            return Ok(());
        }

        state.blocked_readers += 1;
        trace!(
            "IndexLock: reader blocked (writer={}, pending_writers={})",
            state.writer, state.pending_writers
        );
        while state.reader_must_wait(arrival_epoch) {
            if cancel.is_cancelled() {
                state.leave_read_queue(arrival_epoch);
                self.changed.notify_all();
                return Err(StoreError::Cancelled);
            }
            self.changed.wait_for(&mut state, self.poll_interval);
        }
        state.leave_read_queue(arrival_epoch);
        state.readers += 1;
        self.changed.notify_all();
        Ok(())
    }

    pub fn release_read(&self) {
        let mut state = self.state.lock();
        if state.readers == 0 {
            warn!("IndexLock: read lock released without being held");
            return;
        }
        state.readers -= 1;
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    /// Acquire the write lock, first giving up `giveup_read_locks` read locks held by the
    /// caller. On failure the given-up read locks are held again when this returns.
    pub fn acquire_write(
        &self,
        giveup_read_locks: usize,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let giveup = if giveup_read_locks > state.readers {
            warn!(
                "IndexLock: asked to give up {} read locks but only {} are held",
                giveup_read_locks, state.readers
            );
            state.readers
        } else {
            giveup_read_locks
        };
        state.readers -= giveup;
        state.pending_writers += 1;

        let started = Instant::now();
        while state.writer_must_wait() {
            let failure = if cancel.is_cancelled() {
                Some(StoreError::Cancelled)
            } else if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                Some(StoreError::LockTimeout {
                    waited: started.elapsed(),
                })
            } else {
                None
            };

            if let Some(error) = failure {
                state.pending_writers -= 1;
                // Another writer may have slipped in while our read locks were released
                while state.writer {
                    self.changed.wait_for(&mut state, self.poll_interval);
                }
                state.readers += giveup;
                self.changed.notify_all();
                return Err(error);
            }
            self.changed.wait_for(&mut state, self.poll_interval);
        }

        state.pending_writers -= 1;
        state.writer = true;
        state.write_acquired_at = Some(Instant::now());
        trace!("IndexLock: write lock acquired after {:?}", started.elapsed());
        Ok(())
    }

    /// Release the write lock, atomically re-establishing `establish_read_locks` read locks.
    /// Returns how long the write lock was held.
    pub fn release_write(&self, establish_read_locks: usize) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.writer {
            warn!("IndexLock: write lock released without being held");
            return None;
        }
        state.writer = false;
        state.readers += establish_read_locks;
        state.epoch += 1;
        state.waiting_readers = state.blocked_readers;
        let held = state.write_acquired_at.take().map(|at| at.elapsed());
        self.changed.notify_all();
        held
    }

    /// Let waiting readers in if the write lock has been held for at least `threshold`.
    ///
    /// `on_release` runs between release and reacquisition. Returns whether the lock was
    /// yielded; on error the write lock is no longer held.
    pub fn yield_write(
        &self,
        threshold: Duration,
        cancel: &CancellationToken,
        on_release: impl FnOnce(),
    ) -> Result<bool, StoreError> {
        if !self.should_yield(threshold) {
            return Ok(false);
        }
        let held = self.release_write(0);
        debug!("IndexLock: yielding write lock after {:?}", held);
        on_release();
        self.acquire_write(0, None, cancel)?;
        Ok(true)
    }

    fn should_yield(&self, threshold: Duration) -> bool {
        let state = self.state.lock();
        state.writer
            && state.blocked_readers > 0
            && state
                .write_acquired_at
                .is_some_and(|at| at.elapsed() >= threshold)
    }

    pub fn has_waiting_readers(&self) -> bool {
        self.state.lock().blocked_readers > 0
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer
    }

    pub fn read_lock_count(&self) -> usize {
        self.state.lock().readers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    fn lock() -> Arc<IndexLock> {
        Arc::new(IndexLock::new(Duration::from_millis(5)))
    }

    #[test]
    fn test_readers_share_the_lock() {
        let lock = lock();
        let cancel = CancellationToken::new();
        lock.acquire_read(&cancel).unwrap();
        lock.acquire_read(&cancel).unwrap();
        assert_eq!(lock.read_lock_count(), 2);
        lock.release_read();
        lock.release_read();
        assert_eq!(lock.read_lock_count(), 0);
    }

    #[test]
    fn test_release_without_acquire_is_ignored() {
        let lock = lock();
        lock.release_read();
        assert_eq!(lock.release_write(0), None);
        assert_eq!(lock.read_lock_count(), 0);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn test_writer_gives_up_own_read_locks() {
        let lock = lock();
        let cancel = CancellationToken::new();
        lock.acquire_read(&cancel).unwrap();
        lock.acquire_write(1, Some(Duration::from_secs(1)), &cancel)
            .unwrap();
        assert!(lock.is_write_locked());
        assert_eq!(lock.read_lock_count(), 0);

        lock.release_write(1);
        assert!(!lock.is_write_locked());
        assert_eq!(lock.read_lock_count(), 1);
        lock.release_read();
    }

    #[test]
    fn test_writer_times_out_behind_foreign_reader_and_keeps_read_locks() {
        let lock = lock();
        let cancel = CancellationToken::new();
        // one lock of ours, one of somebody else
        lock.acquire_read(&cancel).unwrap();
        lock.acquire_read(&cancel).unwrap();

        let result = lock.acquire_write(1, Some(Duration::from_millis(30)), &cancel);
        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
        assert_eq!(lock.read_lock_count(), 2);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn test_cancelled_reader_leaves_the_queue() {
        let lock = lock();
        let cancel = CancellationToken::new();
        lock.acquire_write(0, None, &cancel).unwrap();

        let reader_cancel = CancellationToken::new();
        let handle = {
            let lock = lock.clone();
            let reader_cancel = reader_cancel.clone();
            thread::spawn(move || lock.acquire_read(&reader_cancel))
        };
        while !lock.has_waiting_readers() {
            thread::sleep(Duration::from_millis(1));
        }
        reader_cancel.cancel();
        assert!(matches!(handle.join().unwrap(), Err(StoreError::Cancelled)));
        assert!(!lock.has_waiting_readers());

        lock.release_write(0);
        // nobody is waiting anymore, so a writer gets straight back in
        lock.acquire_write(0, Some(Duration::from_millis(100)), &cancel)
            .unwrap();
        lock.release_write(0);
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let lock = lock();
        let readers_inside = Arc::new(AtomicUsize::new(0));
        let writer_inside = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for worker in 0..6 {
            let lock = lock.clone();
            let readers_inside = readers_inside.clone();
            let writer_inside = writer_inside.clone();
            let violations = violations.clone();
            handles.push(thread::spawn(move || {
                let cancel = CancellationToken::new();
                for _ in 0..50 {
                    if worker % 3 == 0 {
                        lock.acquire_write(0, None, &cancel).unwrap();
                        if writer_inside.swap(true, Ordering::SeqCst)
                            || readers_inside.load(Ordering::SeqCst) > 0
                        {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        writer_inside.store(false, Ordering::SeqCst);
                        lock.release_write(0);
                    } else {
                        lock.acquire_read(&cancel).unwrap();
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        if writer_inside.load(Ordering::SeqCst) {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release_read();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(lock.read_lock_count(), 0);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn test_blocked_reader_goes_before_next_writer() {
        let lock = lock();
        let cancel = CancellationToken::new();
        lock.acquire_write(0, None, &cancel).unwrap();

        let reader_done = Arc::new(AtomicBool::new(false));
        let reader = {
            let lock = lock.clone();
            let reader_done = reader_done.clone();
            thread::spawn(move || {
                let cancel = CancellationToken::new();
                lock.acquire_read(&cancel).unwrap();
                thread::sleep(Duration::from_millis(20));
                reader_done.store(true, Ordering::SeqCst);
                lock.release_read();
            })
        };
        while !lock.has_waiting_readers() {
            thread::sleep(Duration::from_millis(1));
        }

        lock.release_write(0);
        lock.acquire_write(0, None, &cancel).unwrap();
        assert!(reader_done.load(Ordering::SeqCst));
        lock.release_write(0);
        reader.join().unwrap();
    }

    #[test]
    fn test_yield_lets_waiting_reader_finish() {
        let lock = lock();
        let cancel = CancellationToken::new();
        lock.acquire_write(0, None, &cancel).unwrap();

        // nobody waiting: no yield
        assert!(!lock.yield_write(Duration::ZERO, &cancel, || {}).unwrap());

        let reader_done = Arc::new(AtomicBool::new(false));
        let reader = {
            let lock = lock.clone();
            let reader_done = reader_done.clone();
            thread::spawn(move || {
                let cancel = CancellationToken::new();
                lock.acquire_read(&cancel).unwrap();
                reader_done.store(true, Ordering::SeqCst);
                lock.release_read();
            })
        };
        while !lock.has_waiting_readers() {
            thread::sleep(Duration::from_millis(1));
        }

        // below the threshold the writer keeps the lock
        assert!(
            !lock
                .yield_write(Duration::from_secs(60), &cancel, || {})
                .unwrap()
        );
        assert!(!reader_done.load(Ordering::SeqCst));

        thread::sleep(Duration::from_millis(15));
        let mut released = false;
        let yielded = lock
            .yield_write(Duration::from_millis(10), &cancel, || released = true)
            .unwrap();
        assert!(yielded);
        assert!(released);
        assert!(reader_done.load(Ordering::SeqCst));
        assert!(lock.is_write_locked());
        lock.release_write(0);
        reader.join().unwrap();
    }
}
