//! Byte-encoded reader/writer lock for one row.
//!
//! The lock state is a single byte: the high bit records a present writer,
//! the low seven bits count admitted readers (at most 127). All transitions
//! are CAS loops on that byte.
//!
//! ## Protocol
//!
//! - **Acquire read**: admitted while the writer bit is clear and the reader
//!   count is below the cap; otherwise wait for the row-released signal and
//!   retry.
//! - **Acquire write**: claim the writer bit while it is clear; from then on
//!   no new readers are admitted. The writer then waits until the reader
//!   count drains to zero before it may mutate.
//! - **Release** (either side): undo the state bits and broadcast the
//!   row-released signal so every waiter reconsiders.
//!
//! Waiters park on a condition variable; the broadcast on every state change
//! is the primary wakeup and a short wait slice bounds any residual race.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use handex_error::{HandexError, Result};
use parking_lot::{Condvar, Mutex};

/// Writer-present flag.
const WRITER_BIT: u8 = 0x80;
/// Reader-count bits.
const READER_MASK: u8 = 0x7F;
/// Maximum concurrent readers on one row.
pub const MAX_READERS: u8 = 127;

/// Safety-net poll while parked; the released broadcast is the primary
/// wakeup.
const WAIT_SLICE: Duration = Duration::from_micros(100);

/// Single-byte reader/writer lock with condition-variable wakeup.
#[derive(Debug)]
pub struct RowLock {
    /// Authoritative admission state: writer bit plus reader count.
    state: AtomicU8,
    /// Waiters park here.
    monitor: Mutex<()>,
    /// Broadcast on every release.
    released: Condvar,
}

impl Default for RowLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RowLock {
    /// Create an idle lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            monitor: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    /// Current reader count (diagnostics).
    #[must_use]
    pub fn readers(&self) -> u8 {
        self.state.load(Ordering::Acquire) & READER_MASK
    }

    /// Whether a writer currently holds or is draining the lock (diagnostics).
    #[must_use]
    pub fn has_writer(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITER_BIT != 0
    }

    /// Admit a reader, waiting until `deadline` if contended.
    pub fn enter_read(&self, deadline: Option<Instant>) -> Result<()> {
        if self.try_enter_read() {
            return Ok(());
        }
        let began = Instant::now();
        let mut parked = self.monitor.lock();
        loop {
            if self.try_enter_read() {
                return Ok(());
            }
            self.park(&mut parked, deadline, began)?;
        }
    }

    /// Admit the writer, waiting until `deadline` for the bit and for the
    /// readers to drain. On timeout the claim is rolled back and the lock is
    /// unchanged.
    pub fn enter_write(&self, deadline: Option<Instant>) -> Result<()> {
        let began = Instant::now();
        // Phase 1: claim the writer bit. This shuts out new readers.
        if !self.try_claim_writer() {
            let mut parked = self.monitor.lock();
            loop {
                if self.try_claim_writer() {
                    break;
                }
                self.park(&mut parked, deadline, began)?;
            }
        }
        // Phase 2: wait for admitted readers to drain.
        if self.readers() == 0 {
            return Ok(());
        }
        let mut parked = self.monitor.lock();
        loop {
            if self.readers() == 0 {
                return Ok(());
            }
            if let Err(err) = self.park(&mut parked, deadline, began) {
                self.exit_write();
                return Err(err);
            }
        }
    }

    /// Release a reader admission.
    pub fn exit_read(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & READER_MASK != 0, "reader release without reader");
        self.broadcast();
    }

    /// Release the writer.
    pub fn exit_write(&self) {
        let prev = self.state.fetch_and(!WRITER_BIT, Ordering::AcqRel);
        debug_assert!(prev & WRITER_BIT != 0, "writer release without writer");
        self.broadcast();
    }

    fn try_enter_read(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & WRITER_BIT != 0 || state & READER_MASK == MAX_READERS {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => state = current,
            }
        }
    }

    fn try_claim_writer(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & WRITER_BIT != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state | WRITER_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => state = current,
            }
        }
    }

    /// Park on the released signal for one slice, honoring `deadline`.
    ///
    /// The caller must re-check its admission condition after return; the
    /// monitor is held across the state check and the wait so a release
    /// between the two cannot be missed.
    fn park(
        &self,
        parked: &mut parking_lot::MutexGuard<'_, ()>,
        deadline: Option<Instant>,
        began: Instant,
    ) -> Result<()> {
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(HandexError::LockTimeout {
                        waited: now.duration_since(began),
                    });
                }
                let until = deadline.min(now + WAIT_SLICE);
                let _ = self.released.wait_until(parked, until);
            }
            None => {
                let _ = self.released.wait_for(parked, WAIT_SLICE);
            }
        }
        Ok(())
    }

    /// Wake every waiter. Locking the monitor first pairs with the waiters'
    /// check-then-wait under the same monitor.
    fn broadcast(&self) {
        drop(self.monitor.lock());
        self.released.notify_all();
    }
}
