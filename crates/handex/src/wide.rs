//! Wide store: 64-bit handles, up to 2³¹ rows.
//!
//! Every operation fingerprints the value, takes a storage read lease, then
//! a row lock. `add` runs a find under the row's writer lock to collapse
//! races, and escalates to the enlargement engine when the target row is at
//! the row threshold with no reusable slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use handex_error::{HandexError, HandleFault, Result};
use handex_types::limits::wide;
use handex_types::{Fingerprint, WideHandle};
use parking_lot::RwLockReadGuard;
use tracing::{debug, info, warn};

use crate::broker::{Directory, StorageBroker};
use crate::grow;
use crate::hash::{Fingerprinter, XxPearson};
use crate::metrics::{Counters, StoreMetrics};
use crate::row::{self, Payload, RowStats};

/// Outcome of one placement attempt under a read lease.
enum Placed {
    Handle(WideHandle),
    /// The target row is at the row threshold with no free slot; the store
    /// must grow vertically past `bit_width` before retrying.
    RowFull { bit_width: u8 },
}

/// Interner for immutable byte payloads, issuing 64-bit handles.
///
/// The empty payload is the null value: it interns to [`WideHandle::NULL`]
/// and is never stored. Handles stay valid for the lifetime of the store.
#[derive(Debug)]
pub struct WideStore<F = XxPearson> {
    broker: StorageBroker,
    fingerprinter: F,
    /// Slot capacity of a freshly allocated row, fixed at construction.
    initial_row_capacity: u32,
    /// Per-operation lock deadline; `None` blocks indefinitely.
    lock_timeout: Option<Duration>,
    /// User-inserted values, null sentinel excluded.
    count: AtomicU64,
    counters: Counters,
}

impl WideStore {
    /// Create a store with the default bit width.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bit_width(wide::BIT_WIDTH_DEFAULT)
    }

    /// Create a store with the given bit width, silently clamped to the
    /// supported range.
    #[must_use]
    pub fn with_bit_width(bit_width: u8) -> Self {
        Self::with_fingerprinter(bit_width, XxPearson)
    }
}

impl Default for WideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Fingerprinter> WideStore<F> {
    /// Create a store with a custom fingerprinter.
    pub fn with_fingerprinter(bit_width: u8, fingerprinter: F) -> Self {
        let clamped = wide::clamp_bit_width(bit_width);
        info!(requested = bit_width, bit_width = clamped, "wide store created");
        Self {
            broker: StorageBroker::new(clamped),
            fingerprinter,
            initial_row_capacity: wide::row_threshold(clamped) / 2,
            lock_timeout: None,
            count: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Set the per-operation lock deadline. `None` (the default) blocks
    /// until the lock is granted.
    pub fn set_lock_timeout(&mut self, timeout: Option<Duration>) {
        self.lock_timeout = timeout;
    }

    /// Intern `value`, returning its handle. Returns the existing handle if
    /// the value is already present; the empty payload maps to the null
    /// handle without touching the store.
    pub fn add(&self, value: &[u8]) -> Result<WideHandle> {
        if value.is_empty() {
            return Ok(WideHandle::NULL);
        }
        self.counters.bump_adds();
        let fingerprint = self.fingerprinter.fingerprint(value);
        loop {
            match self.try_place(fingerprint, value)? {
                Placed::Handle(handle) => return Ok(handle),
                Placed::RowFull { bit_width } if bit_width >= wide::BIT_WIDTH_MAX => {
                    warn!(bit_width, "row saturated at maximum bit width");
                    return Err(HandexError::OutOfCapacity { bit_width });
                }
                Placed::RowFull { bit_width } => self.enlarge_from(bit_width)?,
            }
        }
    }

    /// Handle of `value`, or the null handle if it was never interned.
    pub fn find(&self, value: &[u8]) -> Result<WideHandle> {
        if value.is_empty() {
            return Ok(WideHandle::NULL);
        }
        let fingerprint = self.fingerprinter.fingerprint(value);
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let handex = fingerprint.handex(dir.hash_mask());
        let Some(row) = dir.row(handex) else {
            return Ok(WideHandle::NULL);
        };
        let cells = self.checked(row.read(deadline))?;
        Ok(cells
            .find(fingerprint.signature, value)
            .map_or(WideHandle::NULL, |index| WideHandle::pack(handex, index)))
    }

    /// Whether `value` is interned. The null value never is.
    pub fn contains(&self, value: &[u8]) -> Result<bool> {
        Ok(!self.find(value)?.is_null())
    }

    /// The payload a handle addresses, or `None` for the null handle and for
    /// handles that do not address a live slot (tolerant accessor).
    pub fn get(&self, handle: WideHandle) -> Result<Option<Payload>> {
        if handle.is_null() {
            return Ok(None);
        }
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let Some(row) = dir.row(handle.row()) else {
            return Ok(None);
        };
        let cells = self.checked(row.read(deadline))?;
        if handle.index() >= cells.fill() {
            return Ok(None);
        }
        Ok(cells.payload(handle.index()))
    }

    /// The payload a handle addresses, rejecting handles that do not address
    /// a live slot (strict accessor).
    pub fn fetch(&self, handle: WideHandle) -> Result<Payload> {
        if handle.is_null() {
            return Err(HandexError::invalid_handle(handle.get(), HandleFault::Null));
        }
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let Some(row) = dir.row(handle.row()) else {
            return Err(HandexError::invalid_handle(
                handle.get(),
                HandleFault::RowOutOfRange,
            ));
        };
        let cells = self.checked(row.read(deadline))?;
        if handle.index() >= cells.fill() {
            return Err(HandexError::invalid_handle(
                handle.get(),
                HandleFault::IndexOutOfRange,
            ));
        }
        cells
            .payload(handle.index())
            .ok_or_else(|| HandexError::invalid_handle(handle.get(), HandleFault::Vacant))
    }

    /// Number of user-inserted values, null sentinel excluded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Current bit width.
    pub fn bit_width(&self) -> u8 {
        self.broker.read().bit_width()
    }

    /// Current number of addressable rows.
    pub fn row_count(&self) -> usize {
        self.broker.read().row_count()
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> StoreMetrics {
        self.counters.snapshot()
    }

    /// Shape of the row at `handex`, or `None` if it was never allocated.
    pub fn row_stats(&self, handex: u32) -> Option<RowStats> {
        let dir = self.broker.read();
        let row = dir.row(handex)?;
        let cells = row.read(None).ok()?;
        Some(cells.stats())
    }

    /// One placement attempt: find-or-insert under the target row's writer
    /// lock.
    fn try_place(&self, fingerprint: Fingerprint, value: &[u8]) -> Result<Placed> {
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let handex = fingerprint.handex(dir.hash_mask());
        let row = dir.row_or_init(handex, self.initial_row_capacity);
        let mut cells = self.checked(row.write(deadline))?;

        if let Some(index) = cells.find(fingerprint.signature, value) {
            self.counters.bump_dedup_hits();
            return Ok(Placed::Handle(WideHandle::pack(handex, index)));
        }
        if let Some(index) = cells.pop_free() {
            cells.place(
                index,
                Payload::from(value),
                fingerprint.signature,
                fingerprint.hash,
            );
            self.count.fetch_add(1, Ordering::Relaxed);
            return Ok(Placed::Handle(WideHandle::pack(handex, index)));
        }
        let threshold = wide::row_threshold(dir.bit_width());
        if cells.fill() < threshold {
            if cells.fill() == cells.capacity() {
                let next = row::next_capacity(cells.capacity()).min(threshold);
                cells.grow_to(next);
                self.counters.bump_horizontal_growths();
                debug!(handex, capacity = next, "row capacity grown");
            }
            let index = cells.append(
                Payload::from(value),
                fingerprint.signature,
                fingerprint.hash,
            );
            self.count.fetch_add(1, Ordering::Relaxed);
            return Ok(Placed::Handle(WideHandle::pack(handex, index)));
        }
        Ok(Placed::RowFull {
            bit_width: dir.bit_width(),
        })
    }

    /// Grow the store past `bit_width`, unless another thread already has.
    fn enlarge_from(&self, bit_width: u8) -> Result<()> {
        let deadline = self.deadline();
        let mut dir = self.checked(self.broker.write_access(deadline))?;
        if dir.bit_width() != bit_width {
            return Ok(());
        }
        let outcome = grow::split_directory(&mut dir);
        self.counters.bump_vertical_growths();
        info!(
            bit_width = outcome.bit_width,
            moved = outcome.moved,
            rows = dir.row_count(),
            "store enlarged vertically"
        );
        Ok(())
    }

    fn deadline(&self) -> Option<Instant> {
        self.lock_timeout.map(|timeout| Instant::now() + timeout)
    }

    fn lease(&self, deadline: Option<Instant>) -> Result<RwLockReadGuard<'_, Directory>> {
        self.checked(self.broker.read_lease(deadline))
    }

    /// Record lock timeouts in the metrics as they surface.
    fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(HandexError::LockTimeout { .. }) = &result {
            self.counters.bump_lock_timeouts();
        }
        result
    }
}
