//! Short store: 32-bit handles, up to 2²⁴ rows, 8-bit row index.
//!
//! Below the maximum bit width the short store behaves like a compact wide
//! store. Once the bit width reaches its maximum the row threshold equals
//! the 8-bit index space and the store enters the overflow regime: a full
//! primary row spills into three deterministically derived alternate rows,
//! and lookups consult all four in priority order (primary, then the
//! complement, the rotation, the rotated complement).
//!
//! In the overflow regime an insert write-locks every candidate row in
//! ascending row order, so two inserts with overlapping candidate sets can
//! never deadlock, and the find-under-lock sees all four rows at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use handex_error::{HandexError, HandleFault, Result};
use handex_types::limits::short;
use handex_types::{Fingerprint, ShortHandle};
use parking_lot::RwLockReadGuard;
use tracing::{debug, info, warn};

use crate::broker::{Directory, StorageBroker};
use crate::grow;
use crate::hash::{Fingerprinter, XxPearson};
use crate::metrics::{Counters, StoreMetrics};
use crate::row::{self, Payload, RowStats, RowWriteGuard};

/// Slot capacity of a freshly allocated row. Rows stay tiny until the
/// square progression grows them.
const INITIAL_ROW_CAPACITY: u32 = 1;

/// Outcome of one placement attempt under a read lease.
enum Placed {
    Handle(ShortHandle),
    /// The target row is at the row threshold with no free slot; the store
    /// must grow vertically past `bit_width` before retrying. Never produced
    /// in the overflow regime.
    RowFull { bit_width: u8 },
}

/// Primary row plus its three alternates, in search priority order.
fn candidate_rows(row: u32, hash_mask: u32) -> [u32; 4] {
    let rotated = ((row << 12) | (row >> 12)) & hash_mask;
    [row, !row & hash_mask, rotated, !rotated & hash_mask]
}

/// Whether full rows spill into their alternates instead of growing the
/// store. Holds exactly when the row threshold covers the 8-bit index space,
/// which happens at the maximum bit width.
fn overflow_mode(dir: &Directory) -> bool {
    short::row_threshold(dir.bit_width()) >= short::INDEX_LIMIT
}

fn slot_index(index: u32) -> u8 {
    u8::try_from(index).expect("short row index fits in 8 bits")
}

/// Interner for immutable byte payloads, issuing 32-bit handles.
///
/// The empty payload is the null value: it interns to [`ShortHandle::NULL`]
/// and is never stored. Handles stay valid for the lifetime of the store.
#[derive(Debug)]
pub struct ShortStore<F = XxPearson> {
    broker: StorageBroker,
    fingerprinter: F,
    /// Per-operation lock deadline; `None` blocks indefinitely.
    lock_timeout: Option<Duration>,
    /// User-inserted values, null sentinel excluded.
    count: AtomicU64,
    counters: Counters,
}

impl ShortStore {
    /// Create a store with the default bit width.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bit_width(short::BIT_WIDTH_DEFAULT)
    }

    /// Create a store with the given bit width, silently clamped to the
    /// supported range.
    #[must_use]
    pub fn with_bit_width(bit_width: u8) -> Self {
        Self::with_fingerprinter(bit_width, XxPearson)
    }
}

impl Default for ShortStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Fingerprinter> ShortStore<F> {
    /// Create a store with a custom fingerprinter.
    pub fn with_fingerprinter(bit_width: u8, fingerprinter: F) -> Self {
        let clamped = short::clamp_bit_width(bit_width);
        info!(requested = bit_width, bit_width = clamped, "short store created");
        Self {
            broker: StorageBroker::new(clamped),
            fingerprinter,
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
    ///
    /// Fails with [`HandexError::OutOfCapacity`] when the store is at its
    /// maximum bit width and all four candidate rows are full.
    pub fn add(&self, value: &[u8]) -> Result<ShortHandle> {
        if value.is_empty() {
            return Ok(ShortHandle::NULL);
        }
        self.counters.bump_adds();
        let fingerprint = self.fingerprinter.fingerprint(value);
        loop {
            match self.try_place(fingerprint, value)? {
                Placed::Handle(handle) => return Ok(handle),
                Placed::RowFull { bit_width } => self.enlarge_from(bit_width)?,
            }
        }
    }

    /// Handle of `value`, or the null handle if it was never interned.
    pub fn find(&self, value: &[u8]) -> Result<ShortHandle> {
        if value.is_empty() {
            return Ok(ShortHandle::NULL);
        }
        let fingerprint = self.fingerprinter.fingerprint(value);
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let primary = fingerprint.handex(dir.hash_mask());
        if overflow_mode(&dir) {
            for row_id in candidate_rows(primary, dir.hash_mask()) {
                if let Some(handle) = self.find_in_row(&dir, row_id, fingerprint, value, deadline)?
                {
                    return Ok(handle);
                }
            }
            return Ok(ShortHandle::NULL);
        }
        Ok(self
            .find_in_row(&dir, primary, fingerprint, value, deadline)?
            .unwrap_or(ShortHandle::NULL))
    }

    /// Whether `value` is interned. The null value never is.
    pub fn contains(&self, value: &[u8]) -> Result<bool> {
        Ok(!self.find(value)?.is_null())
    }

    /// The payload a handle addresses, or `None` for the null handle and for
    /// handles that do not address a live slot (tolerant accessor).
    pub fn get(&self, handle: ShortHandle) -> Result<Option<Payload>> {
        if handle.is_null() {
            return Ok(None);
        }
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let Some(row) = dir.row(handle.row()) else {
            return Ok(None);
        };
        let cells = self.checked(row.read(deadline))?;
        let index = u32::from(handle.index());
        if index >= cells.fill() {
            return Ok(None);
        }
        Ok(cells.payload(index))
    }

    /// The payload a handle addresses, rejecting handles that do not address
    /// a live slot (strict accessor).
    pub fn fetch(&self, handle: ShortHandle) -> Result<Payload> {
        let raw = u64::from(handle.get());
        if handle.is_null() {
            return Err(HandexError::invalid_handle(raw, HandleFault::Null));
        }
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let Some(row) = dir.row(handle.row()) else {
            return Err(HandexError::invalid_handle(raw, HandleFault::RowOutOfRange));
        };
        let cells = self.checked(row.read(deadline))?;
        let index = u32::from(handle.index());
        if index >= cells.fill() {
            return Err(HandexError::invalid_handle(
                raw,
                HandleFault::IndexOutOfRange,
            ));
        }
        cells
            .payload(index)
            .ok_or_else(|| HandexError::invalid_handle(raw, HandleFault::Vacant))
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

    fn find_in_row(
        &self,
        dir: &Directory,
        row_id: u32,
        fingerprint: Fingerprint,
        value: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Option<ShortHandle>> {
        let Some(row) = dir.row(row_id) else {
            return Ok(None);
        };
        let cells = self.checked(row.read(deadline))?;
        Ok(cells
            .find(fingerprint.signature, value)
            .map(|index| ShortHandle::pack(row_id, slot_index(index))))
    }

    /// One placement attempt: find-or-insert under the target row's writer
    /// lock, spilling into alternates in the overflow regime.
    fn try_place(&self, fingerprint: Fingerprint, value: &[u8]) -> Result<Placed> {
        let deadline = self.deadline();
        let dir = self.lease(deadline)?;
        let primary = fingerprint.handex(dir.hash_mask());
        if overflow_mode(&dir) {
            return self.place_with_overflow(&dir, primary, fingerprint, value, deadline);
        }

        let row = dir.row_or_init(primary, INITIAL_ROW_CAPACITY);
        let mut cells = self.checked(row.write(deadline))?;

        if let Some(index) = cells.find(fingerprint.signature, value) {
            self.counters.bump_dedup_hits();
            return Ok(Placed::Handle(ShortHandle::pack(primary, slot_index(index))));
        }
        if let Some(index) = cells.pop_free() {
            cells.place(
                index,
                Payload::from(value),
                fingerprint.signature,
                fingerprint.hash,
            );
            self.count.fetch_add(1, Ordering::Relaxed);
            return Ok(Placed::Handle(ShortHandle::pack(primary, slot_index(index))));
        }
        let threshold = short::row_threshold(dir.bit_width());
        if cells.fill() < threshold {
            if cells.fill() == cells.capacity() {
                let next = row::next_capacity(cells.capacity()).min(threshold);
                cells.grow_to(next);
                self.counters.bump_horizontal_growths();
                debug!(handex = primary, capacity = next, "row capacity grown");
            }
            let index = cells.append(
                Payload::from(value),
                fingerprint.signature,
                fingerprint.hash,
            );
            self.count.fetch_add(1, Ordering::Relaxed);
            return Ok(Placed::Handle(ShortHandle::pack(primary, slot_index(index))));
        }
        Ok(Placed::RowFull {
            bit_width: dir.bit_width(),
        })
    }

    /// Overflow-regime placement across the four candidate rows.
    fn place_with_overflow(
        &self,
        dir: &Directory,
        primary: u32,
        fingerprint: Fingerprint,
        value: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Placed> {
        let priority = candidate_rows(primary, dir.hash_mask());

        // Lock in ascending row order; concurrent inserts with overlapping
        // candidate sets then cannot deadlock.
        let mut lock_order = priority.to_vec();
        lock_order.sort_unstable();
        lock_order.dedup();
        let mut guards: Vec<(u32, RowWriteGuard<'_>)> = Vec::with_capacity(lock_order.len());
        for row_id in lock_order {
            let row = dir.row_or_init(row_id, INITIAL_ROW_CAPACITY);
            guards.push((row_id, self.checked(row.write(deadline))?));
        }

        // Find-under-lock across every candidate, in priority order.
        for &row_id in &priority {
            let (_, cells) = guards
                .iter()
                .find(|(id, _)| *id == row_id)
                .expect("candidate row is locked");
            if let Some(index) = cells.find(fingerprint.signature, value) {
                self.counters.bump_dedup_hits();
                return Ok(Placed::Handle(ShortHandle::pack(row_id, slot_index(index))));
            }
        }

        // Insert into the first candidate with room.
        let threshold = short::row_threshold(dir.bit_width());
        for &row_id in &priority {
            let (_, cells) = guards
                .iter_mut()
                .find(|(id, _)| *id == row_id)
                .expect("candidate row is locked");
            if let Some(index) = cells.pop_free() {
                cells.place(
                    index,
                    Payload::from(value),
                    fingerprint.signature,
                    fingerprint.hash,
                );
                self.count.fetch_add(1, Ordering::Relaxed);
                return Ok(Placed::Handle(ShortHandle::pack(row_id, slot_index(index))));
            }
            if cells.fill() < threshold {
                if cells.fill() == cells.capacity() {
                    let next = row::next_capacity(cells.capacity()).min(threshold);
                    cells.grow_to(next);
                    self.counters.bump_horizontal_growths();
                }
                let index = cells.append(
                    Payload::from(value),
                    fingerprint.signature,
                    fingerprint.hash,
                );
                self.count.fetch_add(1, Ordering::Relaxed);
                return Ok(Placed::Handle(ShortHandle::pack(row_id, slot_index(index))));
            }
        }

        warn!(
            primary,
            bit_width = dir.bit_width(),
            "all candidate rows full"
        );
        Err(HandexError::OutOfCapacity {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_clamps_bit_width() {
        assert_eq!(ShortStore::new().bit_width(), 10);
        assert_eq!(ShortStore::with_bit_width(0).bit_width(), 9);
        assert_eq!(ShortStore::with_bit_width(14).bit_width(), 14);
    }

    #[test]
    fn add_find_get_round_trip() {
        let store = ShortStore::new();
        let handle = store.add(b"interned").unwrap();
        assert!(!handle.is_null());
        assert_eq!(store.find(b"interned").unwrap(), handle);
        assert_eq!(store.get(handle).unwrap().unwrap().as_ref(), b"interned");
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn null_value_behavior() {
        let store = ShortStore::new();
        assert_eq!(store.add(b"").unwrap(), ShortHandle::NULL);
        assert_eq!(store.find(b"").unwrap(), ShortHandle::NULL);
        assert!(!store.contains(b"").unwrap());
        assert_eq!(store.get(ShortHandle::NULL).unwrap(), None);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn add_deduplicates() {
        let store = ShortStore::new();
        let first = store.add(b"same").unwrap();
        let second = store.add(b"same").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn tiny_rows_grow_vertically() {
        // At bit width 9 the row threshold is a single slot, so a couple of
        // collisions in any row force a doubling.
        let store = ShortStore::with_bit_width(9);
        let mut handles = Vec::new();
        for i in 0..64u32 {
            let value = format!("value-{i}");
            handles.push((value.clone(), store.add(value.as_bytes()).unwrap()));
        }
        assert!(store.bit_width() > 9, "collisions must have forced growth");
        assert_eq!(store.count(), 64);
        for (value, handle) in handles {
            assert_eq!(
                store.get(handle).unwrap().unwrap().as_ref(),
                value.as_bytes(),
                "handle for {value} must survive growth"
            );
            assert_eq!(store.find(value.as_bytes()).unwrap(), handle);
        }
    }

    #[test]
    fn candidate_rows_are_deterministic() {
        let mask = 0x00FF_FFFF;
        let rows = candidate_rows(0x0000_1234, mask);
        assert_eq!(rows[0], 0x0000_1234);
        assert_eq!(rows[1], 0x00FF_EDCB);
        assert_eq!(rows[2], 0x0023_4001, "12-bit rotation of a 24-bit row");
        assert_eq!(rows[3], 0x00DC_BFFE);
        // Derivation is an involution on the complement pair.
        assert_eq!(candidate_rows(rows[1], mask)[1], rows[0]);
    }
}
