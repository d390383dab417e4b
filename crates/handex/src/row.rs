//! Row storage: parallel per-slot arrays plus the free-index stack.
//!
//! A row holds three parallel sequences of equal fill — payloads, 8-bit
//! signatures, and the cached primary hash of each slot — and a stack of
//! vacated slot indices. Slot 0 of row 0 is the null sentinel and is never
//! issued as a handle.
//!
//! Capacity is managed explicitly: the arrays are reallocated along a square
//! progression (next capacity `(⌈√cur⌉+1)²`) up to the store's row threshold,
//! copying the live prefix under the row's writer lock.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use handex_error::Result;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::lock::RowLock;
use crate::signature;

/// An interned payload. Cloning shares the allocation.
pub type Payload = Arc<[u8]>;

/// The empty payload: the null sentinel and the marker for vacated slots.
/// The store never interns it, so vacancy and payload never collide.
#[must_use]
pub fn empty_payload() -> Payload {
    Payload::from(&b""[..])
}

/// Point-in-time shape of one row, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RowStats {
    /// Slots in the live prefix, vacated holes included.
    pub fill: u32,
    /// Allocated slots.
    pub capacity: u32,
    /// Depth of the free-index stack.
    pub free: u32,
}

// ---------------------------------------------------------------------------
// RowCells
// ---------------------------------------------------------------------------

/// The parallel slot arrays of one row.
///
/// `fill` is the length of the live prefix. A slot inside the prefix whose
/// payload is empty is a hole left by a vertical enlargement move; its index
/// sits on the free stack until an insert reuses it.
#[derive(Debug)]
pub struct RowCells {
    values: Vec<Payload>,
    signatures: Vec<u8>,
    hashes: Vec<u32>,
    free: Vec<u32>,
    capacity: u32,
}

impl RowCells {
    /// Allocate an empty row with the given slot capacity.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            values: Vec::with_capacity(capacity as usize),
            signatures: Vec::with_capacity(capacity as usize),
            hashes: Vec::with_capacity(capacity as usize),
            free: Vec::new(),
            capacity,
        }
    }

    /// Length of the live prefix, holes included.
    #[inline]
    #[must_use]
    pub fn fill(&self) -> u32 {
        self.values.len() as u32
    }

    /// Allocated slot capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Depth of the free-index stack.
    #[inline]
    #[must_use]
    pub fn free_depth(&self) -> u32 {
        self.free.len() as u32
    }

    #[must_use]
    pub fn stats(&self) -> RowStats {
        RowStats {
            fill: self.fill(),
            capacity: self.capacity(),
            free: self.free_depth(),
        }
    }

    /// Whether the slot inside the live prefix holds no value.
    #[inline]
    #[must_use]
    pub fn is_vacant(&self, index: u32) -> bool {
        self.values[index as usize].is_empty()
    }

    /// Cached primary hash of a slot.
    #[inline]
    #[must_use]
    pub fn hash_at(&self, index: u32) -> u32 {
        self.hashes[index as usize]
    }

    /// Shared clone of the payload at `index`, or `None` for a slot outside
    /// the live prefix or a vacated hole.
    #[must_use]
    pub fn payload(&self, index: u32) -> Option<Payload> {
        let slot = self.values.get(index as usize)?;
        if slot.is_empty() {
            return None;
        }
        Some(Arc::clone(slot))
    }

    /// Find `bytes` in this row: signature candidates in ascending slot
    /// order, then payload equality. Holes never match because the empty
    /// payload is never searched for.
    #[must_use]
    pub fn find(&self, needle_signature: u8, bytes: &[u8]) -> Option<u32> {
        debug_assert!(!bytes.is_empty(), "the null value is resolved by the store");
        signature::candidates(&self.signatures, needle_signature)
            .find(|&i| self.values[i as usize].as_ref() == bytes)
    }

    /// Pop the most recently vacated slot index, if any.
    pub fn pop_free(&mut self) -> Option<u32> {
        self.free.pop()
    }

    /// Record a vacated slot index for reuse.
    pub fn push_free(&mut self, index: u32) {
        debug_assert!(index < self.fill());
        self.free.push(index);
    }

    /// Write a value into a previously vacated slot.
    pub fn place(&mut self, index: u32, payload: Payload, signature: u8, hash: u32) {
        debug_assert!(self.is_vacant(index), "placing into an occupied slot");
        let at = index as usize;
        self.values[at] = payload;
        self.signatures[at] = signature;
        self.hashes[at] = hash;
    }

    /// Append a value to the live prefix, returning its slot index.
    /// The caller has already ensured `fill < capacity`.
    pub fn append(&mut self, payload: Payload, signature: u8, hash: u32) -> u32 {
        debug_assert!(self.fill() < self.capacity, "append past row capacity");
        let index = self.fill();
        self.values.push(payload);
        self.signatures.push(signature);
        self.hashes.push(hash);
        index
    }

    /// Empty a slot for a move, returning its contents and leaving a hole.
    pub fn take(&mut self, index: u32) -> (Payload, u8, u32) {
        debug_assert!(!self.is_vacant(index), "taking from a vacant slot");
        let at = index as usize;
        let payload = std::mem::replace(&mut self.values[at], empty_payload());
        let signature = std::mem::replace(&mut self.signatures[at], 0);
        let hash = std::mem::replace(&mut self.hashes[at], 0);
        (payload, signature, hash)
    }

    /// Extend the live prefix with holes until `fill == target`, recording
    /// each hole on the free stack. Used when an enlargement move must land
    /// a value at a fixed slot index in a sparse destination row.
    pub fn extend_with_holes(&mut self, target: u32) {
        debug_assert!(target <= self.capacity);
        while self.fill() < target {
            let hole = self.append(empty_payload(), 0, 0);
            self.free.push(hole);
        }
    }

    /// Replace the slot arrays with larger ones, copying the live prefix.
    pub fn grow_to(&mut self, new_capacity: u32) {
        debug_assert!(new_capacity > self.capacity);
        let mut values = Vec::with_capacity(new_capacity as usize);
        let mut signatures = Vec::with_capacity(new_capacity as usize);
        let mut hashes = Vec::with_capacity(new_capacity as usize);
        values.extend(self.values.drain(..));
        signatures.extend_from_slice(&self.signatures);
        hashes.extend_from_slice(&self.hashes);
        self.values = values;
        self.signatures = signatures;
        self.hashes = hashes;
        self.capacity = new_capacity;
    }
}

/// Next step of the square capacity progression: `(⌈√current⌉ + 1)²`.
#[must_use]
pub fn next_capacity(current: u32) -> u32 {
    let root = current.isqrt();
    let ceil_root = if root * root == current { root } else { root + 1 };
    (ceil_root + 1).pow(2)
}

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// One bucket of the store: the byte lock plus the cell arrays.
///
/// The byte lock is authoritative for admission — writer bit, 7-bit reader
/// count, released broadcast. The inner `RwLock` only materializes the
/// admitted borrow and is never contended beyond what the byte lock admits.
#[derive(Debug)]
pub struct Row {
    lock: RowLock,
    cells: RwLock<RowCells>,
}

impl Row {
    /// Allocate an empty row with the given slot capacity.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            lock: RowLock::new(),
            cells: RwLock::new(RowCells::new(capacity)),
        }
    }

    /// The row's byte lock (diagnostics).
    #[must_use]
    pub fn lock(&self) -> &RowLock {
        &self.lock
    }

    /// Admit a reader and borrow the cells, waiting until `deadline`.
    pub fn read(&self, deadline: Option<Instant>) -> Result<RowReadGuard<'_>> {
        self.lock.enter_read(deadline)?;
        Ok(RowReadGuard {
            lock: &self.lock,
            cells: Some(self.cells.read()),
        })
    }

    /// Admit the writer and borrow the cells mutably, waiting until
    /// `deadline`.
    pub fn write(&self, deadline: Option<Instant>) -> Result<RowWriteGuard<'_>> {
        self.lock.enter_write(deadline)?;
        Ok(RowWriteGuard {
            lock: &self.lock,
            cells: Some(self.cells.write()),
        })
    }

    /// Direct cell access for callers holding exclusive storage access,
    /// where no row admission can race.
    pub fn cells_mut(&mut self) -> &mut RowCells {
        self.cells.get_mut()
    }
}

/// Shared borrow of a row's cells; releases the reader admission on drop.
pub struct RowReadGuard<'a> {
    lock: &'a RowLock,
    cells: Option<RwLockReadGuard<'a, RowCells>>,
}

impl Deref for RowReadGuard<'_> {
    type Target = RowCells;

    fn deref(&self) -> &RowCells {
        self.cells.as_ref().expect("guard holds cells until drop")
    }
}

impl Drop for RowReadGuard<'_> {
    fn drop(&mut self) {
        // Release the borrow before the admission so a drained writer can
        // take the inner lock immediately.
        self.cells.take();
        self.lock.exit_read();
    }
}

/// Exclusive borrow of a row's cells; releases the writer admission on drop.
pub struct RowWriteGuard<'a> {
    lock: &'a RowLock,
    cells: Option<RwLockWriteGuard<'a, RowCells>>,
}

impl Deref for RowWriteGuard<'_> {
    type Target = RowCells;

    fn deref(&self) -> &RowCells {
        self.cells.as_ref().expect("guard holds cells until drop")
    }
}

impl DerefMut for RowWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut RowCells {
        self.cells.as_mut().expect("guard holds cells until drop")
    }
}

impl Drop for RowWriteGuard<'_> {
    fn drop(&mut self) {
        self.cells.take();
        self.lock.exit_write();
    }
}
