//! Store-wide directory and the global read/write gate.
//!
//! The directory owns the outer row vector together with the `bitWidth` /
//! `hashMask` pair it was sized for; the three only ever change together,
//! under exclusive write access. Every row operation holds a read lease for
//! its whole duration, so the row references it works with cannot be torn by
//! a vertical enlargement. Leases are always taken before any row lock, and
//! the enlargement engine never takes a row lock at all, which rules out
//! lock-order cycles between the two levels.

use std::sync::OnceLock;
use std::time::Instant;

use handex_error::{HandexError, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::row::{Row, RowCells, empty_payload};

/// Lazily initialized slot in the outer row vector. Rows are boxed so the
/// vector stays cheap to double when the store grows vertically.
pub type RowSlot = OnceLock<Box<Row>>;

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// The outer row vector plus the mask/width pair it was sized for.
#[derive(Debug)]
pub struct Directory {
    pub(crate) rows: Vec<RowSlot>,
    pub(crate) bit_width: u8,
    pub(crate) hash_mask: u32,
}

impl Directory {
    /// Allocate a directory with `2^bit_width` empty row slots.
    #[must_use]
    pub fn new(bit_width: u8) -> Self {
        let row_count = 1usize << bit_width;
        let mut rows = Vec::with_capacity(row_count);
        rows.resize_with(row_count, RowSlot::new);
        Self {
            rows,
            bit_width,
            hash_mask: handex_types::limits::hash_mask(bit_width),
        }
    }

    /// Current bit width.
    #[inline]
    #[must_use]
    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    /// Current row-selection mask.
    #[inline]
    #[must_use]
    pub fn hash_mask(&self) -> u32 {
        self.hash_mask
    }

    /// Number of addressable rows.
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The allocated row at `row_id`, if any.
    #[must_use]
    pub fn row(&self, row_id: u32) -> Option<&Row> {
        self.rows.get(row_id as usize)?.get().map(|boxed| &**boxed)
    }

    /// The row at `row_id`, allocating it on first use.
    ///
    /// Row 0 is born with the null sentinel in slot 0, so that slot is never
    /// handed out for a real value and handle 0 stays unambiguous.
    pub fn row_or_init(&self, row_id: u32, capacity: u32) -> &Row {
        self.rows[row_id as usize].get_or_init(|| {
            let mut row = Row::new(capacity);
            if row_id == 0 {
                seed_null_sentinel(row.cells_mut());
            }
            Box::new(row)
        })
    }
}

/// Reserve slot 0 of row 0 for the null value.
fn seed_null_sentinel(cells: &mut RowCells) {
    let index = cells.append(empty_payload(), 0, 0);
    debug_assert_eq!(index, 0);
}

// ---------------------------------------------------------------------------
// StorageBroker
// ---------------------------------------------------------------------------

/// Global reader/writer gate over the directory.
///
/// Row operations hold a read lease for their duration; vertical enlargement
/// takes exclusive write access, during which no row operation proceeds.
#[derive(Debug)]
pub struct StorageBroker {
    directory: RwLock<Directory>,
}

impl StorageBroker {
    /// Create a broker over a fresh directory.
    #[must_use]
    pub fn new(bit_width: u8) -> Self {
        Self {
            directory: RwLock::new(Directory::new(bit_width)),
        }
    }

    /// Blocking read lease, for callers with no deadline.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, Directory> {
        self.directory.read()
    }

    /// Admit a row operation, waiting until `deadline` if an enlargement is
    /// in progress.
    pub fn read_lease(&self, deadline: Option<Instant>) -> Result<RwLockReadGuard<'_, Directory>> {
        match deadline {
            None => Ok(self.directory.read()),
            Some(deadline) => {
                let began = Instant::now();
                self.directory
                    .try_read_until(deadline)
                    .ok_or_else(|| HandexError::LockTimeout {
                        waited: began.elapsed(),
                    })
            }
        }
    }

    /// Take exclusive access for a vertical enlargement, waiting until
    /// `deadline` for in-flight row operations to finish.
    pub fn write_access(
        &self,
        deadline: Option<Instant>,
    ) -> Result<RwLockWriteGuard<'_, Directory>> {
        match deadline {
            None => Ok(self.directory.write()),
            Some(deadline) => {
                let began = Instant::now();
                self.directory
                    .try_write_until(deadline)
                    .ok_or_else(|| HandexError::LockTimeout {
                        waited: began.elapsed(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_starts_empty() {
        let dir = Directory::new(8);
        assert_eq!(dir.row_count(), 256);
        assert_eq!(dir.hash_mask(), 0xFF);
        assert!(dir.row(0).is_none());
        assert!(dir.row(255).is_none());
        assert!(dir.row(256).is_none());
    }

    #[test]
    fn row_zero_gets_the_sentinel() {
        let dir = Directory::new(8);
        let row = dir.row_or_init(0, 4);
        let cells = row.read(None).unwrap();
        assert_eq!(cells.fill(), 1);
        assert!(cells.is_vacant(0));
        assert_eq!(cells.free_depth(), 0, "the sentinel slot is not reusable");
    }

    #[test]
    fn other_rows_start_bare() {
        let dir = Directory::new(8);
        let row = dir.row_or_init(17, 4);
        let cells = row.read(None).unwrap();
        assert_eq!(cells.fill(), 0);
    }

    #[test]
    fn init_is_idempotent() {
        let dir = Directory::new(8);
        let first = dir.row_or_init(9, 4) as *const Row;
        let second = dir.row_or_init(9, 4) as *const Row;
        assert_eq!(first, second);
    }

    #[test]
    fn broker_gates_reads_and_writes() {
        let broker = StorageBroker::new(8);
        let lease = broker.read_lease(None).unwrap();
        assert_eq!(lease.bit_width(), 8);
        // A second reader is admitted alongside the first.
        let second = broker.read_lease(None).unwrap();
        assert_eq!(second.row_count(), 256);
        drop((lease, second));
        let access = broker.write_access(None).unwrap();
        assert_eq!(access.bit_width(), 8);
    }

    #[test]
    fn write_access_times_out_behind_a_lease() {
        let broker = StorageBroker::new(8);
        let _lease = broker.read_lease(None).unwrap();
        let deadline = Some(Instant::now() + std::time::Duration::from_millis(10));
        let err = broker.write_access(deadline).unwrap_err();
        assert!(matches!(err, HandexError::LockTimeout { .. }));
    }
}
