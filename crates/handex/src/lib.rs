//! Hash-indexed interner for immutable byte payloads.
//!
//! The store hands out a stable, compact integer handle for every interned
//! value and resolves a handle back to its value in near-constant time. It
//! is built for datasets with enormous quantities of repeated values, where
//! a conventional map's per-entry node overhead dominates.
//!
//! ## Layout
//!
//! Values live in a two-level structure: the low `bitWidth` bits of a
//! value's 32-bit primary hash select a **row** (that row index is the
//! *handex*), and the value occupies a **slot** within the row's parallel
//! arrays. The packed (row, slot) pair is the handle.
//!
//! - [`WideStore`] issues 64-bit handles: row in bits 63..32, slot in bits
//!   31..0.
//! - [`ShortStore`] issues 32-bit handles: row in bits 31..8, slot in bits
//!   7..0, with a 4-way alternate-row overflow once the bit width maxes out.
//!
//! Row scans are accelerated by an 8-bit Pearson signature per slot,
//! rejected eight lanes at a time; see [`signature`].
//!
//! ## Growth
//!
//! Rows grow **horizontally** along a square capacity progression until the
//! row threshold, then the store grows **vertically**: the row vector
//! doubles, `bitWidth` increases by one, and every value whose hash has the
//! new bit set moves to the mirror row at the *same slot index*. Handles
//! encode that index, and old handles have the new row bit clear, so every
//! handle ever issued keeps resolving after any number of growths.
//!
//! ## Concurrency
//!
//! Each row carries a single-byte reader/writer lock (writer bit + 7-bit
//! reader count); a global storage broker gates row operations against
//! vertical enlargement. Operations take the broker's read lease first and
//! a row lock second, and the enlargement engine takes the broker
//! exclusively without ever touching a row lock, so the two levels cannot
//! form a cycle.
//!
//! The store is append-only: values are inserted once, never mutated, never
//! removed. Rebuilding from scratch is the only compaction path.

pub mod broker;
pub mod grow;
pub mod hash;
pub mod lock;
pub mod metrics;
pub mod row;
pub mod short;
pub mod signature;
pub mod wide;

pub use handex_error::{HandexError, HandleFault, Result};
pub use handex_types::{Fingerprint, ShortHandle, WideHandle, limits};

pub use hash::{Fingerprinter, XxPearson};
pub use metrics::StoreMetrics;
pub use row::{Payload, RowStats};
pub use short::ShortStore;
pub use wide::WideStore;
