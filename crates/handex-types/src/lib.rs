pub mod limits;

use std::fmt;

/// Handle issued by the wide store.
///
/// Bits 63..32 carry the row, bits 31..0 the slot index within the row.
/// The all-zero handle is the null sentinel: row 0, slot 0 is reserved for it
/// and never issued for a real value. Handles stay valid for the lifetime of
/// the store, across any number of horizontal or vertical enlargements.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct WideHandle(u64);

impl WideHandle {
    /// The null sentinel handle.
    pub const NULL: Self = Self(0);

    /// Pack a row and slot index into a handle.
    #[inline]
    #[must_use]
    pub const fn pack(row: u32, index: u32) -> Self {
        Self(((row as u64) << 32) | index as u64)
    }

    /// Reconstruct a handle from its raw integer form.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer form, suitable for storage or transport.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The row part.
    #[inline]
    #[must_use]
    pub const fn row(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The slot index part.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Whether this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WideHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Handle issued by the short store.
///
/// Bits 31..8 carry the row (high bits beyond the store's hash mask are zero
/// at issue time), bits 7..0 the slot index. The all-zero handle is the null
/// sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ShortHandle(u32);

impl ShortHandle {
    /// The null sentinel handle.
    pub const NULL: Self = Self(0);

    /// Pack a row and slot index into a handle.
    #[inline]
    #[must_use]
    pub const fn pack(row: u32, index: u8) -> Self {
        Self((row << 8) | index as u32)
    }

    /// Reconstruct a handle from its raw integer form.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw integer form.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The row part.
    #[inline]
    #[must_use]
    pub const fn row(self) -> u32 {
        self.0 >> 8
    }

    /// The slot index part.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0 as u8
    }

    /// Whether this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ShortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Fingerprint of a value: the 32-bit primary hash that selects the row, and
/// the 8-bit signature used to reject non-matches during row scans.
///
/// The signature is a secondary filter only; correctness never depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint {
    /// Primary 32-bit hash. The low `bitWidth` bits select the row.
    pub hash: u32,
    /// 8-bit signature stored alongside the value.
    pub signature: u8,
}

impl Fingerprint {
    /// Fingerprint of the null value.
    pub const NULL: Self = Self {
        hash: 0,
        signature: 0,
    };

    /// The row this fingerprint selects under the given mask.
    #[inline]
    #[must_use]
    pub const fn handex(self, hash_mask: u32) -> u32 {
        self.hash & hash_mask
    }
}
