//! Globally unique asset identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 128-bit identifier stored as four `u32` words.
///
/// The all-zero value is reserved and means "no asset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Guid {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Guid {
    /// The empty identifier.
    pub const EMPTY: Guid = Guid {
        a: 0,
        b: 0,
        c: 0,
        d: 0,
    };

    pub const fn new(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self { a, b, c, d }
    }

    /// Build from a 128-bit integer (most significant word first).
    pub const fn from_u128(value: u128) -> Self {
        Self {
            a: (value >> 96) as u32,
            b: (value >> 64) as u32,
            c: (value >> 32) as u32,
            d: value as u32,
        }
    }

    /// Process-unique identifier: a launch timestamp mixed with a counter.
    pub fn new_unique() -> Self {
        let counter = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            a: (nanos >> 32) as u32,
            b: nanos as u32,
            c: (counter >> 32) as u32,
            d: counter as u32 | 1,
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::EMPTY
    }

    /// Little-endian byte form used by the asset formats.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(bytemuck::bytes_of(&[
            self.a.to_le(),
            self.b.to_le(),
            self.c.to_le(),
            self.d.to_le(),
        ]));
        out
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            a: word(0),
            b: word(4),
            c: word(8),
            d: word(12),
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}{:08x}{:08x}{:08x}", self.a, self.b, self.c, self.d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_differ() {
        let a = Guid::new_unique();
        let b = Guid::new_unique();
        assert_ne!(a, b);
        assert!(a.is_valid());
        assert!(!Guid::EMPTY.is_valid());
    }

    #[test]
    fn bytes_roundtrip() {
        let id = Guid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        assert_eq!(Guid::from_bytes(id.to_bytes()), id);
        assert_eq!(id.to_string(), "0102030405060708090a0b0c0d0e0f10");
    }
}
