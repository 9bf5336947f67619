//! Hash-family-generic object identifier.
//!
//! Git repositories are either SHA-1 (20 bytes) or SHA-256 (32 bytes).
//! `Oid` stores a fixed 32-byte backing array plus the real length so
//! the rest of the core never needs to branch on hash family, except
//! where it derives the low-60-bit inode candidate.

use std::fmt;

/// Opaque object identifier from the Git object store. Totally
/// ordered by byte value, immutable once constructed.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Oid {
    bytes: [u8; 32],
    len: u8,
}

impl Oid {
    pub const SHA1_LEN: usize = 20;
    pub const SHA256_LEN: usize = 32;

    /// Builds an `Oid` from a raw byte slice of length 20 or 32.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() != Self::SHA1_LEN && raw.len() != Self::SHA256_LEN {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Oid {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// Parses a lowercase hex string of exactly 40 or 64 characters.
    /// Any other length, or any non-lowercase-hex character, is
    /// rejected, short ids are never accepted.
    pub fn from_hex(s: &str) -> Option<Self> {
        let expected_len = match s.len() {
            40 => Self::SHA1_LEN,
            64 => Self::SHA256_LEN,
            _ => return None,
        };
        if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return None;
        }
        let raw = hex::decode(s).ok()?;
        debug_assert_eq!(raw.len(), expected_len);
        Self::from_bytes(&raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }

    /// The low 60 bits of the id, used by the inode allocator.
    pub fn low60(&self) -> u64 {
        let b = self.as_bytes();
        let n = b.len();
        let mut v: u64 = 0;
        for &byte in &b[n - 8..n] {
            v = (v << 8) | byte as u64;
        }
        v & 0x0FFF_FFFF_FFFF_FFFF
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<git2::Oid> for Oid {
    fn from(oid: git2::Oid) -> Self {
        Oid::from_bytes(oid.as_bytes()).expect("git2::Oid is always 20 bytes")
    }
}

impl TryFrom<Oid> for git2::Oid {
    type Error = git2::Error;

    fn try_from(oid: Oid) -> Result<Self, Self::Error> {
        git2::Oid::from_bytes(oid.as_bytes())
    }
}
