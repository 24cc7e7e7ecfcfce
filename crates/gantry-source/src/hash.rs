use std::fmt;

use sha2::Digest;
use sha2::Sha256;

/// A cryptographic digest of file contents.
///
/// Two reads of the same URI whose [`ContentHash`] compares equal are
/// interchangeable. Hashes are totally ordered so that maps keyed by them
/// iterate deterministically, and they can be XOR-combined to fingerprint a
/// set of files without caring about order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash some data.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash a formatted string, e.g. a composite cache key.
    #[must_use]
    pub fn of_fmt(args: fmt::Arguments<'_>) -> Self {
        Self::of(args.to_string().as_bytes())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Update `self` to `self XOR other`.
    pub fn xor_with(&mut self, other: ContentHash) {
        for (lhs, rhs) in self.0.iter_mut().zip(other.0) {
            *lhs ^= rhs;
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
