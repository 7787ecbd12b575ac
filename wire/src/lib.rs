//! Byte-order aware (de)serialization for on-disk filesystem structures.
//!
//! Every multi-byte field in an ext2 superblock, group descriptor, or inode is
//! stored little-endian on disk. This crate gives each such struct a pair of
//! typed views: the in-memory, host-order value, and a `serialize`/
//! `deserialize` pair that funnels every field through an explicit
//! [`Endianness`] conversion. `#[derive(Wire)]` generates the struct impl by
//! calling each field's own impl in declaration order.

mod numbers;

pub use wire_macros::Wire;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
    /// No conversion needed (already host order, e.g. in-memory-only fields).
    Native,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireSerError {
    #[error("buffer too small to serialize value")]
    BufferTooSmall,
    #[error("string field longer than {0} bytes")]
    StringTooLong(usize),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDeError {
    #[error("buffer too small to deserialize value")]
    BufferTooSmall,
}

pub trait WireSerialize {
    /// Writes `self` into `target` using `endianness`, returning the number
    /// of bytes written. Errors only if `target` is too small.
    fn serialize(&self, endianness: Endianness, target: &mut [u8]) -> Result<usize, WireSerError>;
}

pub trait WireDeserialize: Sized {
    /// Parses a value out of the front of `input`, returning it along with
    /// the number of bytes consumed.
    fn deserialize(endianness: Endianness, input: &[u8]) -> Result<(Self, usize), WireDeError>;
}

/// Process-wide host endianness, probed once at startup the way the original
/// C implementation does: write `1` into a 16-bit word and look at its low
/// byte.
pub fn host_is_big_endian() -> bool {
    let probe: u16 = 1;
    probe.to_ne_bytes()[0] == 0
}

pub fn wire_endianness() -> Endianness {
    if host_is_big_endian() {
        Endianness::Big
    } else {
        Endianness::Little
    }
}
