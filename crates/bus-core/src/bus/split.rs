//! Access widths and the decomposition of accesses that straddle a binding edge.
//!
//! When only the first `p` bytes of a `W`-byte access land inside a binding,
//! the prefix goes to that device as power-of-two pieces, largest first, and
//! the remainder goes back to the bus as pieces whose size is the lowest set
//! bit of their offset. For a 64-bit access with `p = 3` that is `2@0, 1@2` to
//! the device and `1@3, 4@4` back to the bus.

use std::fmt;

/// Byte width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Width {
    /// 8-bit access.
    Byte = 1,
    /// 16-bit access.
    Half = 2,
    /// 32-bit access.
    Word = 4,
    /// 64-bit access.
    Double = 8,
}

impl Width {
    /// All widths, narrowest first.
    pub const ALL: [Self; 4] = [Self::Byte, Self::Half, Self::Word, Self::Double];

    /// Number of bytes covered by this width.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        self as u8
    }

    /// Number of bits covered by this width.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32 * 8
    }

    /// Mask selecting the low `bits()` of a 64-bit value.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Byte => 0xFF,
            Self::Half => 0xFFFF,
            Self::Word => 0xFFFF_FFFF,
            Self::Double => u64::MAX,
        }
    }

    /// Parses a byte count of 1, 2, 4 or 8.
    #[must_use]
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Half),
            4 => Some(Self::Word),
            8 => Some(Self::Double),
            _ => None,
        }
    }

    /// Widest width not exceeding `bytes` (at least [`Width::Byte`]).
    const fn floor_of(bytes: u8) -> Self {
        match bytes {
            0..=1 => Self::Byte,
            2..=3 => Self::Half,
            4..=7 => Self::Word,
            _ => Self::Double,
        }
    }

    /// Widest width that `offset` is naturally aligned to.
    const fn aligned_to(offset: u8) -> Self {
        match offset & offset.wrapping_neg() {
            1 => Self::Byte,
            2 => Self::Half,
            4 => Self::Word,
            _ => Self::Double,
        }
    }

    const fn min(self, other: Self) -> Self {
        if (self as u8) <= (other as u8) {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// One power-of-two piece of a split access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Byte offset of the piece from the start of the whole access.
    pub offset: u8,
    /// Width of the piece.
    pub width: Width,
}

impl Chunk {
    /// Shift that moves this piece's value into position within the access.
    #[must_use]
    pub const fn shift(self) -> u32 {
        self.offset as u32 * 8
    }
}

/// Pieces of a `len`-byte prefix, largest first.
#[must_use]
pub const fn prefix_chunks(len: u8) -> PrefixChunks {
    PrefixChunks { offset: 0, len }
}

/// Pieces covering `[from, width)` of an access, each naturally aligned.
#[must_use]
pub const fn remainder_chunks(from: u8, width: Width) -> RemainderChunks {
    RemainderChunks {
        offset: from,
        end: width.bytes(),
    }
}

/// Iterator returned by [`prefix_chunks`].
#[derive(Debug, Clone)]
pub struct PrefixChunks {
    offset: u8,
    len: u8,
}

impl Iterator for PrefixChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.len {
            return None;
        }
        let width = Width::floor_of(self.len - self.offset);
        let chunk = Chunk {
            offset: self.offset,
            width,
        };
        self.offset += width.bytes();
        Some(chunk)
    }
}

/// Iterator returned by [`remainder_chunks`].
#[derive(Debug, Clone)]
pub struct RemainderChunks {
    offset: u8,
    end: u8,
}

impl Iterator for RemainderChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.end {
            return None;
        }
        let width = Width::aligned_to(self.offset).min(Width::floor_of(self.end - self.offset));
        let chunk = Chunk {
            offset: self.offset,
            width,
        };
        self.offset += width.bytes();
        Some(chunk)
    }
}
