//! # Word Order Handling
//!
//! Packing of 1–4 register words into raw integers and back, plus the
//! string layout used by fixed-length text registers.
//!
//! ## Naming Convention
//!
//! Uses ABCD notation where A is the most significant byte. Within a word
//! bytes are always big-endian (A before B); devices differ only in the order
//! of the words themselves:
//!
//! For 32-bit value `0x12345678`:
//! - `HighFirst (ABCD)`: words \[0x1234, 0x5678\]
//! - `LowFirst (CDAB)`: words \[0x5678, 0x1234\] (common on meters and inverters)

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Order of 16-bit words when combining them into 32/64-bit values.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::WordOrder;
///
/// let order = WordOrder::from_str("CDAB").unwrap();
/// assert_eq!(order, WordOrder::LowFirst);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WordOrder {
    /// Most significant word at the lowest address (ABCD)
    #[default]
    HighFirst,
    /// Least significant word at the lowest address (CDAB)
    LowFirst,
}

impl WordOrder {
    /// Parse common configuration spellings.
    ///
    /// - "ABCD", "BE", "HIGH_FIRST" → HighFirst
    /// - "CDAB", "SWAP", "LOW_FIRST" → LowFirst
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "ABCD" | "ABCDEFGH" | "BE" | "BIGENDIAN" | "HIGHFIRST" => Some(Self::HighFirst),
            "CDAB" | "GHEFCDAB" | "SWAP" | "WORDSWAP" | "LOWFIRST" => Some(Self::LowFirst),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighFirst => "ABCD (high word first)",
            Self::LowFirst => "CDAB (low word first)",
        }
    }
}

impl fmt::Display for WordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Words <-> Raw Integers
// ============================================================================

/// Combine up to 4 words into an unsigned raw integer.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{words_to_u64, WordOrder};
///
/// assert_eq!(words_to_u64(&[0x1234, 0x5678], WordOrder::HighFirst), 0x1234_5678);
/// assert_eq!(words_to_u64(&[0x5678, 0x1234], WordOrder::LowFirst), 0x1234_5678);
/// ```
#[inline]
pub fn words_to_u64(words: &[u16], order: WordOrder) -> u64 {
    debug_assert!(words.len() <= 4);
    let fold = |acc: u64, word: &u16| (acc << 16) | u64::from(*word);
    match order {
        WordOrder::HighFirst => words.iter().fold(0, fold),
        WordOrder::LowFirst => words.iter().rev().fold(0, fold),
    }
}

/// Split the low `count * 16` bits of `value` into `count` words.
#[inline]
pub fn u64_to_words(value: u64, count: usize, order: WordOrder) -> Vec<u16> {
    debug_assert!(count <= 4);
    let mut words: Vec<u16> = (0..count)
        .rev()
        .map(|i| (value >> (16 * i)) as u16)
        .collect();
    if order == WordOrder::LowFirst {
        words.reverse();
    }
    words
}

/// Interpret the low `bits` of `raw` as a two's-complement integer.
#[inline]
pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    debug_assert!((1..=64).contains(&bits));
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Largest unsigned value representable in `words` registers.
#[inline]
pub fn unsigned_max(words: usize) -> u64 {
    match words {
        0 => 0,
        1..=3 => (1u64 << (16 * words)) - 1,
        _ => u64::MAX,
    }
}

/// Inclusive signed range representable in `words` registers.
#[inline]
pub fn signed_range(words: usize) -> (i64, i64) {
    match words {
        0 => (0, 0),
        1..=3 => {
            let half = 1i64 << (16 * words - 1);
            (-half, half - 1)
        }
        _ => (i64::MIN, i64::MAX),
    }
}

// ============================================================================
// Words <-> Text
// ============================================================================

/// Unpack words into bytes, high byte first within each word.
pub fn words_to_bytes(words: &[u16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(words.len() * 2);
    for &word in words {
        buf.put_u16(word);
    }
    buf.freeze()
}

/// Pack bytes into exactly `count` words, zero-padding the tail.
///
/// Returns `None` when the bytes do not fit.
pub fn bytes_to_words(data: &[u8], count: usize) -> Option<Vec<u16>> {
    if data.len() > count * 2 {
        return None;
    }
    let mut buf = BytesMut::with_capacity(count * 2);
    buf.put_slice(data);
    buf.resize(count * 2, 0);
    let mut buf = buf.freeze();
    let mut words = Vec::with_capacity(count);
    while buf.has_remaining() {
        words.push(buf.get_u16());
    }
    Some(words)
}

// ============================================================================
// Tests
// ============================================================================
