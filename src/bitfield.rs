//! A small declarative bit packer.
//!
//! Every device family describes its command word as a table of
//! [`BitField`]s. One algorithm turns a list of values into an integer word
//! (validating each value against its field's domain first) and back again,
//! so the family modules only carry data, not logic.

use crate::error::{Error, Result};

/// One named field inside a command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// Human readable name, used in error messages
    pub name: &'static str,
    /// Position of the least significant bit of the field
    pub shift: u32,
    /// Number of bits the field occupies
    pub width: u32,
    /// Largest legal value; defaults to the largest value that fits
    pub max: u32,
}

impl BitField {
    /// A field whose domain is everything that fits in `width` bits.
    pub const fn new(name: &'static str, shift: u32, width: u32) -> Self {
        Self {
            name,
            shift,
            width,
            max: ((1u64 << width) - 1) as u32,
        }
    }

    /// Narrow the domain of the field to `0..=max`.
    pub const fn with_max(self, max: u32) -> Self {
        Self { max, ..self }
    }

    /// The bits covered by this field, in word position.
    pub const fn mask(&self) -> u32 {
        (((1u64 << self.width) - 1) as u32) << self.shift
    }
}

/// Pack `values` into a word according to `layout`. Values are given in
/// layout order.
///
/// Fails with [`Error::InvalidConfiguration`] if any value is outside its
/// field's domain; in that case no word is produced at all.
pub fn pack(layout: &[BitField], values: &[u32]) -> Result<u32> {
    if layout.len() != values.len() {
        return Err(Error::invalid(format!(
            "layout has {} fields but {} values were given",
            layout.len(),
            values.len()
        )));
    }

    layout
        .iter()
        .zip(values)
        .try_fold(0u32, |word, (field, &value)| {
            if value > field.max {
                Err(Error::invalid(format!(
                    "{} = {} is outside 0..={}",
                    field.name, value, field.max
                )))
            } else {
                Ok(word | (value << field.shift))
            }
        })
}

/// Recover the field values of `word`, in layout order.
pub fn unpack(layout: &[BitField], word: u32) -> Vec<u32> {
    layout
        .iter()
        .map(|field| (word & field.mask()) >> field.shift)
        .collect()
}

/// Serialize the low `width` bytes of `word`, most significant byte first.
pub fn word_to_bytes(word: u32, width: usize) -> Vec<u8> {
    let bytes = word.to_be_bytes();
    bytes[bytes.len() - width.min(bytes.len())..].to_vec()
}

/// True if two fields of `layout` claim the same bit.
pub fn has_overlap(layout: &[BitField]) -> bool {
    let mut seen = 0u32;
    for field in layout {
        if seen & field.mask() != 0 {
            return true;
        }
        seen |= field.mask();
    }
    false
}
