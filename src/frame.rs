//! [`ConfigFrame`], the unit of everything the host sends to a device.

use crate::checksum::checksum;
use std::fmt;

/// What follows the encoded fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailer {
    /// A checksum byte over everything before it
    Crc8,
    /// Nothing; the frame is a bare command word
    None,
}

/// A fixed-length command frame.
///
/// For [`Trailer::Crc8`] frames the last byte is always the checksum of the
/// bytes before it. Frames are immutable: every edit produces a new frame
/// with the checksum recomputed, so a stale checksum cannot exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFrame {
    bytes: Vec<u8>,
    trailer: Trailer,
}

impl ConfigFrame {
    /// Append the checksum to `body`.
    pub fn sealed(body: Vec<u8>) -> Self {
        let mut bytes = body;
        bytes.push(checksum(&bytes));
        Self {
            bytes,
            trailer: Trailer::Crc8,
        }
    }

    /// A frame that is sent as-is, with no checksum.
    pub fn bare(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            trailer: Trailer::None,
        }
    }

    fn rebuild(&self, body: Vec<u8>) -> Self {
        match self.trailer {
            Trailer::Crc8 => Self::sealed(body),
            Trailer::None => Self::bare(body),
        }
    }

    /// Everything that goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded fields, without the checksum.
    pub fn body(&self) -> &[u8] {
        match self.trailer {
            Trailer::Crc8 => &self.bytes[..self.bytes.len() - 1],
            Trailer::None => &self.bytes,
        }
    }

    /// Total length on the wire.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frames always carry at least one field byte, but clippy insists.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// What follows the body.
    pub fn trailer(&self) -> Trailer {
        self.trailer
    }

    /// A copy of this frame with `mask` cleared in body byte `index`.
    pub fn with_cleared(&self, index: usize, mask: u8) -> Self {
        let mut body = self.body().to_vec();
        if let Some(byte) = body.get_mut(index) {
            *byte &= !mask;
        }
        self.rebuild(body)
    }

    /// A copy of this frame with `mask` set in body byte `index`.
    pub fn with_set(&self, index: usize, mask: u8) -> Self {
        let mut body = self.body().to_vec();
        if let Some(byte) = body.get_mut(index) {
            *byte |= mask;
        }
        self.rebuild(body)
    }

    /// A copy of this frame keeping only the first `body_len` field bytes.
    pub fn truncated(&self, body_len: usize) -> Self {
        let body = self.body();
        self.rebuild(body[..body_len.min(body.len())].to_vec())
    }

    /// True if the trailer matches the body.
    pub fn is_consistent(&self) -> bool {
        match self.trailer {
            Trailer::Crc8 => self
                .bytes
                .split_last()
                .is_some_and(|(crc, body)| checksum(body) == *crc),
            Trailer::None => true,
        }
    }
}

impl fmt::Display for ConfigFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "]")
    }
}
