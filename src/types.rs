//! Small buffer type shared by the scalar and attribute codecs.
//!
//! This mirrors the role of `neli::types::Buffer`: a thin `Vec<u8>` newtype
//! so that "opaque binary" payloads (the IPVS `FLAGS` attribute, raw
//! taskstats records) have a distinct type from attribute payloads that
//! happen to also be byte vectors.

use std::ops::{Deref, DerefMut};

/// An owned, opaque byte buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Buffer(Vec<u8>);

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Buffer(Vec::new())
    }

    /// Wrap an existing byte vector.
    pub fn from_vec(v: Vec<u8>) -> Self {
        Buffer(v)
    }

    /// Consume the buffer, returning the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Buffer(v)
    }
}

impl From<&[u8]> for Buffer {
    fn from(v: &[u8]) -> Self {
        Buffer(v.to_vec())
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
