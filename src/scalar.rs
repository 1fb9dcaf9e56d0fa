//! Fixed-layout scalar pack/unpack.
//!
//! Each variant of [`ScalarCodec`] is stateless: endianness and width are
//! baked into the variant, never negotiated at runtime.

use byteorder::{ByteOrder, NativeEndian, NetworkEndian};

use crate::err::CodecError;
use crate::types::Buffer;

/// A single fixed-layout scalar value, already decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scalar {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    /// Opaque bytes, passed through unchanged.
    Binary(Buffer),
    /// Text decoded from a nul-terminated C string.
    Text(String),
    /// The "ignore" codec's unpack result: present but uninterpreted.
    Ignored(Buffer),
}

/// The codec a scalar field is declared with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarCodec {
    U8,
    U16,
    U32,
    U64,
    I32,
    /// Network (big-endian) 16-bit unsigned, e.g. IPVS `PORT`.
    U16Be,
    /// Network (big-endian) 32-bit unsigned.
    U32Be,
    /// Identity transform: bytes in, bytes out.
    Binary,
    /// Nul-terminated text: `\0` appended on pack, stripped on unpack.
    CString,
    /// Pack is unused (callers never construct an `Ignored` value to send);
    /// unpack always succeeds and returns the raw bytes as a sentinel.
    Ignore,
}

impl ScalarCodec {
    /// Serialise `value` according to this codec.
    ///
    /// Returns [`CodecError::Msg`] if `value`'s variant does not match the
    /// codec (e.g. packing a [`Scalar::U64`] through [`ScalarCodec::U8`]).
    pub fn pack(&self, value: &Scalar) -> Result<Vec<u8>, CodecError> {
        match (self, value) {
            (ScalarCodec::U8, Scalar::U8(v)) => Ok(vec![*v]),
            (ScalarCodec::U16, Scalar::U16(v)) => {
                let mut buf = [0u8; 2];
                NativeEndian::write_u16(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (ScalarCodec::U32, Scalar::U32(v)) => {
                let mut buf = [0u8; 4];
                NativeEndian::write_u32(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (ScalarCodec::U64, Scalar::U64(v)) => {
                let mut buf = [0u8; 8];
                NativeEndian::write_u64(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (ScalarCodec::I32, Scalar::I32(v)) => {
                let mut buf = [0u8; 4];
                NativeEndian::write_i32(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (ScalarCodec::U16Be, Scalar::U16(v)) => {
                let mut buf = [0u8; 2];
                NetworkEndian::write_u16(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (ScalarCodec::U32Be, Scalar::U32(v)) => {
                let mut buf = [0u8; 4];
                NetworkEndian::write_u32(&mut buf, *v);
                Ok(buf.to_vec())
            }
            (ScalarCodec::Binary, Scalar::Binary(b)) => Ok(b.as_ref().to_vec()),
            (ScalarCodec::CString, Scalar::Text(s)) => {
                let mut buf = s.as_bytes().to_vec();
                buf.push(0);
                Ok(buf)
            }
            (ScalarCodec::Ignore, _) => Err(CodecError::msg(
                "the ignore codec cannot pack a value, it is unpack-only",
            )),
            _ => Err(CodecError::msg(format!(
                "value {value:?} does not match codec {self:?}"
            ))),
        }
    }

    /// Decode `bytes` according to this codec.
    pub fn unpack(&self, bytes: &[u8]) -> Result<Scalar, CodecError> {
        match self {
            ScalarCodec::U8 => {
                expect_len("u8", bytes, 1)?;
                Ok(Scalar::U8(bytes[0]))
            }
            ScalarCodec::U16 => {
                expect_len("u16", bytes, 2)?;
                Ok(Scalar::U16(NativeEndian::read_u16(bytes)))
            }
            ScalarCodec::U32 => {
                expect_len("u32", bytes, 4)?;
                Ok(Scalar::U32(NativeEndian::read_u32(bytes)))
            }
            ScalarCodec::U64 => {
                expect_len("u64", bytes, 8)?;
                Ok(Scalar::U64(NativeEndian::read_u64(bytes)))
            }
            ScalarCodec::I32 => {
                expect_len("i32", bytes, 4)?;
                Ok(Scalar::I32(NativeEndian::read_i32(bytes)))
            }
            ScalarCodec::U16Be => {
                expect_len("u16be", bytes, 2)?;
                Ok(Scalar::U16(NetworkEndian::read_u16(bytes)))
            }
            ScalarCodec::U32Be => {
                expect_len("u32be", bytes, 4)?;
                Ok(Scalar::U32(NetworkEndian::read_u32(bytes)))
            }
            ScalarCodec::Binary => Ok(Scalar::Binary(Buffer::from(bytes))),
            ScalarCodec::CString => {
                let nul = bytes
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(CodecError::MissingNulTerminator)?;
                let s = std::str::from_utf8(&bytes[..nul])
                    .map_err(|_| CodecError::InvalidUtf8)?
                    .to_owned();
                Ok(Scalar::Text(s))
            }
            ScalarCodec::Ignore => Ok(Scalar::Ignored(Buffer::from(bytes))),
        }
    }
}

fn expect_len(kind: &'static str, bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() != expected {
        return Err(CodecError::WrongSize {
            kind,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn u64_round_trips() {
        let packed = ScalarCodec::U64.pack(&Scalar::U64(2)).unwrap();
        assert_eq!(packed.len(), 8);
        assert_eq!(ScalarCodec::U64.unpack(&packed).unwrap(), Scalar::U64(2));
    }

    #[test]
    fn binary_round_trips() {
        let packed = ScalarCodec::Binary
            .pack(&Scalar::Binary(Buffer::from(&b"ABCD"[..])))
            .unwrap();
        assert_eq!(packed, b"ABCD");
        assert_eq!(
            ScalarCodec::Binary.unpack(&packed).unwrap(),
            Scalar::Binary(Buffer::from(&b"ABCD"[..]))
        );
    }

    #[test]
    fn cstring_round_trips() {
        let packed = ScalarCodec::CString
            .pack(&Scalar::Text("abcd".to_owned()))
            .unwrap();
        assert_eq!(packed, b"abcd\0");
        assert_eq!(
            ScalarCodec::CString.unpack(&packed).unwrap(),
            Scalar::Text("abcd".to_owned())
        );
    }

    #[test]
    fn cstring_unpack_without_terminator_fails() {
        let err = ScalarCodec::CString.unpack(b"abcd").unwrap_err();
        assert_eq!(err, CodecError::MissingNulTerminator);
    }

    #[test]
    fn port_is_network_endian() {
        let packed = ScalarCodec::U16Be.pack(&Scalar::U16(80)).unwrap();
        assert_eq!(packed, vec![0, 80]);
    }

    #[test]
    fn ignore_unpack_is_a_passthrough() {
        let v = ScalarCodec::Ignore.unpack(&[1, 2, 3]).unwrap();
        assert_eq!(v, Scalar::Ignored(Buffer::from(&[1, 2, 3][..])));
    }

    #[test]
    fn wrong_size_is_rejected() {
        let err = ScalarCodec::U32.unpack(&[1, 2]).unwrap_err();
        assert_eq!(
            err,
            CodecError::WrongSize {
                kind: "u32",
                expected: 4,
                actual: 2
            }
        );
    }
}
