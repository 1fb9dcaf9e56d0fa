//! The 16-byte netlink frame header and its flag bits.

use bitflags::bitflags;

use crate::err::CodecError;

/// Reserved netlink type: kernel error reply (carries an [`ErrorMessage`]).
pub const NLMSG_ERROR: u16 = 2;
/// Reserved netlink type: end of a multi-part (DUMP) reply.
pub const NLMSG_DONE: u16 = 3;
/// Well-known family id of the generic-netlink control family.
pub const GENL_ID_CTRL: u16 = 16;

bitflags! {
    /// Netlink header flag bits (spec §6).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NlmF: u16 {
        const REQUEST = 1;
        const MULTI = 2;
        const ACK = 4;
        const ROOT = 0x100;
        const MATCH = 0x200;
        /// Convenience aggregate for ACK-requesting messages.
        const ACK_REQUEST = Self::REQUEST.bits() | Self::ACK.bits();
        /// Convenience aggregate for DUMP-style requests.
        const MATCH_ROOT_REQUEST = Self::MATCH.bits() | Self::ROOT.bits() | Self::REQUEST.bits();
    }
}

/// The 16-byte netlink frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NlHeader {
    /// Total length of this frame, including the header itself.
    pub total_length: u32,
    /// The family id this frame belongs to (2 = error, 3 = done, 16 =
    /// control, others assigned by the kernel at bootstrap).
    pub nl_type: u16,
    pub flags: NlmF,
    pub seq: u32,
    pub port_id: u32,
}

/// Size in bytes of [`NlHeader`] on the wire.
pub const NL_HEADER_LEN: usize = 16;

impl NlHeader {
    /// Pack this header. `payload_len` is the length of everything that
    /// follows the header (genl header + attributes).
    pub fn pack(&self, payload_len: usize) -> [u8; NL_HEADER_LEN] {
        let mut buf = [0u8; NL_HEADER_LEN];
        let total_length = (payload_len + NL_HEADER_LEN) as u32;
        buf[0..4].copy_from_slice(&total_length.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.nl_type.to_ne_bytes());
        buf[6..8].copy_from_slice(&self.flags.bits().to_ne_bytes());
        buf[8..12].copy_from_slice(&self.seq.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.port_id.to_ne_bytes());
        buf
    }

    /// Unpack a header from the first [`NL_HEADER_LEN`] bytes of `bytes`.
    pub fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < NL_HEADER_LEN {
            return Err(CodecError::Truncated {
                need: NL_HEADER_LEN,
                have: bytes.len(),
            });
        }
        let total_length = u32::from_ne_bytes(bytes[0..4].try_into().unwrap());
        let nl_type = u16::from_ne_bytes(bytes[4..6].try_into().unwrap());
        let flags = u16::from_ne_bytes(bytes[6..8].try_into().unwrap());
        let seq = u32::from_ne_bytes(bytes[8..12].try_into().unwrap());
        let port_id = u32::from_ne_bytes(bytes[12..16].try_into().unwrap());
        Ok(NlHeader {
            total_length,
            nl_type,
            flags: NlmF::from_bits_truncate(flags),
            seq,
            port_id,
        })
    }
}

/// A decoded `NLMSG_ERROR` payload: a 4-byte negated-errno code followed by
/// the netlink header of the request it answers (which this implementation
/// does not need, and drops).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Negated POSIX errno; zero means "the kernel acknowledges success".
    pub error: i32,
}

impl ErrorMessage {
    /// Unpack from the payload following the netlink header.
    pub fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated {
                need: 4,
                have: bytes.len(),
            });
        }
        Ok(ErrorMessage {
            error: i32::from_ne_bytes(bytes[0..4].try_into().unwrap()),
        })
    }
}

/// A decoded `NLMSG_DONE` sentinel. Carries no payload of interest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoneMessage;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = NlHeader {
            total_length: 0,
            nl_type: 42,
            flags: NlmF::ACK_REQUEST,
            seq: 7,
            port_id: 99,
        };
        let packed = h.pack(20);
        let unpacked = NlHeader::unpack(&packed).unwrap();
        assert_eq!(unpacked.total_length, 36);
        assert_eq!(unpacked.nl_type, 42);
        assert_eq!(unpacked.flags, NlmF::ACK_REQUEST);
        assert_eq!(unpacked.seq, 7);
        assert_eq!(unpacked.port_id, 99);
    }

    #[test]
    fn ack_request_is_request_or_ack() {
        assert_eq!(NlmF::ACK_REQUEST, NlmF::REQUEST | NlmF::ACK);
        assert_eq!(NlmF::ACK_REQUEST.bits(), 5);
    }

    #[test]
    fn match_root_request_is_0x301() {
        assert_eq!(NlmF::MATCH_ROOT_REQUEST.bits(), 0x301);
    }

    #[test]
    fn error_message_unpacks_errno() {
        let bytes = (-22i32).to_ne_bytes();
        let msg = ErrorMessage::unpack(&bytes).unwrap();
        assert_eq!(msg.error, -22);
    }
}
