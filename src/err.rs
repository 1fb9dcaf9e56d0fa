//! Error types for every layer of the codec and RPC stack.
//!
//! # Design decisions
//!
//! Each layer gets its own error type rather than one flat enum, mirroring
//! `neli::err`'s split between [`SerError`]/[`DeError`]/[`SocketError`]. All
//! of them implement [`std::error::Error`] so they compose through `?` with
//! `From` conversions instead of a generic catch-all.

use std::{
    fmt::{self, Display},
    io,
};

/// Arbitrary error message, used as the leaf of every error enum below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgError(String);

impl MsgError {
    /// Construct a new error message from anything [`Display`].
    pub fn new<D>(d: D) -> Self
    where
        D: Display,
    {
        MsgError(d.to_string())
    }
}

impl Display for MsgError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MsgError {}

/// Failures while packing or unpacking a single scalar or attribute list.
///
/// Covers error taxonomy item 1 (schema mis-use caught before any byte is
/// emitted) and the framing half of item 3 (protocol errors detected while
/// walking a TLV buffer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// A named field does not exist in the schema.
    UnknownField(String),
    /// A numeric key does not exist in the schema.
    UnknownKey(u16),
    /// A TLV header claimed a `total_length` smaller than the 4-byte header
    /// itself.
    ShortHeader(u16),
    /// Fewer bytes remained in the buffer than the TLV header promised.
    Truncated {
        /// Bytes the header claimed this attribute needed.
        need: usize,
        /// Bytes actually left in the buffer.
        have: usize,
    },
    /// A nul-terminated text field was not terminated.
    MissingNulTerminator,
    /// A nul-terminated text field was not valid UTF-8.
    InvalidUtf8,
    /// A fixed-size scalar codec received a buffer of the wrong size.
    WrongSize {
        /// Name of the scalar kind, for diagnostics.
        kind: &'static str,
        /// Bytes expected.
        expected: usize,
        /// Bytes given.
        actual: usize,
    },
    /// Arbitrary message, used by family-schema-level validation.
    Msg(MsgError),
}

impl CodecError {
    /// Build a [`CodecError::Msg`] from anything [`Display`].
    pub fn msg<D: Display>(d: D) -> Self {
        CodecError::Msg(MsgError::new(d))
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::UnknownField(name) => write!(f, "no such attribute: {name}"),
            CodecError::UnknownKey(key) => write!(f, "no such attribute key: {key}"),
            CodecError::ShortHeader(len) => {
                write!(f, "TLV header claimed total_length {len}, which is less than 4")
            }
            CodecError::Truncated { need, have } => write!(
                f,
                "TLV payload needs {need} bytes but only {have} remain in the buffer"
            ),
            CodecError::MissingNulTerminator => {
                write!(f, "nul-terminated string field was not nul-terminated")
            }
            CodecError::InvalidUtf8 => write!(f, "nul-terminated string field was not valid UTF-8"),
            CodecError::WrongSize {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{kind} scalar codec expected {expected} bytes, got {actual}"
            ),
            CodecError::Msg(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<MsgError> for CodecError {
    fn from(e: MsgError) -> Self {
        CodecError::Msg(e)
    }
}

/// Failures registering or looking up message schemas in the global
/// registry (error taxonomy item 1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaError {
    /// A numeric family id was registered twice.
    DuplicateFamilyId(u16),
    /// A command name does not exist in a message schema's command table.
    UnknownCommand(String),
    /// A command's schema is `None` (no attributes expected) but the caller
    /// supplied an attribute list anyway.
    UnexpectedAttributes(String),
    /// A netlink frame's type field has no registered schema.
    UnregisteredFamily(u16),
    /// A family name was never resolved before first use of a socket that
    /// needed it.
    UnresolvedFamily(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemaError::DuplicateFamilyId(id) => {
                write!(f, "family id {id} is already registered")
            }
            SchemaError::UnknownCommand(name) => write!(f, "no such command: {name}"),
            SchemaError::UnexpectedAttributes(name) => write!(
                f,
                "command {name} takes no attributes but an attribute list was supplied"
            ),
            SchemaError::UnregisteredFamily(id) => {
                write!(f, "unregistered netlink type: {id}")
            }
            SchemaError::UnresolvedFamily(name) => {
                write!(f, "family {name} was never resolved to a numeric id")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Failures from the socket/transport layer (error taxonomy item 2, the
/// transport half of item 3, and item 4's kernel-reported errors).
#[derive(Debug)]
pub enum SocketError {
    /// Underlying I/O error from the socket syscalls.
    Io(io::Error),
    /// A codec failure while packing a request or unpacking a reply.
    Codec(CodecError),
    /// A schema-registry failure.
    Schema(SchemaError),
    /// taskstats replied with a `version` other than 8.
    VersionMismatch {
        /// Version the kernel actually sent.
        got: u16,
    },
    /// The kernel answered with a non-zero `ErrorMessage` (taxonomy item 4),
    /// as distinct from a failure in the transport itself ([`SocketError::Io`]).
    Kernel(NlError),
}

impl Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SocketError::Io(e) => write!(f, "socket I/O error: {e}"),
            SocketError::Codec(e) => write!(f, "codec error: {e}"),
            SocketError::Schema(e) => write!(f, "schema error: {e}"),
            SocketError::VersionMismatch { got } => {
                write!(f, "taskstats version mismatch: expected 8, got {got}")
            }
            SocketError::Kernel(e) => write!(f, "kernel error: {e}"),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        SocketError::Io(e)
    }
}

impl From<NlError> for SocketError {
    fn from(e: NlError) -> Self {
        SocketError::Kernel(e)
    }
}

impl From<CodecError> for SocketError {
    fn from(e: CodecError) -> Self {
        SocketError::Codec(e)
    }
}

impl From<SchemaError> for SocketError {
    fn from(e: SchemaError) -> Self {
        SocketError::Schema(e)
    }
}

/// A kernel-reported error (error taxonomy item 4): an `ErrorMessage` with
/// a non-zero, negated-errno `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlError {
    /// The raw (negative) errno the kernel returned.
    errno: i32,
}

impl NlError {
    /// Build from the raw (negative) errno carried on the wire.
    pub fn from_raw(errno: i32) -> Self {
        NlError { errno }
    }

    /// The POSIX errno this corresponds to (positive).
    pub fn errno(&self) -> i32 {
        -self.errno
    }
}

impl Display for NlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.errno()))
    }
}

impl std::error::Error for NlError {}

/// Domain validation failures for IPVS `Service`/`Dest` construction (error
/// taxonomy item 5). Raised before any I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpvsError {
    /// `vip` was not a parseable IPv4 or IPv6 address.
    InvalidAddress(String),
    /// `port` or `rport` was zero (ports are 1..=65535 on the wire).
    InvalidPort(u32),
    /// `fwmark` was zero.
    InvalidFwmark(u32),
    /// An unrecognized forwarding method was requested.
    UnknownForwardMethod,
    /// `weight` was less than -1.
    InvalidWeight(i32),
    /// A scheduler or PE name contained an embedded nul byte.
    InvalidName(String),
}

impl Display for IpvsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpvsError::InvalidAddress(s) => write!(f, "not a valid IPv4/IPv6 address: {s}"),
            IpvsError::InvalidPort(p) => write!(f, "port out of range: {p}"),
            IpvsError::InvalidFwmark(m) => write!(f, "fwmark out of range: {m}"),
            IpvsError::UnknownForwardMethod => write!(f, "unknown forwarding method"),
            IpvsError::InvalidWeight(w) => write!(f, "weight must be >= -1, got {w}"),
            IpvsError::InvalidName(s) => write!(f, "name contains an embedded nul byte: {s:?}"),
        }
    }
}

impl std::error::Error for IpvsError {}

/// Top-level error type returned from the public API surface.
#[derive(Debug)]
pub enum Error {
    /// See [`CodecError`].
    Codec(CodecError),
    /// See [`SchemaError`].
    Schema(SchemaError),
    /// See [`SocketError`].
    Socket(SocketError),
    /// See [`NlError`].
    Kernel(NlError),
    /// See [`IpvsError`].
    Ipvs(IpvsError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Codec(e) => write!(f, "{e}"),
            Error::Schema(e) => write!(f, "{e}"),
            Error::Socket(e) => write!(f, "{e}"),
            Error::Kernel(e) => write!(f, "{e}"),
            Error::Ipvs(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<SchemaError> for Error {
    fn from(e: SchemaError) -> Self {
        Error::Schema(e)
    }
}

impl From<SocketError> for Error {
    fn from(e: SocketError) -> Self {
        Error::Socket(e)
    }
}

impl From<NlError> for Error {
    fn from(e: NlError) -> Self {
        Error::Kernel(e)
    }
}

impl From<IpvsError> for Error {
    fn from(e: IpvsError) -> Self {
        Error::Ipvs(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kernel_error_is_distinct_from_io_error() {
        let kernel = SocketError::Kernel(NlError::from_raw(-22));
        let io = SocketError::Io(io::Error::from_raw_os_error(22));
        assert!(matches!(kernel, SocketError::Kernel(_)));
        assert!(matches!(io, SocketError::Io(_)));
    }

    #[test]
    fn nl_error_reports_the_positive_errno() {
        let e = NlError::from_raw(-22);
        assert_eq!(e.errno(), 22);
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Socket(SocketError::Io(e))
    }
}
