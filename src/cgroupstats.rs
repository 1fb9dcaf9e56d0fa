//! Per-cgroup accounting (cgroupstats) generic-netlink family: schema
//! declaration plus a client exposing `get_cgroup_stats`.
//!
//! Shares its kernel family name ("TASKSTATS") with [`crate::taskstats`] —
//! see that module's doc comment for how the two schemas reconcile in the
//! registry.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use byteorder::{ByteOrder, NativeEndian};
use getset::Getters;

use crate::attr::{AttrCodec, AttrListSchema, Value};
use crate::err::SocketError;
use crate::genl::GenlMessageSchema;
use crate::nl::NlmF;
use crate::scalar::ScalarCodec;
use crate::socket::{NlSocket, Reply};

const FAMILY_NAME: &str = "TASKSTATS";

/// Five `u64` counters, packed with no padding (spec §6: "a 40-byte
/// payload").
const CGROUP_STATS_RECORD_LEN: usize = 40;

/// Per-cgroup task-state counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct CgroupStats {
    nr_sleeping: u64,
    nr_running: u64,
    nr_stopped: u64,
    nr_uninterruptible: u64,
    nr_iowait: u64,
}

impl CgroupStats {
    fn unpack(bytes: &[u8]) -> Result<Self, SocketError> {
        if bytes.len() < CGROUP_STATS_RECORD_LEN {
            return Err(SocketError::Codec(crate::err::CodecError::Truncated {
                need: CGROUP_STATS_RECORD_LEN,
                have: bytes.len(),
            }));
        }
        Ok(CgroupStats {
            nr_sleeping: NativeEndian::read_u64(&bytes[0..8]),
            nr_running: NativeEndian::read_u64(&bytes[8..16]),
            nr_stopped: NativeEndian::read_u64(&bytes[16..24]),
            nr_uninterruptible: NativeEndian::read_u64(&bytes[24..32]),
            nr_iowait: NativeEndian::read_u64(&bytes[32..40]),
        })
    }
}

/// `CgroupstatsCmdAttrList`: the request carries the open cgroup directory
/// fd as a plain `u32`.
fn request_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![("cgroupstats_cmd_attr_fd", AttrCodec::Scalar(ScalarCodec::U32))])
}

/// `CgroupstatsType`: the reply carries one `CGROUP_STATS` record, packed
/// as opaque binary (the kernel struct is not itself a nested TLV list).
fn reply_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![("cgroup_stats", AttrCodec::Scalar(ScalarCodec::Binary))])
}

fn cgroupstats_schema() -> Arc<GenlMessageSchema> {
    static SCHEMA: std::sync::OnceLock<Arc<GenlMessageSchema>> = std::sync::OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            GenlMessageSchema::declare_by_name(
                FAMILY_NAME,
                vec![
                    // Same __TASKSTATS_CMD_MAX padding as the taskstats
                    // command table (spec §6), so GET lands on 4, NEW on 5.
                    ("__cgroupstats_cmd_unspec0", None),
                    ("__cgroupstats_cmd_unspec1", None),
                    ("__cgroupstats_cmd_unspec2", None),
                    ("get", Some(request_attr_schema())),
                    ("new", Some(reply_attr_schema())),
                ],
                vec!["taskstats"],
            )
        })
        .clone()
}

/// A client wrapping one socket, exposing per-cgroup accounting.
pub struct CgroupstatsClient {
    socket: Arc<NlSocket>,
}

impl CgroupstatsClient {
    /// Open a socket and bootstrap the cgroupstats family.
    pub fn connect(verbose: bool) -> Result<Self, SocketError> {
        let _ = cgroupstats_schema();
        let socket = NlSocket::connect(verbose)?;
        Ok(CgroupstatsClient { socket })
    }

    /// Fetch task-state counters for the cgroup at `path`. Opens the
    /// directory read-only, passes its fd to the kernel, and releases the
    /// descriptor via `File`'s `Drop` on every exit path (success, kernel
    /// error, or decode failure).
    pub fn get_cgroup_stats(&self, path: &str) -> Result<CgroupStats, SocketError> {
        let dir = File::open(path)?;
        let fd = dir.as_raw_fd();

        let schema = cgroupstats_schema();
        let attrs = request_attr_schema()
            .instance()
            .set("cgroupstats_cmd_attr_fd", Value::U32(fd as u32))
            .map_err(SocketError::Codec)?
            .build();
        let replies = self
            .socket
            .query(&schema, "get", NlmF::REQUEST, Some(&attrs))?;

        for reply in replies {
            if let Reply::Message(msg) = reply {
                if let Some(attrs) = msg.attrs {
                    if let Ok(value) = attrs.get("cgroup_stats") {
                        let bytes = value.bytes().map_err(SocketError::Codec)?;
                        return CgroupStats::unpack(bytes.as_ref());
                    }
                }
            }
        }
        Err(SocketError::Codec(crate::err::CodecError::msg(format!(
            "no CGROUP_STATS in cgroupstats reply for {path}"
        ))))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_record(counters: [u64; 5]) -> Vec<u8> {
        let mut buf = vec![0u8; CGROUP_STATS_RECORD_LEN];
        for (i, v) in counters.iter().enumerate() {
            NativeEndian::write_u64(&mut buf[i * 8..i * 8 + 8], *v);
        }
        buf
    }

    #[test]
    fn unpack_reads_five_counters_in_order() {
        let record = sample_record([1, 2, 3, 4, 5]);
        let stats = CgroupStats::unpack(&record).unwrap();
        assert_eq!(*stats.nr_sleeping(), 1);
        assert_eq!(*stats.nr_running(), 2);
        assert_eq!(*stats.nr_stopped(), 3);
        assert_eq!(*stats.nr_uninterruptible(), 4);
        assert_eq!(*stats.nr_iowait(), 5);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let err = CgroupStats::unpack(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, SocketError::Codec(_)));
    }

    #[test]
    fn command_table_lands_get_on_four_and_new_on_five() {
        let schema = cgroupstats_schema();
        assert_eq!(schema.cmd_key("get"), Some(4));
        assert_eq!(schema.cmd_key("new"), Some(5));
    }

    #[test]
    fn request_schema_round_trips_fd() {
        let schema = request_attr_schema();
        let attrs = schema
            .instance()
            .set("cgroupstats_cmd_attr_fd", Value::U32(9))
            .unwrap()
            .build();
        let packed = schema.pack(&attrs).unwrap();
        let unpacked = schema.unpack(&packed).unwrap();
        assert_eq!(unpacked.get("cgroupstats_cmd_attr_fd").unwrap(), &Value::U32(9));
    }
}
