//! Per-process accounting (taskstats) generic-netlink family: schema
//! declaration plus a client exposing `get_pid_stats`.
//!
//! The family shares its kernel name ("TASKSTATS") with [`crate::cgroupstats`];
//! both schemas register under whatever numeric id bootstrap resolves that
//! name to (`registry::bootstrap` tolerates the second declaration as long
//! as it resolves to the id already taken by the first, see
//! `registry::bootstrap`'s `DuplicateFamilyId` handling).

use std::sync::Arc;

use byteorder::{ByteOrder, NativeEndian};
use getset::Getters;

use crate::attr::{AttrCodec, AttrListSchema, Value};
use crate::err::SocketError;
use crate::genl::GenlMessageSchema;
use crate::nl::NlmF;
use crate::scalar::ScalarCodec;
use crate::socket::{NlSocket, Reply};

/// Kernel family name shared with cgroupstats.
const FAMILY_NAME: &str = "TASKSTATS";

/// Raw on-wire size of a `STATS` record (spec §6's packed format,
/// `H I B B Q*8 32s Q xxx I*5 Q*23`).
const TASKSTATS_RECORD_LEN: usize = 319;

/// Kernel-mandated `version` value; anything else is a protocol error.
const TASKSTATS_VERSION: u16 = 8;

/// Per-pid accounting counters, decoded from the kernel's fixed packed
/// `struct taskstats` layout (spec §6).
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct TaskStats {
    version: u16,
    exit_code: u32,
    flag: u8,
    nice: u8,
    cpu_count: u64,
    cpu_delay_total: u64,
    blkio_count: u64,
    blkio_delay_total: u64,
    swapin_count: u64,
    swapin_delay_total: u64,
    cpu_run_real_total: u64,
    cpu_run_virtual_total: u64,
    comm: String,
    sched: u64,
    uid: u32,
    gid: u32,
    pid: u32,
    ppid: u32,
    btime: u32,
    etime: u64,
    utime: u64,
    stime: u64,
    minflt: u64,
    majflt: u64,
    coremem: u64,
    virtmem: u64,
    hiwater_rss: u64,
    hiwater_vm: u64,
    read_char: u64,
    write_char: u64,
    read_syscalls: u64,
    write_syscalls: u64,
    read_bytes: u64,
    write_bytes: u64,
    cancelled_write_bytes: u64,
    nvcsw: u64,
    nivcsw: u64,
    utimescaled: u64,
    stimescaled: u64,
    cpu_scaled_run_real_total: u64,
    freepages_count: u64,
    freepages_delay_total: u64,
}

/// A little cursor over a fixed-layout record; each `read_*` advances past
/// what it consumed. Mirrors the sequential nature of the kernel struct
/// rather than computing each field's offset by hand.
struct RecordCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> RecordCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        RecordCursor { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        NativeEndian::read_u16(self.take(2))
    }

    fn u32(&mut self) -> u32 {
        NativeEndian::read_u32(self.take(4))
    }

    fn u64(&mut self) -> u64 {
        NativeEndian::read_u64(self.take(8))
    }

    fn skip(&mut self, n: usize) {
        self.offset += n;
    }
}

impl TaskStats {
    /// Decode the kernel's fixed `struct taskstats` layout. Fails with
    /// [`SocketError::VersionMismatch`] if `version` is not 8 (error
    /// taxonomy item 3: taskstats version mismatch).
    fn unpack(bytes: &[u8]) -> Result<Self, SocketError> {
        if bytes.len() < TASKSTATS_RECORD_LEN {
            return Err(SocketError::Codec(crate::err::CodecError::Truncated {
                need: TASKSTATS_RECORD_LEN,
                have: bytes.len(),
            }));
        }
        let mut c = RecordCursor::new(bytes);
        let version = c.u16();
        if version != TASKSTATS_VERSION {
            return Err(SocketError::VersionMismatch { got: version });
        }
        let exit_code = c.u32();
        let flag = c.u8();
        let nice = c.u8();
        let cpu_count = c.u64();
        let cpu_delay_total = c.u64();
        let blkio_count = c.u64();
        let blkio_delay_total = c.u64();
        let swapin_count = c.u64();
        let swapin_delay_total = c.u64();
        let cpu_run_real_total = c.u64();
        let cpu_run_virtual_total = c.u64();
        let comm_bytes = c.take(32);
        let nul = comm_bytes.iter().position(|&b| b == 0).unwrap_or(comm_bytes.len());
        let comm = String::from_utf8_lossy(&comm_bytes[..nul]).into_owned();
        let sched = c.u64();
        c.skip(3);
        let uid = c.u32();
        let gid = c.u32();
        let pid = c.u32();
        let ppid = c.u32();
        let btime = c.u32();
        let etime = c.u64();
        let utime = c.u64();
        let stime = c.u64();
        let minflt = c.u64();
        let majflt = c.u64();
        let coremem = c.u64();
        let virtmem = c.u64();
        let hiwater_rss = c.u64();
        let hiwater_vm = c.u64();
        let read_char = c.u64();
        let write_char = c.u64();
        let read_syscalls = c.u64();
        let write_syscalls = c.u64();
        let read_bytes = c.u64();
        let write_bytes = c.u64();
        let cancelled_write_bytes = c.u64();
        let nvcsw = c.u64();
        let nivcsw = c.u64();
        let utimescaled = c.u64();
        let stimescaled = c.u64();
        let cpu_scaled_run_real_total = c.u64();
        let freepages_count = c.u64();
        let freepages_delay_total = c.u64();

        Ok(TaskStats {
            version,
            exit_code,
            flag,
            nice,
            cpu_count,
            cpu_delay_total,
            blkio_count,
            blkio_delay_total,
            swapin_count,
            swapin_delay_total,
            cpu_run_real_total,
            cpu_run_virtual_total,
            comm,
            sched,
            uid,
            gid,
            pid,
            ppid,
            btime,
            etime,
            utime,
            stime,
            minflt,
            majflt,
            coremem,
            virtmem,
            hiwater_rss,
            hiwater_vm,
            read_char,
            write_char,
            read_syscalls,
            write_syscalls,
            read_bytes,
            write_bytes,
            cancelled_write_bytes,
            nvcsw,
            nivcsw,
            utimescaled,
            stimescaled,
            cpu_scaled_run_real_total,
            freepages_count,
            freepages_delay_total,
        })
    }
}

/// `TaskstatsAttrList`: the request attribute list for `GET` (PID to ask
/// about; the kernel also accepts TGID and cpumask registration, neither of
/// which this client exposes).
fn request_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("pid", AttrCodec::Scalar(ScalarCodec::U32)),
        ("tgid", AttrCodec::Scalar(ScalarCodec::U32)),
        ("register_cpumask", AttrCodec::Ignore),
        ("deregister_cpumask", AttrCodec::Ignore),
    ])
}

/// `TaskstatsType`: the reply attribute list, self-referential through
/// `AGGR_PID`/`AGGR_TGID` so a `STATS` record can be nested one level deep
/// under either aggregation key (spec §3's self-reference marker).
fn reply_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("pid", AttrCodec::Scalar(ScalarCodec::U32)),
        ("tgid", AttrCodec::Scalar(ScalarCodec::U32)),
        ("stats", AttrCodec::Scalar(ScalarCodec::Binary)),
        ("aggr_pid", AttrCodec::SelfRef),
        ("aggr_tgid", AttrCodec::SelfRef),
        ("null", AttrCodec::Ignore),
    ])
}

fn taskstats_schema() -> Arc<GenlMessageSchema> {
    static SCHEMA: std::sync::OnceLock<Arc<GenlMessageSchema>> = std::sync::OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            GenlMessageSchema::declare_by_name(
                FAMILY_NAME,
                vec![
                    // __TASKSTATS_CMD_MAX starts the kernel's enum at 3, so
                    // GET must land on 4 and NEW on 5 (spec §6).
                    ("__taskstats_cmd_unspec0", None),
                    ("__taskstats_cmd_unspec1", None),
                    ("__taskstats_cmd_unspec2", None),
                    ("get", Some(request_attr_schema())),
                    ("new", Some(reply_attr_schema())),
                ],
                vec!["taskstats"],
            )
        })
        .clone()
}

/// A client wrapping one socket, exposing per-pid accounting.
pub struct TaskstatsClient {
    socket: Arc<NlSocket>,
}

impl TaskstatsClient {
    /// Open a socket and bootstrap the taskstats family.
    pub fn connect(verbose: bool) -> Result<Self, SocketError> {
        let _ = taskstats_schema();
        let socket = NlSocket::connect(verbose)?;
        Ok(TaskstatsClient { socket })
    }

    /// Fetch accounting counters for one pid: a single-shot query whose
    /// reply nests a `STATS` record under `AGGR_PID`.
    pub fn get_pid_stats(&self, pid: u32) -> Result<TaskStats, SocketError> {
        let schema = taskstats_schema();
        let attrs = request_attr_schema()
            .instance()
            .set("pid", Value::U32(pid))
            .map_err(SocketError::Codec)?
            .build();
        let replies = self
            .socket
            .query(&schema, "get", NlmF::ACK_REQUEST, Some(&attrs))?;
        for reply in replies {
            if let Reply::Message(msg) = reply {
                if let Some(attrs) = msg.attrs {
                    if let Ok(aggr) = attrs.get("aggr_pid") {
                        let nested = aggr
                            .nested()
                            .map_err(SocketError::Codec)?;
                        let stats = nested.get("stats").map_err(SocketError::Codec)?;
                        let bytes = stats.bytes().map_err(SocketError::Codec)?;
                        return TaskStats::unpack(bytes.as_ref());
                    }
                }
            }
        }
        Err(SocketError::Codec(crate::err::CodecError::msg(format!(
            "no AGGR_PID/STATS in taskstats reply for pid {pid}"
        ))))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_record(version: u16, comm: &str) -> Vec<u8> {
        let mut buf = vec![0u8; TASKSTATS_RECORD_LEN];
        NativeEndian::write_u16(&mut buf[0..2], version);
        let comm_bytes = comm.as_bytes();
        buf[72..72 + comm_bytes.len()].copy_from_slice(comm_bytes);
        NativeEndian::write_u32(&mut buf[123..127], 4242); // pid
        buf
    }

    #[test]
    fn unpack_rejects_wrong_version() {
        let record = sample_record(7, "init");
        let err = TaskStats::unpack(&record).unwrap_err();
        assert!(matches!(err, SocketError::VersionMismatch { got: 7 }));
    }

    #[test]
    fn unpack_strips_trailing_nuls_from_comm() {
        let record = sample_record(8, "init");
        let stats = TaskStats::unpack(&record).unwrap();
        assert_eq!(stats.comm(), "init");
        assert_eq!(*stats.pid(), 4242);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let err = TaskStats::unpack(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, SocketError::Codec(_)));
    }

    #[test]
    fn command_table_lands_get_on_four_and_new_on_five() {
        let schema = taskstats_schema();
        assert_eq!(schema.cmd_key("get"), Some(4));
        assert_eq!(schema.cmd_key("new"), Some(5));
    }

    #[test]
    fn request_schema_round_trips_pid() {
        let schema = request_attr_schema();
        let attrs = schema.instance().set("pid", Value::U32(7)).unwrap().build();
        let packed = schema.pack(&attrs).unwrap();
        let unpacked = schema.unpack(&packed).unwrap();
        assert_eq!(unpacked.get("pid").unwrap(), &Value::U32(7));
    }
}
