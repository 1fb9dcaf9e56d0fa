//! # Generic netlink, without the ceremony
//!
//! ## Rationale
//!
//! This crate speaks the Linux generic netlink protocol to three kernel
//! subsystems — the IP Virtual Server load-balancer control plane (IPVS),
//! per-process accounting (taskstats), and per-cgroup accounting
//! (cgroupstats) — in place of shelling out to `ipvsadm` or scraping
//! `/proc`. The codec and RPC layer is declarative: schemas are data
//! (ordered `(name, codec)` tables), not hand-written (de)serialisation
//! code, so a new family is a few schema declarations plus a thin client.
//!
//! ## The project is broken down into the following modules:
//! * `scalar` - Fixed-width integer, binary and nul-terminated string
//! codecs. Stateless; endianness is baked into the variant.
//! * `attr` - The declarative attribute-list (TLV container) schema and
//! codec, including nested lists and the self-reference marker used by
//! recursive structures such as taskstats' `AGGR_PID`.
//! * `genl` - The declarative generic-netlink message schema: a family's
//! command table plus the 4-byte genl header codec.
//! * `nl` - The 16-byte netlink frame header, its flag bits, and the
//! reserved `ErrorMessage`/`DoneMessage` frame types.
//! * `registry` - The process-wide family-id registry and the
//! `CTRL_CMD_GETFAMILY` bootstrap that resolves named families, run on every
//! socket's construction.
//! * `socket` - The netlink datagram socket: sequenced request/response
//! rounds, multi-part (DUMP) reply collection, and the `query`/`execute`
//! API boundary that distinguishes "kernel returned data" from "kernel
//! acknowledged success".
//! * `ipvs` - The IPVS family: service/destination schema declarations and
//! `IpvsClient`, a thin wrapper projecting requests/replies onto
//! `Service`/`Dest`/`Pool`.
//! * `taskstats` - The taskstats family: `TaskstatsClient::get_pid_stats`.
//! * `cgroupstats` - The cgroupstats family: `CgroupstatsClient::get_cgroup_stats`.
//! * `err` - Every error type in the stack, one per layer, aggregated into
//! a top-level [`err::Error`] for the public API surface.
//! * `types` - The `Buffer` newtype shared by the scalar and attribute
//! codecs.
//!
//! ## Design decisions
//!
//! Schemas are arena-allocated, reference-counted descriptors
//! (`Arc<AttrListSchema>`, `Arc<GenlMessageSchema>`) built once at first use
//! and shared by every instance and every socket. A schema that refers to
//! itself (taskstats' `AGGR_PID`) stores a sentinel (`AttrCodec::SelfRef`)
//! at declaration time and resolves it to the enclosing schema handle at
//! pack/unpack time — this avoids an owning cycle without needing a
//! separate arena-and-index scheme.
//!
//! The family registry is the only process-wide mutable state. Every
//! `socket::NlSocket` constructed in the process — not just the first —
//! walks whatever schemas are currently waiting on by-name resolution and
//! resolves them via `CTRL_CMD_GETFAMILY`; a family whose client is
//! constructed after another family's first socket still gets resolved,
//! on the socket that constructs it. A schema is only ever resolved once:
//! it leaves the pending set as soon as some socket's bootstrap pass picks
//! it up.
//!
//! This is a deliberately small slice of netlink: no route/xfrm/nfnetlink
//! sockets, no multicast subscriptions, no asynchronous event delivery
//! beyond what a DUMP reply's MULTI-flagged frames require. If you need
//! those, reach for a fuller netlink crate; this one exists to replace
//! `ipvsadm`, not to reimplement it.
//!
//! ## Examples
//!
//! ```no_run
//! use gnlrs::ipvs::IpvsClient;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpvsClient::connect(false)?;
//! client.add_service("10.0.0.1", 80)?;
//! client.add_dest("10.0.0.1", 80, "10.0.1.1")?;
//! for pool in client.get_pools()? {
//!     println!("{:?} -> {} dests", pool.service(), pool.dests().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod attr;
pub mod cgroupstats;
pub mod err;
pub mod genl;
pub mod ipvs;
pub mod nl;
pub mod registry;
pub mod scalar;
pub mod socket;
pub mod taskstats;
pub mod types;

pub use err::Error;
