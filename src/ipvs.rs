//! IPVS (IP Virtual Server) generic-netlink family: schema declaration and
//! a thin client projecting requests/replies to domain objects.

use std::net::IpAddr;
use std::sync::Arc;

use derive_builder::Builder;
use getset::Getters;
use log::debug;

use crate::attr::{AttrCodec, AttrList, AttrListSchema, Value};
use crate::err::{CodecError, IpvsError, SocketError};
use crate::genl::GenlMessageSchema;
use crate::scalar::ScalarCodec;
use crate::socket::{NlSocket, Reply};
use crate::types::Buffer;

/// How IPVS delivers a packet to a real server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardMethod {
    Masq,
    Local,
    Tunnel,
    Route,
}

impl ForwardMethod {
    fn to_wire(self) -> u32 {
        match self {
            ForwardMethod::Masq => 0,
            ForwardMethod::Local => 1,
            ForwardMethod::Tunnel => 2,
            ForwardMethod::Route => 3,
        }
    }

    fn from_wire(v: u32) -> Result<Self, IpvsError> {
        match v {
            0 => Ok(ForwardMethod::Masq),
            1 => Ok(ForwardMethod::Local),
            2 => Ok(ForwardMethod::Tunnel),
            3 => Ok(ForwardMethod::Route),
            _ => Err(IpvsError::UnknownForwardMethod),
        }
    }
}

/// Transport protocol a service load-balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn to_wire(self) -> u16 {
        match self {
            Protocol::Tcp => libc::IPPROTO_TCP as u16,
            Protocol::Udp => libc::IPPROTO_UDP as u16,
        }
    }

    fn from_wire(v: u16) -> Option<Self> {
        match v as i32 {
            libc::IPPROTO_TCP => Some(Protocol::Tcp),
            libc::IPPROTO_UDP => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// IPVS address family: which union member `ADDR` holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    fn to_wire(self) -> u16 {
        match self {
            AddressFamily::Inet => libc::AF_INET as u16,
            AddressFamily::Inet6 => libc::AF_INET6 as u16,
        }
    }

    fn from_wire(v: u16) -> AddressFamily {
        if v as i32 == libc::AF_INET6 {
            AddressFamily::Inet6
        } else {
            AddressFamily::Inet
        }
    }

    fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    /// The wire default for `NETMASK`: all-ones for IPv4, prefix length 128
    /// for IPv6.
    fn default_netmask(self) -> u32 {
        match self {
            AddressFamily::Inet => 0xFFFF_FFFF,
            AddressFamily::Inet6 => 128,
        }
    }
}

fn addr_to_union(ip: &IpAddr) -> Buffer {
    let mut buf = [0u8; 16];
    match ip {
        IpAddr::V4(v4) => buf[..4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => buf.copy_from_slice(&v6.octets()),
    }
    Buffer::from(&buf[..])
}

fn addr_from_union(af: AddressFamily, bytes: &[u8]) -> Result<IpAddr, IpvsError> {
    match af {
        AddressFamily::Inet => {
            if bytes.len() < 4 {
                return Err(IpvsError::InvalidAddress("truncated IPv4 address".to_owned()));
            }
            Ok(IpAddr::from([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        AddressFamily::Inet6 => {
            if bytes.len() < 16 {
                return Err(IpvsError::InvalidAddress("truncated IPv6 address".to_owned()));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            Ok(IpAddr::from(octets))
        }
    }
}

fn validate_name(name: &str) -> Result<(), IpvsError> {
    if name.contains('\0') {
        return Err(IpvsError::InvalidName(name.to_owned()));
    }
    Ok(())
}

fn validate_port(port: u32) -> Result<u16, IpvsError> {
    if port == 0 || port > u16::from(u16::MAX) as u32 {
        return Err(IpvsError::InvalidPort(port));
    }
    Ok(port as u16)
}

fn validate_weight(weight: i32) -> Result<i32, IpvsError> {
    if weight < -1 {
        return Err(IpvsError::InvalidWeight(weight));
    }
    Ok(weight)
}

/// A load-balanced virtual service: either a `(protocol, vip, port)` tuple
/// or a firewall-mark tuple.
#[derive(Clone, Debug, Builder, Getters)]
#[builder(default, setter(into))]
#[getset(get = "pub")]
pub struct Service {
    #[builder(setter(strip_option))]
    vip: Option<IpAddr>,
    #[builder(setter(strip_option))]
    port: Option<u16>,
    #[builder(setter(strip_option))]
    protocol: Option<Protocol>,
    #[builder(setter(strip_option))]
    fwmark: Option<u32>,
    sched: String,
    pe_name: String,
    af: AddressFamily,
}

impl Default for Service {
    fn default() -> Self {
        Service {
            vip: None,
            port: None,
            protocol: None,
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::Inet,
        }
    }
}

impl Service {
    fn validate(&self) -> Result<(), IpvsError> {
        validate_name(&self.sched)?;
        validate_name(&self.pe_name)?;
        match self.fwmark {
            None => {
                if self.vip.is_none() || self.port.is_none() || self.protocol.is_none() {
                    return Err(IpvsError::InvalidAddress(
                        "a non-fwmark service needs vip, port and protocol".to_owned(),
                    ));
                }
            }
            Some(m) => {
                if m == 0 {
                    return Err(IpvsError::InvalidFwmark(m));
                }
            }
        }
        Ok(())
    }
}

/// A real server a service load-balances to.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct Dest {
    ip: IpAddr,
    port: u16,
    weight: i32,
    fwd_method: ForwardMethod,
}

/// A service and its ordered set of real-server destinations.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct Pool {
    service: Service,
    dests: Vec<Dest>,
}

fn ipvs_stats_schema(wide: bool) -> Arc<AttrListSchema> {
    let counter = if wide { ScalarCodec::U64 } else { ScalarCodec::U32 };
    AttrListSchema::new(vec![
        ("conns", AttrCodec::Scalar(counter)),
        ("inpkts", AttrCodec::Scalar(counter)),
        ("outpkts", AttrCodec::Scalar(counter)),
        ("inbytes", AttrCodec::Scalar(ScalarCodec::U64)),
        ("outbytes", AttrCodec::Scalar(ScalarCodec::U64)),
        ("cps", AttrCodec::Scalar(counter)),
        ("inpps", AttrCodec::Scalar(counter)),
        ("outpps", AttrCodec::Scalar(counter)),
        ("inbps", AttrCodec::Scalar(counter)),
        ("outbps", AttrCodec::Scalar(counter)),
    ])
}

fn ipvs_service_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("af", AttrCodec::Scalar(ScalarCodec::U16)),
        ("protocol", AttrCodec::Scalar(ScalarCodec::U16)),
        ("addr", AttrCodec::Scalar(ScalarCodec::Binary)),
        ("port", AttrCodec::Scalar(ScalarCodec::U16Be)),
        ("fwmark", AttrCodec::Scalar(ScalarCodec::U32)),
        ("sched_name", AttrCodec::Scalar(ScalarCodec::CString)),
        ("flags", AttrCodec::Scalar(ScalarCodec::Binary)),
        ("timeout", AttrCodec::Scalar(ScalarCodec::U32)),
        ("netmask", AttrCodec::Scalar(ScalarCodec::U32)),
        ("stats", AttrCodec::Nested(ipvs_stats_schema(false))),
        ("pe_name", AttrCodec::Scalar(ScalarCodec::CString)),
        ("stats64", AttrCodec::Nested(ipvs_stats_schema(true))),
    ])
}

fn ipvs_dest_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("addr", AttrCodec::Scalar(ScalarCodec::Binary)),
        ("port", AttrCodec::Scalar(ScalarCodec::U16Be)),
        ("fwd_method", AttrCodec::Scalar(ScalarCodec::U32)),
        ("weight", AttrCodec::Scalar(ScalarCodec::I32)),
        ("u_thresh", AttrCodec::Scalar(ScalarCodec::U32)),
        ("l_thresh", AttrCodec::Scalar(ScalarCodec::U32)),
        ("active_conns", AttrCodec::Scalar(ScalarCodec::U32)),
        ("inact_conns", AttrCodec::Scalar(ScalarCodec::U32)),
        ("persist_conns", AttrCodec::Scalar(ScalarCodec::U32)),
        ("stats", AttrCodec::Nested(ipvs_stats_schema(false))),
        ("addr_family", AttrCodec::Scalar(ScalarCodec::U16)),
        ("stats64", AttrCodec::Nested(ipvs_stats_schema(true))),
    ])
}

fn ipvs_daemon_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("state", AttrCodec::Scalar(ScalarCodec::U32)),
        ("mcast_ifn", AttrCodec::Scalar(ScalarCodec::CString)),
        ("sync_id", AttrCodec::Scalar(ScalarCodec::U32)),
    ])
}

fn ipvs_cmd_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("service", AttrCodec::Nested(ipvs_service_attr_schema())),
        ("dest", AttrCodec::Nested(ipvs_dest_attr_schema())),
        ("daemon", AttrCodec::Nested(ipvs_daemon_attr_schema())),
        ("timeout_tcp", AttrCodec::Scalar(ScalarCodec::U32)),
        ("timeout_tcp_fin", AttrCodec::Scalar(ScalarCodec::U32)),
        ("timeout_udp", AttrCodec::Scalar(ScalarCodec::U32)),
    ])
}

fn ipvs_schema() -> Arc<GenlMessageSchema> {
    static SCHEMA: std::sync::OnceLock<Arc<GenlMessageSchema>> = std::sync::OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let cmd_attrs = ipvs_cmd_attr_schema();
            GenlMessageSchema::declare_by_name(
                "IPVS",
                vec![
                    ("new_service", Some(cmd_attrs.clone())),
                    ("set_service", Some(cmd_attrs.clone())),
                    ("del_service", Some(cmd_attrs.clone())),
                    ("get_service", Some(cmd_attrs.clone())),
                    ("new_dest", Some(cmd_attrs.clone())),
                    ("set_dest", Some(cmd_attrs.clone())),
                    ("del_dest", Some(cmd_attrs.clone())),
                    ("get_dest", Some(cmd_attrs.clone())),
                    ("new_daemon", Some(cmd_attrs.clone())),
                    ("del_daemon", Some(cmd_attrs.clone())),
                    ("get_daemon", Some(cmd_attrs.clone())),
                    ("set_config", Some(cmd_attrs.clone())),
                    ("get_config", Some(cmd_attrs.clone())),
                    ("set_info", Some(cmd_attrs.clone())),
                    ("get_info", Some(cmd_attrs.clone())),
                    ("zero", Some(cmd_attrs.clone())),
                    ("flush", Some(cmd_attrs)),
                ],
                vec!["ip_vs"],
            )
        })
        .clone()
}

fn flags_word() -> Buffer {
    // `(value, mask)`: value 0, mask 0xFFFFFFFF. Two source variants exist
    // (one masks 0, one masks 0xFFFFFFFF); this crate keeps the
    // 0xFFFFFFFF form per the documented source ambiguity (see DESIGN.md).
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&0xFFFF_FFFFu32.to_ne_bytes());
    Buffer::from(buf)
}

fn build_service_attrs(service: &Service) -> Result<AttrList, CodecError> {
    service.validate().map_err(|e| CodecError::msg(e))?;
    let schema = ipvs_service_attr_schema();
    let mut builder = schema.instance();
    builder = builder.set("flags", Value::Bytes(flags_word()))?;
    builder = builder.set("sched_name", Value::Text(service.sched.clone()))?;
    if !service.pe_name.is_empty() {
        builder = builder.set("pe_name", Value::Text(service.pe_name.clone()))?;
    }
    match (service.vip, service.port, service.protocol) {
        (Some(vip), Some(port), Some(proto)) => {
            let af = AddressFamily::of(&vip);
            builder = builder
                .set("af", Value::U16(af.to_wire()))?
                .set("addr", Value::Bytes(addr_to_union(&vip)))?
                .set("port", Value::U16(port))?
                .set("protocol", Value::U16(proto.to_wire()))?
                .set("netmask", Value::U32(af.default_netmask()))?;
        }
        _ => {
            let fwmark = service.fwmark.unwrap_or_default();
            builder = builder
                .set("fwmark", Value::U32(fwmark))?
                .set("af", Value::U16(service.af.to_wire()))?
                .set("netmask", Value::U32(service.af.default_netmask()))?;
        }
    }
    Ok(builder.build())
}

fn build_dest_attrs(
    rip: IpAddr,
    port: u16,
    weight: i32,
    fwd_method: ForwardMethod,
) -> Result<AttrList, CodecError> {
    let af = AddressFamily::of(&rip);
    let schema = ipvs_dest_attr_schema();
    let attrs = schema
        .instance()
        .set("addr_family", Value::U16(af.to_wire()))?
        .set("addr", Value::Bytes(addr_to_union(&rip)))?
        .set("port", Value::U16(port))?
        .set("weight", Value::I32(weight))?
        .set("fwd_method", Value::U32(fwd_method.to_wire()))?
        .set("u_thresh", Value::U32(0))?
        .set("l_thresh", Value::U32(0))?
        .build();
    Ok(attrs)
}

fn service_from_attrs(attrs: &AttrList) -> Result<Service, IpvsError> {
    let fwmark = attrs.get("fwmark").and_then(Value::u32).ok();
    let af = attrs
        .get("af")
        .and_then(Value::u16)
        .unwrap_or(libc::AF_INET as u16);
    let af = AddressFamily::from_wire(af);
    let sched = attrs
        .get("sched_name")
        .and_then(Value::text)
        .map(str::to_owned)
        .unwrap_or_default();

    match attrs.get("addr").and_then(Value::bytes) {
        Ok(addr) => {
            let vip = addr_from_union(af, addr.as_ref())?;
            let port = attrs
                .get("port")
                .and_then(Value::u16)
                .map_err(|_| IpvsError::InvalidAddress("missing port".to_owned()))?;
            let protocol = attrs
                .get("protocol")
                .and_then(Value::u16)
                .ok()
                .and_then(Protocol::from_wire);
            Ok(Service {
                vip: Some(vip),
                port: Some(port),
                protocol,
                fwmark: None,
                sched,
                pe_name: String::new(),
                af,
            })
        }
        Err(_) => Ok(Service {
            vip: None,
            port: None,
            protocol: None,
            fwmark,
            sched,
            pe_name: String::new(),
            af,
        }),
    }
}

fn dest_from_attrs(attrs: &AttrList, default_af: AddressFamily) -> Result<Dest, IpvsError> {
    let af = attrs
        .get("addr_family")
        .and_then(Value::u16)
        .map(AddressFamily::from_wire)
        .unwrap_or(default_af);
    let addr = attrs
        .get("addr")
        .and_then(Value::bytes)
        .map_err(|_| IpvsError::InvalidAddress("missing addr".to_owned()))?;
    let ip = addr_from_union(af, addr.as_ref())?;
    let port = attrs
        .get("port")
        .and_then(Value::u16)
        .map_err(|_| IpvsError::InvalidAddress("missing port".to_owned()))?;
    let weight = match attrs.get("weight") {
        Ok(Value::I32(w)) => *w,
        _ => 0,
    };
    let fwd_method = match attrs.get("fwd_method").and_then(Value::u32) {
        Ok(v) => ForwardMethod::from_wire(v)?,
        Err(_) => ForwardMethod::Tunnel,
    };
    Ok(Dest {
        ip,
        port,
        weight,
        fwd_method,
    })
}

/// A client wrapping one socket, exposing IPVS operations in place of
/// `ipvsadm`.
pub struct IpvsClient {
    socket: Arc<NlSocket>,
    verbose: bool,
}

impl IpvsClient {
    /// Open a socket and bootstrap the IPVS family.
    pub fn connect(verbose: bool) -> Result<Self, SocketError> {
        let _ = ipvs_schema();
        let socket = NlSocket::connect(verbose)?;
        Ok(IpvsClient { socket, verbose })
    }

    fn cmd_attrs(&self, service: Option<AttrList>, dest: Option<AttrList>) -> Result<AttrList, CodecError> {
        let schema = ipvs_cmd_attr_schema();
        let mut builder = schema.instance();
        if let Some(service) = service {
            builder = builder.set("service", Value::Nested(service))?;
        }
        if let Some(dest) = dest {
            builder = builder.set("dest", Value::Nested(dest))?;
        }
        Ok(builder.build())
    }

    fn execute(&self, cmd: &str, attrs: AttrList) -> Result<(), SocketError> {
        let schema = ipvs_schema();
        if self.verbose {
            debug!("ipvs {cmd}");
        }
        self.socket.execute(&schema, cmd, Some(&attrs))
    }

    /// Add a TCP/UDP virtual service. Defaults: scheduler `"rr"`.
    pub fn add_service(&self, vip: &str, port: u32) -> Result<(), SocketError> {
        self.add_service_with(vip, port, Protocol::Tcp, "rr")
    }

    /// Add a virtual service with an explicit protocol and scheduler.
    pub fn add_service_with(
        &self,
        vip: &str,
        port: u32,
        protocol: Protocol,
        sched_name: &str,
    ) -> Result<(), SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let port = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: Some(vip),
            port: Some(port),
            protocol: Some(protocol),
            fwmark: None,
            sched: sched_name.to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let attrs = self.cmd_attrs(Some(build_service_attrs(&service)?), None)?;
        self.execute("new_service", attrs)
    }

    /// Delete a TCP virtual service.
    pub fn del_service(&self, vip: &str, port: u32) -> Result<(), SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let port = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: Some(vip),
            port: Some(port),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let attrs = self.cmd_attrs(Some(build_service_attrs(&service)?), None)?;
        self.execute("del_service", attrs)
    }

    /// Add a firewall-mark service.
    pub fn add_fwm_service(&self, fwmark: u32, af: AddressFamily) -> Result<(), SocketError> {
        if fwmark == 0 {
            return Err(SocketError::Codec(CodecError::msg(IpvsError::InvalidFwmark(fwmark))));
        }
        let service = Service {
            vip: None,
            port: None,
            protocol: None,
            fwmark: Some(fwmark),
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af,
        };
        let attrs = self.cmd_attrs(Some(build_service_attrs(&service)?), None)?;
        self.execute("new_service", attrs)
    }

    /// Delete a firewall-mark service. Fails unless the `af` matches the
    /// one it was added with.
    pub fn del_fwm_service(&self, fwmark: u32, af: AddressFamily) -> Result<(), SocketError> {
        let service = Service {
            vip: None,
            port: None,
            protocol: None,
            fwmark: Some(fwmark),
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af,
        };
        let attrs = self.cmd_attrs(Some(build_service_attrs(&service)?), None)?;
        self.execute("del_service", attrs)
    }

    /// Add a real server to a TCP service. Defaults: weight 1, TUNNEL
    /// forwarding, destination port equal to the service port.
    pub fn add_dest(&self, vip: &str, port: u32, rip: &str) -> Result<(), SocketError> {
        self.add_dest_with(vip, port, rip, None, 1, ForwardMethod::Tunnel)
    }

    /// Add a real server with an explicit alternate port and forwarding
    /// method.
    pub fn add_dest_with(
        &self,
        vip: &str,
        port: u32,
        rip: &str,
        rport: Option<u32>,
        weight: i32,
        method: ForwardMethod,
    ) -> Result<(), SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let rip: IpAddr = rip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(rip.to_owned()))))?;
        let vport = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let dport = match rport {
            Some(p) => validate_port(p).map_err(|e| SocketError::Codec(CodecError::msg(e)))?,
            None => vport,
        };
        let weight = validate_weight(weight).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;

        let service = Service {
            vip: Some(vip),
            port: Some(vport),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let attrs = self.cmd_attrs(
            Some(build_service_attrs(&service)?),
            Some(build_dest_attrs(rip, dport, weight, method)?),
        )?;
        self.execute("new_dest", attrs)
    }

    /// Update a real server's weight/forwarding method.
    pub fn update_dest(
        &self,
        vip: &str,
        port: u32,
        rip: &str,
        weight: i32,
        method: ForwardMethod,
    ) -> Result<(), SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let rip: IpAddr = rip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(rip.to_owned()))))?;
        let vport = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let weight = validate_weight(weight).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: Some(vip),
            port: Some(vport),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let attrs = self.cmd_attrs(
            Some(build_service_attrs(&service)?),
            Some(build_dest_attrs(rip, vport, weight, method)?),
        )?;
        self.execute("set_dest", attrs)
    }

    /// Remove a real server from a TCP service.
    pub fn del_dest(&self, vip: &str, port: u32, rip: &str) -> Result<(), SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let rip: IpAddr = rip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(rip.to_owned()))))?;
        let vport = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: Some(vip),
            port: Some(vport),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let attrs = self.cmd_attrs(
            Some(build_service_attrs(&service)?),
            Some(build_dest_attrs(rip, vport, 1, ForwardMethod::Tunnel)?),
        )?;
        self.execute("del_dest", attrs)
    }

    /// Add a real server to a firewall-mark service.
    pub fn add_fwm_dest(&self, fwmark: u32, rip: &str, vaf: AddressFamily, port: u32, weight: i32) -> Result<(), SocketError> {
        self.modify_fwm_dest("new_dest", fwmark, rip, vaf, port, weight, ForwardMethod::Tunnel)
    }

    /// Update a real server on a firewall-mark service.
    pub fn update_fwm_dest(&self, fwmark: u32, rip: &str, vaf: AddressFamily, port: u32, weight: i32) -> Result<(), SocketError> {
        self.modify_fwm_dest("set_dest", fwmark, rip, vaf, port, weight, ForwardMethod::Tunnel)
    }

    /// Remove a real server from a firewall-mark service.
    pub fn del_fwm_dest(&self, fwmark: u32, rip: &str, vaf: AddressFamily, port: u32) -> Result<(), SocketError> {
        self.modify_fwm_dest("del_dest", fwmark, rip, vaf, port, 0, ForwardMethod::Tunnel)
    }

    fn modify_fwm_dest(
        &self,
        cmd: &str,
        fwmark: u32,
        rip: &str,
        vaf: AddressFamily,
        port: u32,
        weight: i32,
        method: ForwardMethod,
    ) -> Result<(), SocketError> {
        let rip: IpAddr = rip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(rip.to_owned()))))?;
        let port = if port == 0 {
            0
        } else {
            validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?
        };
        let weight = validate_weight(weight).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: None,
            port: None,
            protocol: None,
            fwmark: Some(fwmark),
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: vaf,
        };
        let attrs = self.cmd_attrs(
            Some(build_service_attrs(&service)?),
            Some(build_dest_attrs(rip, port, weight, method)?),
        )?;
        self.execute(cmd, attrs)
    }

    /// Remove every service and destination.
    pub fn flush(&self) -> Result<(), SocketError> {
        self.execute("flush", self.cmd_attrs(None, None)?)
    }

    /// Dump every service, including its destinations.
    pub fn get_pools(&self) -> Result<Vec<Pool>, SocketError> {
        let schema = ipvs_schema();
        let replies = self.socket.dump(&schema, "get_service", None)?;
        let mut pools = Vec::new();
        for reply in replies {
            let Reply::Message(msg) = reply else { continue };
            let Some(attrs) = msg.attrs else { continue };
            let Ok(svc_attrs) = attrs.get("service").and_then(|v| v.nested().map(|l| l.clone())) else {
                continue;
            };
            let service = service_from_attrs(&svc_attrs).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
            let dests = self.get_dests_inner(&svc_attrs, service.af)?;
            pools.push(Pool { service, dests });
        }
        Ok(pools)
    }

    /// Look up a single service and its destinations in one call; an alias
    /// for [`IpvsClient::get_service`] (spec §4.6 lists both `get_pool` and
    /// `get_service` as operations; both return the same `Pool`).
    pub fn get_pool(&self, vip: &str, port: u32) -> Result<Option<Pool>, SocketError> {
        self.get_service(vip, port)
    }

    /// Look up a single TCP service; returns `Ok(None)` if it does not
    /// exist (a kernel error on `GET_SERVICE` is treated as not-found).
    pub fn get_service(&self, vip: &str, port: u32) -> Result<Option<Pool>, SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let vport = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: Some(vip),
            port: Some(vport),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let svc_attrs = build_service_attrs(&service)?;
        let attrs = self.cmd_attrs(Some(svc_attrs.clone()), None)?;
        let schema = ipvs_schema();
        let replies = match self.socket.query(&schema, "get_service", crate::nl::NlmF::ACK_REQUEST, Some(&attrs)) {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        for reply in replies {
            if let Reply::Message(msg) = reply {
                if let Some(attrs) = msg.attrs {
                    if let Ok(Some(nested)) = attrs.get("service").map(|v| v.nested().ok().cloned()) {
                        let service = service_from_attrs(&nested)
                            .map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
                        let dests = self.get_dests_inner(&nested, service.af)?;
                        return Ok(Some(Pool { service, dests }));
                    }
                }
            }
        }
        Ok(None)
    }

    /// List a service's destinations; a missing service yields an empty
    /// list rather than an error.
    pub fn get_dests(&self, vip: &str, port: u32) -> Result<Vec<Dest>, SocketError> {
        let vip: IpAddr = vip
            .parse()
            .map_err(|_| SocketError::Codec(CodecError::msg(IpvsError::InvalidAddress(vip.to_owned()))))?;
        let vport = validate_port(port).map_err(|e| SocketError::Codec(CodecError::msg(e)))?;
        let service = Service {
            vip: Some(vip),
            port: Some(vport),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::of(&vip),
        };
        let svc_attrs = build_service_attrs(&service)?;
        self.get_dests_inner(&svc_attrs, AddressFamily::of(&vip))
    }

    fn get_dests_inner(&self, svc_attrs: &AttrList, default_af: AddressFamily) -> Result<Vec<Dest>, SocketError> {
        let schema = ipvs_schema();
        let attrs = self.cmd_attrs(Some(svc_attrs.clone()), None)?;
        let replies = match self.socket.dump(&schema, "get_dest", Some(&attrs)) {
            Ok(r) => r,
            Err(_) => return Ok(Vec::new()),
        };
        let mut dests = Vec::new();
        for reply in replies {
            if let Reply::Message(msg) = reply {
                if let Some(attrs) = msg.attrs {
                    if let Ok(dst_attrs) = attrs.get("dest").and_then(|v| v.nested().map(|l| l.clone())) {
                        dests.push(
                            dest_from_attrs(&dst_attrs, default_af)
                                .map_err(|e| SocketError::Codec(CodecError::msg(e)))?,
                        );
                    }
                }
            }
        }
        Ok(dests)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn service_builder_defaults_to_rr_scheduler() {
        let svc = ServiceBuilder::default().build().unwrap();
        assert_eq!(svc.sched, "rr");
    }

    #[test]
    fn addr_union_round_trips_ipv4() {
        let ip: IpAddr = "1.1.1.1".parse().unwrap();
        let packed = addr_to_union(&ip);
        let back = addr_from_union(AddressFamily::Inet, packed.as_ref()).unwrap();
        assert_eq!(back, ip);
    }

    #[test]
    fn addr_union_round_trips_ipv6() {
        let ip: IpAddr = "::1".parse().unwrap();
        let packed = addr_to_union(&ip);
        let back = addr_from_union(AddressFamily::Inet6, packed.as_ref()).unwrap();
        assert_eq!(back, ip);
    }

    #[test]
    fn default_netmask_matches_address_family() {
        assert_eq!(AddressFamily::Inet.default_netmask(), 0xFFFF_FFFF);
        assert_eq!(AddressFamily::Inet6.default_netmask(), 128);
    }

    #[test]
    fn weight_below_minus_one_is_rejected() {
        let err = validate_weight(-2).unwrap_err();
        assert_eq!(err, IpvsError::InvalidWeight(-2));
    }

    #[test]
    fn port_zero_is_rejected() {
        let err = validate_port(0).unwrap_err();
        assert_eq!(err, IpvsError::InvalidPort(0));
    }

    #[test]
    fn build_dest_attrs_defaults_to_tunnel() {
        let rip: IpAddr = "2.2.2.1".parse().unwrap();
        let attrs = build_dest_attrs(rip, 80, 1, ForwardMethod::Tunnel).unwrap();
        assert_eq!(attrs.get("fwd_method").unwrap().u32().unwrap(), 2);
    }

    #[test]
    fn build_service_attrs_splits_fwmark_vs_tuple() {
        let tuple_svc = Service {
            vip: Some("1.1.1.1".parse().unwrap()),
            port: Some(80),
            protocol: Some(Protocol::Tcp),
            fwmark: None,
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::Inet,
        };
        let attrs = build_service_attrs(&tuple_svc).unwrap();
        assert!(attrs.get("addr").is_ok());
        assert!(attrs.get("fwmark").is_err());

        let fwm_svc = Service {
            vip: None,
            port: None,
            protocol: None,
            fwmark: Some(10),
            sched: "rr".to_owned(),
            pe_name: String::new(),
            af: AddressFamily::Inet,
        };
        let attrs = build_service_attrs(&fwm_svc).unwrap();
        assert_eq!(attrs.get("fwmark").unwrap().u32().unwrap(), 10);
    }
}
