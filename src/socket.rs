//! The netlink datagram socket: one `AF_NETLINK`/`NETLINK_GENERIC` endpoint,
//! sequenced request/response rounds, and multi-part (DUMP) reply
//! collection.

use std::mem;
use std::os::unix::io::RawFd;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::attr::AttrList;
use crate::err::SocketError;
use crate::genl::GenlMessageSchema;
use crate::nl::{DoneMessage, ErrorMessage, NlHeader, NlmF, GENL_ID_CTRL, NL_HEADER_LEN, NLMSG_DONE, NLMSG_ERROR};
use crate::registry;
use std::sync::Arc;

/// Generic netlink's protocol number within `AF_NETLINK`.
const NETLINK_GENERIC: libc::c_int = 16;
/// Matches libnetlink's default receive buffer size.
const RECV_BUF_LEN: usize = 16384;

/// A decoded reply frame.
pub enum Reply {
    Message(crate::genl::GenlMessage),
    Error(ErrorMessage),
    Done(DoneMessage),
}

struct SocketInner {
    fd: RawFd,
    port_id: u32,
    seq: u32,
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// A netlink socket bound to a local port, shared across threads via an
/// internal lock.
pub struct NlSocket {
    inner: Mutex<SocketInner>,
    verbose: bool,
}

impl NlSocket {
    /// Open, bind, and bootstrap a new socket.
    pub fn connect(verbose: bool) -> Result<Arc<Self>, SocketError> {
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, NETLINK_GENERIC) };
        if fd < 0 {
            return Err(SocketError::Io(std::io::Error::last_os_error()));
        }

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SocketError::Io(err));
        }

        let mut bound: libc::sockaddr_nl = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                fd,
                &mut bound as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SocketError::Io(err));
        }

        let socket = Arc::new(NlSocket {
            inner: Mutex::new(SocketInner {
                fd,
                port_id: bound.nl_pid,
                seq: 1,
            }),
            verbose,
        });

        socket.bootstrap()?;
        Ok(socket)
    }

    fn bootstrap(self: &Arc<Self>) -> Result<(), SocketError> {
        let this = self.clone();
        registry::bootstrap(move |ctrl, name| {
            debug!("resolving family name {name} via CTRL_CMD_GETFAMILY");
            this.getfamily(ctrl, name)
        })
    }

    fn getfamily(
        &self,
        ctrl: &Arc<GenlMessageSchema>,
        name: &str,
    ) -> Result<crate::attr::Value, SocketError> {
        let attr_schema = ctrl
            .cmd_attr_schema("getfamily")
            .expect("getfamily is declared with an attribute schema");
        let req = attr_schema
            .instance()
            .set("family_name", crate::attr::Value::Text(name.to_owned()))
            .map_err(crate::err::SocketError::Codec)?
            .build();
        let payload = ctrl
            .pack("getfamily", 1, Some(&req))
            .map_err(crate::err::SocketError::Schema)?;

        let replies = self.request_raw(GENL_ID_CTRL, NlmF::ACK_REQUEST, payload, Some(ctrl.clone()))?;
        for reply in replies {
            if let Reply::Message(msg) = reply {
                if let Some(attrs) = msg.attrs {
                    if let Ok(id) = attrs.get("family_id") {
                        return Ok(id.clone());
                    }
                }
            }
        }
        Err(SocketError::Codec(crate::err::CodecError::msg(format!(
            "no CTRL_ATTR_FAMILY_ID in reply resolving {name}"
        ))))
    }

    /// Issue a request against `schema`'s command table and return every
    /// reply, failing if any `ErrorMessage` in the result carries a
    /// non-zero error code.
    pub fn query(
        &self,
        schema: &Arc<GenlMessageSchema>,
        cmd: &str,
        flags: NlmF,
        attrs: Option<&AttrList>,
    ) -> Result<Vec<Reply>, SocketError> {
        let family_id = schema
            .id()
            .ok_or_else(|| SocketError::Schema(crate::err::SchemaError::UnresolvedFamily(cmd.to_owned())))?;
        let payload = schema
            .pack(cmd, 1, attrs)
            .map_err(crate::err::SocketError::Schema)?;
        let replies = self.request_raw(family_id, flags, payload, Some(schema.clone()))?;
        for reply in &replies {
            if let Reply::Error(e) = reply {
                if e.error != 0 {
                    if self.verbose {
                        debug!("kernel error {} on command {cmd}", e.error);
                    }
                    return Err(SocketError::Kernel(crate::err::NlError::from_raw(e.error)));
                }
            }
        }
        Ok(replies)
    }

    /// Like [`NlSocket::query`], but asserts exactly one `ErrorMessage`
    /// reply came back; used for mutating commands.
    pub fn execute(
        &self,
        schema: &Arc<GenlMessageSchema>,
        cmd: &str,
        attrs: Option<&AttrList>,
    ) -> Result<(), SocketError> {
        let replies = self.query(schema, cmd, NlmF::ACK_REQUEST, attrs)?;
        match replies.as_slice() {
            [Reply::Error(e)] if e.error == 0 => Ok(()),
            [Reply::Error(e)] => Err(SocketError::Kernel(crate::err::NlError::from_raw(e.error))),
            _ => Err(SocketError::Codec(crate::err::CodecError::msg(
                "execute expected exactly one ErrorMessage reply",
            ))),
        }
    }

    /// A dump-style query: pass [`NlmF::MATCH_ROOT_REQUEST`].
    pub fn dump(
        &self,
        schema: &Arc<GenlMessageSchema>,
        cmd: &str,
        attrs: Option<&AttrList>,
    ) -> Result<Vec<Reply>, SocketError> {
        self.query(schema, cmd, NlmF::MATCH_ROOT_REQUEST, attrs)
    }

    fn request_raw(
        &self,
        family_id: u16,
        flags: NlmF,
        payload: Vec<u8>,
        schema_hint: Option<Arc<GenlMessageSchema>>,
    ) -> Result<Vec<Reply>, SocketError> {
        let mut inner = self.inner.lock();
        let seq = inner.seq;
        inner.seq = inner.seq.wrapping_add(1);

        let header = NlHeader {
            total_length: 0,
            nl_type: family_id,
            flags,
            seq,
            port_id: inner.port_id,
        };
        let mut datagram = header.pack(payload.len()).to_vec();
        datagram.extend_from_slice(&payload);

        trace!("sending {} bytes, seq {seq}, type {family_id}", datagram.len());
        let rc = unsafe {
            libc::send(
                inner.fd,
                datagram.as_ptr() as *const libc::c_void,
                datagram.len(),
                0,
            )
        };
        if rc < 0 {
            return Err(SocketError::Io(std::io::Error::last_os_error()));
        }

        self.recv_locked(&mut inner, schema_hint)
    }

    fn recv_locked(
        &self,
        inner: &mut SocketInner,
        schema_hint: Option<Arc<GenlMessageSchema>>,
    ) -> Result<Vec<Reply>, SocketError> {
        let mut replies = Vec::new();
        let mut seen_first = false;
        loop {
            let mut buf = vec![0u8; RECV_BUF_LEN];
            let n = unsafe {
                libc::recv(inner.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n < 0 {
                return Err(SocketError::Io(std::io::Error::last_os_error()));
            }
            trace!("received {n} bytes");
            let frames = split_frames(&buf[..n as usize])?;

            for (header, frame_payload) in &frames {
                let reply = self.decode_frame(header, frame_payload, schema_hint.as_ref())?;
                if !seen_first {
                    seen_first = true;
                    if !header.flags.contains(NlmF::MULTI) {
                        return Ok(vec![reply]);
                    }
                }
                if matches!(reply, Reply::Done(_)) {
                    return Ok(replies);
                }
                replies.push(reply);
            }
        }
    }

    fn decode_frame(
        &self,
        header: &NlHeader,
        payload: &[u8],
        schema_hint: Option<&Arc<GenlMessageSchema>>,
    ) -> Result<Reply, SocketError> {
        match header.nl_type {
            NLMSG_ERROR => Ok(Reply::Error(ErrorMessage::unpack(payload)?)),
            NLMSG_DONE => Ok(Reply::Done(DoneMessage)),
            ty => {
                let schema = match schema_hint.filter(|s| s.id() == Some(ty)) {
                    Some(s) => s.clone(),
                    None => registry::lookup(ty).map_err(SocketError::Schema)?,
                };
                let msg = schema.unpack(payload, header.flags)?;
                Ok(Reply::Message(msg))
            }
        }
    }
}

fn split_frames(buf: &[u8]) -> Result<Vec<(NlHeader, Vec<u8>)>, SocketError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset + NL_HEADER_LEN <= buf.len() {
        let header = NlHeader::unpack(&buf[offset..])?;
        let total = header.total_length as usize;
        if total < NL_HEADER_LEN || offset + total > buf.len() {
            break;
        }
        let payload = buf[offset + NL_HEADER_LEN..offset + total].to_vec();
        frames.push((header, payload));
        offset += (total + 3) & !3;
    }
    Ok(frames)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_frames_handles_two_concatenated_frames() {
        let h1 = NlHeader {
            total_length: 0,
            nl_type: 2,
            flags: NlmF::empty(),
            seq: 1,
            port_id: 1,
        };
        let h2 = NlHeader {
            total_length: 0,
            nl_type: 3,
            flags: NlmF::empty(),
            seq: 1,
            port_id: 1,
        };
        let mut buf = h1.pack(4).to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(&h2.pack(0));

        let frames = split_frames(&buf).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.nl_type, 2);
        assert_eq!(frames[1].0.nl_type, 3);
    }

    // Opening a real socket needs CAP_NET_ADMIN and a running kernel; these
    // only run under `cargo test -- --ignored` on a suitable host.
    #[test]
    #[ignore]
    fn real_connect_assigns_a_port_id() {
        let socket = NlSocket::connect(false).unwrap();
        let inner = socket.inner.lock();
        assert_ne!(inner.port_id, 0);
    }
}
