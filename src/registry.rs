//! Process-wide family registry and bootstrap / family-id resolution.
//!
//! The registry is the only mutable state shared across sockets. Every
//! [`crate::socket::NlSocket`] constructed in the process calls
//! [`bootstrap`], which drains whatever schemas are currently pending
//! by-name resolution and resolves each via `CTRL_CMD_GETFAMILY`. A schema
//! already resolved (or declared after an earlier drain already ran) is
//! picked up by whichever socket is constructed next — resolution is not
//! gated behind a single process-wide "first socket only" latch, because a
//! family's client can be constructed well after another family's first
//! socket, and its schema must still get resolved (see `bootstrap`'s doc
//! comment).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attr::{AttrCodec, AttrListSchema, Value};
use crate::err::{CodecError, SchemaError, SocketError};
use crate::genl::GenlMessageSchema;
use crate::nl::GENL_ID_CTRL;

struct Registry {
    by_id: HashMap<u16, Arc<GenlMessageSchema>>,
    pending: Vec<Arc<GenlMessageSchema>>,
}

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    let mut guard = REGISTRY.lock();
    let registry = guard.get_or_insert_with(|| Registry {
        by_id: HashMap::new(),
        pending: Vec::new(),
    });
    f(registry)
}

/// Register a schema whose numeric family id is already known. Fails if
/// that id is already registered.
pub fn register(id: u16, schema: Arc<GenlMessageSchema>) -> Result<(), SchemaError> {
    with_registry(|reg| {
        if reg.by_id.contains_key(&id) {
            return Err(SchemaError::DuplicateFamilyId(id));
        }
        reg.by_id.insert(id, schema);
        Ok(())
    })
}

/// Queue a schema declared by name for resolution at the next bootstrap.
pub fn register_pending(schema: Arc<GenlMessageSchema>) {
    with_registry(|reg| reg.pending.push(schema));
}

/// Look up the schema registered for a given netlink frame type.
pub fn lookup(id: u16) -> Result<Arc<GenlMessageSchema>, SchemaError> {
    with_registry(|reg| {
        reg.by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaError::UnregisteredFamily(id))
    })
}

/// Schema for `CTRL_CMD_GETFAMILY`'s reply: carries `CTRL_ATTR_FAMILY_ID`
/// at key 2 (key 1, `CTRL_ATTR_FAMILY_NAME`, is unused on the reply path
/// this crate needs).
fn ctrl_attr_schema() -> Arc<AttrListSchema> {
    AttrListSchema::new(vec![
        ("family_name", AttrCodec::Scalar(crate::scalar::ScalarCodec::CString)),
        ("family_id", AttrCodec::Scalar(crate::scalar::ScalarCodec::U16)),
    ])
}

fn ctrl_schema() -> Arc<GenlMessageSchema> {
    static CTRL: std::sync::OnceLock<Arc<GenlMessageSchema>> = std::sync::OnceLock::new();
    CTRL.get_or_init(|| {
        if let Ok(schema) = lookup(GENL_ID_CTRL) {
            return schema;
        }
        let attrs = ctrl_attr_schema();
        GenlMessageSchema::declare_by_id(
            GENL_ID_CTRL,
            vec![
                ("__unspec", None),
                ("newfamily", Some(attrs.clone())),
                ("delfamily", Some(attrs.clone())),
                ("getfamily", Some(attrs.clone())),
            ],
            vec![],
        )
        .expect("control family registers exactly once")
    })
    .clone()
}

/// Resolve every *currently* pending named family against the kernel, via
/// `CTRL_CMD_GETFAMILY`. `query` is supplied by the socket layer (this
/// module has no I/O of its own) and must return the decoded attribute
/// list of the single control-family reply.
///
/// Called unconditionally by every [`crate::socket::NlSocket::connect`],
/// not just the first one in the process: a family's message schema is
/// only pushed onto the pending set the first time that family's client
/// type is constructed (`IpvsClient::connect`, `TaskstatsClient::connect`,
/// ...), which can happen well after some other family's first socket. If
/// resolution only ran once, process-wide, a family whose client is
/// constructed later would sit in `pending` forever and every `query`/
/// `execute`/`dump` against it would fail with `UnresolvedFamily`. Draining
/// `pending` on every call instead means each socket resolves whatever has
/// accumulated since the last drain — at most once per schema, since a
/// resolved schema is removed from `pending` by the drain that resolves it.
pub fn bootstrap(
    mut query: impl FnMut(&Arc<GenlMessageSchema>, &str) -> Result<Value, SocketError>,
) -> Result<(), SocketError> {
    let ctrl = ctrl_schema();
    let pending: Vec<_> = with_registry(|reg| std::mem::take(&mut reg.pending));
    for schema in pending {
        let name = match schema.name() {
            Some(n) => n.to_owned(),
            None => continue,
        };
        let value = query(&ctrl, &name)?;
        let id = value.u16().map_err(SocketError::Codec)?;
        schema.resolve(id);
        if let Err(e) = register(id, schema) {
            // A second schema with the same resolved family name and id
            // (e.g. taskstats and cgroupstats share "TASKSTATS") is not
            // an error: both point at one already-registered schema.
            if !matches!(e, SchemaError::DuplicateFamilyId(_)) {
                return Err(SocketError::Schema(e));
            }
        }
    }
    Ok(())
}

/// Decode a `CTRL_ATTR_FAMILY_ID` value out of a `CTRL_CMD_GETFAMILY`
/// reply's attribute list.
pub fn family_id_from_reply(attrs: &crate::attr::AttrList) -> Result<Value, CodecError> {
    attrs.get("family_id").cloned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scalar::ScalarCodec;

    #[test]
    fn duplicate_family_id_registration_fails() {
        let a = GenlMessageSchema::declare_by_id(0xAAAA, vec![("noop", None)], vec![]).unwrap();
        let err = register(0xAAAA, a).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateFamilyId(0xAAAA));
    }

    #[test]
    fn lookup_unregistered_family_fails() {
        let err = lookup(0xFFFE).unwrap_err();
        assert_eq!(err, SchemaError::UnregisteredFamily(0xFFFE));
    }

    #[test]
    fn reserved_attr_schema_has_family_id_field() {
        let schema = ctrl_attr_schema();
        assert_eq!(schema.key_of("family_id"), Some(2));
        let _ = ScalarCodec::U16;
    }

    #[test]
    fn bootstrap_resolves_a_family_declared_after_an_earlier_drain() {
        // Drain whatever is pending right now (as the first socket in a
        // process would); nothing about this family is known to us yet, so
        // just resolve everything to a made-up, distinct id.
        let _ = bootstrap(|_, name| Ok(Value::U16(0x1000u16.wrapping_add(name.len() as u16))));

        // A second family's client is constructed only now, well after that
        // first drain already ran.
        let late = GenlMessageSchema::declare_by_name(
            "ZZZ_LATE_BOOTSTRAP_TEST_FAMILY",
            vec![("noop", None)],
            vec![],
        );
        assert!(late.id().is_none());

        // The socket for the late family runs its own bootstrap pass and
        // must still resolve it, rather than silently no-op'ing because a
        // process-wide "first socket only" latch was already spent.
        bootstrap(|_, name| {
            if name == "ZZZ_LATE_BOOTSTRAP_TEST_FAMILY" {
                Ok(Value::U16(0x7E57))
            } else {
                Ok(Value::U16(0x1000u16.wrapping_add(name.len() as u16)))
            }
        })
        .unwrap();

        assert_eq!(late.id(), Some(0x7E57));
        assert!(lookup(0x7E57).is_ok());
    }
}
