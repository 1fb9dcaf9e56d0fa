//! Declarative generic-netlink message schema: a family's command table
//! plus the 4-byte genl header codec.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::attr::{AttrList, AttrListSchema};
use crate::err::{CodecError, SchemaError};
use crate::nl::NlmF;

/// A family's identity: either a name still awaiting bootstrap resolution,
/// or an id already known (e.g. the control family, id 16).
enum FamilyIdentity {
    Name(String),
    Id(u16),
}

/// A declared command: its name and the attribute-list schema it expects,
/// or `None` for a command that takes no attributes.
pub struct Command {
    pub name: String,
    pub schema: Option<Arc<AttrListSchema>>,
}

/// A generic-netlink family's message schema: command table plus family
/// identity. Declarations are data; logic lives in [`crate::socket`].
pub struct GenlMessageSchema {
    identity: FamilyIdentity,
    resolved_id: OnceLock<u16>,
    commands: Vec<Command>,
    by_name: HashMap<String, u8>,
    /// Kernel modules the host should ensure are loaded before first use.
    pub required_modules: Vec<String>,
}

impl GenlMessageSchema {
    fn build(
        identity: FamilyIdentity,
        commands: Vec<(&str, Option<Arc<AttrListSchema>>)>,
        required_modules: Vec<&str>,
    ) -> Arc<Self> {
        let mut by_name = HashMap::with_capacity(commands.len());
        let mut out = Vec::with_capacity(commands.len());
        for (i, (name, schema)) in commands.into_iter().enumerate() {
            let key = (i + 1) as u8;
            by_name.insert(name.to_lowercase(), key);
            out.push(Command {
                name: name.to_owned(),
                schema,
            });
        }
        Arc::new(GenlMessageSchema {
            identity,
            resolved_id: OnceLock::new(),
            commands: out,
            by_name,
            required_modules: required_modules.into_iter().map(str::to_owned).collect(),
        })
    }

    /// Declare a schema whose family name must be resolved at bootstrap.
    /// Registers itself in the global registry's pending set.
    pub fn declare_by_name(
        name: &str,
        commands: Vec<(&str, Option<Arc<AttrListSchema>>)>,
        required_modules: Vec<&str>,
    ) -> Arc<Self> {
        let schema = Self::build(FamilyIdentity::Name(name.to_owned()), commands, required_modules);
        crate::registry::register_pending(schema.clone());
        schema
    }

    /// Declare a schema with an already-known numeric family id (e.g. the
    /// control family). Registers itself immediately.
    pub fn declare_by_id(
        id: u16,
        commands: Vec<(&str, Option<Arc<AttrListSchema>>)>,
        required_modules: Vec<&str>,
    ) -> Result<Arc<Self>, SchemaError> {
        let schema = Self::build(FamilyIdentity::Id(id), commands, required_modules);
        let _ = schema.resolved_id.set(id);
        crate::registry::register(id, schema.clone())?;
        Ok(schema)
    }

    /// The family name, if this schema was declared by name.
    pub fn name(&self) -> Option<&str> {
        match &self.identity {
            FamilyIdentity::Name(n) => Some(n),
            FamilyIdentity::Id(_) => None,
        }
    }

    /// The numeric family id, once resolved (or if declared by id).
    pub fn id(&self) -> Option<u16> {
        match &self.identity {
            FamilyIdentity::Id(id) => Some(*id),
            FamilyIdentity::Name(_) => self.resolved_id.get().copied(),
        }
    }

    /// Called once by bootstrap to record the resolved numeric id.
    pub(crate) fn resolve(&self, id: u16) {
        let _ = self.resolved_id.set(id);
    }

    /// Look up a command's numeric key by name (case-insensitive).
    pub fn cmd_key(&self, name: &str) -> Option<u8> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    fn command(&self, key: u8) -> Option<&Command> {
        self.commands.get(key as usize - 1)
    }

    /// The attribute-list schema a named command expects, if any.
    pub fn cmd_attr_schema(&self, name: &str) -> Option<Arc<AttrListSchema>> {
        let key = self.cmd_key(name)?;
        self.command(key)?.schema.clone()
    }

    /// Pack the 4-byte genl header plus attributes for `cmd` (by name or
    /// numeric key).
    pub fn pack(
        &self,
        cmd: impl Into<CmdKey>,
        version: u8,
        attrs: Option<&AttrList>,
    ) -> Result<Vec<u8>, SchemaError> {
        let (key, command) = self.resolve_cmd(cmd)?;
        let mut out = vec![key, version, 0, 0];
        match (&command.schema, attrs) {
            (None, None) => {}
            (None, Some(_)) => return Err(SchemaError::UnexpectedAttributes(command.name.clone())),
            (Some(schema), Some(list)) => {
                out.extend(schema.pack(list).map_err(|e| {
                    SchemaError::UnknownCommand(format!("{}: {e}", command.name))
                })?);
            }
            (Some(_), None) => {}
        }
        Ok(out)
    }

    fn resolve_cmd(&self, cmd: impl Into<CmdKey>) -> Result<(u8, &Command), SchemaError> {
        let key = match cmd.into() {
            CmdKey::Name(name) => self
                .cmd_key(&name)
                .ok_or_else(|| SchemaError::UnknownCommand(name))?,
            CmdKey::Numeric(key) => key,
        };
        let command = self
            .command(key)
            .ok_or_else(|| SchemaError::UnknownCommand(format!("cmd {key}")))?;
        Ok((key, command))
    }

    /// Unpack a genl payload (header + attributes) into a [`GenlMessage`].
    /// `flags` comes from the enclosing netlink header.
    pub fn unpack(self: &Arc<Self>, bytes: &[u8], flags: NlmF) -> Result<GenlMessage, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::Truncated {
                need: 4,
                have: bytes.len(),
            });
        }
        let cmd = bytes[0];
        let version = bytes[1];
        let command = self
            .command(cmd)
            .ok_or(CodecError::UnknownKey(cmd as u16))?;
        let attrs = match &command.schema {
            Some(schema) => Some(schema.unpack(&bytes[4..])?),
            None => None,
        };
        Ok(GenlMessage {
            family: self.clone(),
            cmd,
            version,
            flags,
            attrs,
        })
    }
}

/// Either a command name or its numeric key.
pub enum CmdKey {
    Name(String),
    Numeric(u8),
}

impl From<&str> for CmdKey {
    fn from(s: &str) -> Self {
        CmdKey::Name(s.to_owned())
    }
}

impl From<u8> for CmdKey {
    fn from(k: u8) -> Self {
        CmdKey::Numeric(k)
    }
}

/// A decoded generic-netlink message: family, command, version, the outer
/// netlink flags, and the attribute list (if the command's schema is not
/// null).
pub struct GenlMessage {
    pub family: Arc<GenlMessageSchema>,
    pub cmd: u8,
    pub version: u8,
    pub flags: NlmF,
    pub attrs: Option<AttrList>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attr::{AttrCodec, Value};
    use crate::scalar::ScalarCodec;

    fn test_schema() -> Arc<GenlMessageSchema> {
        let attrs = AttrListSchema::new(vec![("x", AttrCodec::Scalar(ScalarCodec::U32))]);
        GenlMessageSchema::declare_by_id(
            0xfefe,
            vec![("cmd1", Some(attrs)), ("cmd2", None)],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn construct_by_name_and_by_id_agree_on_cmd() {
        let schema = test_schema();
        assert_eq!(schema.cmd_key("CMD1"), Some(1));
        assert_eq!(schema.cmd_key(&"cmd1".to_owned()), Some(1));
        assert_eq!(schema.cmd_key("bogus"), None);
    }

    #[test]
    fn pack_null_schema_command_emits_only_header() {
        let schema = test_schema();
        let packed = schema.pack("cmd2", 1, None).unwrap();
        assert_eq!(packed, vec![2, 1, 0, 0]);
    }

    #[test]
    fn pack_with_attrs_round_trips_through_unpack() {
        let schema = test_schema();
        let attr_schema = match &schema.command(1).unwrap().schema {
            Some(s) => s.clone(),
            None => unreachable!(),
        };
        let list = attr_schema
            .instance()
            .set("x", Value::U32(5))
            .unwrap()
            .build();
        let packed = schema.pack("cmd1", 1, Some(&list)).unwrap();
        let msg = schema.unpack(&packed, NlmF::empty()).unwrap();
        assert_eq!(msg.cmd, 1);
        assert_eq!(
            msg.attrs.unwrap().get("x").unwrap(),
            &Value::U32(5)
        );
    }

    #[test]
    fn bogus_command_name_fails() {
        let schema = test_schema();
        let err = schema.pack("bogus", 1, None).unwrap_err();
        assert_eq!(err, SchemaError::UnknownCommand("bogus".to_owned()));
    }
}
