//! Declarative attribute-list (TLV container) schema and codec.
//!
//! An [`AttrListSchema`] is an immutable, ordered table of
//! `(field_name, payload codec)` pairs; an [`AttrList`] is an instance of
//! one, mapping field keys to decoded [`Value`]s.

use std::collections::HashMap;
use std::sync::Arc;

use crate::err::CodecError;
use crate::scalar::{Scalar, ScalarCodec};
use crate::types::Buffer;

/// A decoded attribute payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    Bytes(Buffer),
    Text(String),
    /// A nested attribute list, keyed by the schema it was decoded against.
    Nested(AttrList),
    /// Present but uninterpreted (the "ignore" codec).
    Ignored(Buffer),
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::U8(v) => Value::U8(v),
            Scalar::U16(v) => Value::U16(v),
            Scalar::U32(v) => Value::U32(v),
            Scalar::U64(v) => Value::U64(v),
            Scalar::I32(v) => Value::I32(v),
            Scalar::Binary(b) => Value::Bytes(b),
            Scalar::Text(s) => Value::Text(s),
            Scalar::Ignored(b) => Value::Ignored(b),
        }
    }
}

impl Value {
    fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::U8(v) => Some(Scalar::U8(*v)),
            Value::U16(v) => Some(Scalar::U16(*v)),
            Value::U32(v) => Some(Scalar::U32(*v)),
            Value::U64(v) => Some(Scalar::U64(*v)),
            Value::I32(v) => Some(Scalar::I32(*v)),
            Value::Bytes(b) => Some(Scalar::Binary(b.clone())),
            Value::Text(s) => Some(Scalar::Text(s.clone())),
            Value::Ignored(b) => Some(Scalar::Binary(b.clone())),
            Value::Nested(_) => None,
        }
    }

    /// Unwrap a `u32`, failing if this value is some other variant.
    pub fn u32(&self) -> Result<u32, CodecError> {
        match self {
            Value::U32(v) => Ok(*v),
            _ => Err(CodecError::msg(format!("expected u32, got {self:?}"))),
        }
    }

    /// Unwrap a `u16`, failing if this value is some other variant.
    pub fn u16(&self) -> Result<u16, CodecError> {
        match self {
            Value::U16(v) => Ok(*v),
            _ => Err(CodecError::msg(format!("expected u16, got {self:?}"))),
        }
    }

    /// Unwrap `Bytes`, failing if this value is some other variant.
    pub fn bytes(&self) -> Result<&Buffer, CodecError> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(CodecError::msg(format!("expected bytes, got {self:?}"))),
        }
    }

    /// Unwrap `Text`, failing if this value is some other variant.
    pub fn text(&self) -> Result<&str, CodecError> {
        match self {
            Value::Text(s) => Ok(s),
            _ => Err(CodecError::msg(format!("expected text, got {self:?}"))),
        }
    }

    /// Unwrap `Nested`, failing if this value is some other variant.
    pub fn nested(&self) -> Result<&AttrList, CodecError> {
        match self {
            Value::Nested(l) => Ok(l),
            _ => Err(CodecError::msg(format!("expected nested list, got {self:?}"))),
        }
    }
}

/// The payload codec a field is declared with.
#[derive(Clone)]
pub enum AttrCodec {
    Scalar(ScalarCodec),
    /// A fixed, unrelated nested schema.
    Nested(Arc<AttrListSchema>),
    /// The distinguished self-reference marker: resolved to the enclosing
    /// schema at pack/unpack time rather than stored as a cyclic reference.
    SelfRef,
    /// Present but uninterpreted on unpack; cannot be packed.
    Ignore,
}

struct Field {
    name: String,
    codec: AttrCodec,
}

/// An immutable, ordered attribute-list descriptor.
pub struct AttrListSchema {
    fields: Vec<Field>,
    by_name: HashMap<String, u16>,
}

impl AttrListSchema {
    /// Build a schema from ordered `(name, codec)` pairs. Keys are assigned
    /// densely starting at 1, in declaration order.
    pub fn new(fields: Vec<(&str, AttrCodec)>) -> Arc<Self> {
        let mut by_name = HashMap::with_capacity(fields.len());
        let mut out = Vec::with_capacity(fields.len());
        for (i, (name, codec)) in fields.into_iter().enumerate() {
            let key = (i + 1) as u16;
            by_name.insert(name.to_lowercase(), key);
            out.push(Field {
                name: name.to_owned(),
                codec,
            });
        }
        Arc::new(AttrListSchema {
            fields: out,
            by_name,
        })
    }

    /// Look up a field's key by name (case-insensitive).
    pub fn key_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    fn field(&self, key: u16) -> Option<&Field> {
        self.fields.get(key as usize - 1)
    }

    /// Start building a new instance of this schema.
    pub fn instance(self: &Arc<Self>) -> AttrListBuilder {
        AttrListBuilder {
            schema: self.clone(),
            values: HashMap::new(),
        }
    }

    /// Pack `list` to wire bytes: each set field as a 4-byte TLV header plus
    /// payload plus zero-padding to a 4-byte boundary.
    pub fn pack(&self, list: &AttrList) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        for (key, value) in list.entries() {
            let field = self
                .field(key)
                .ok_or(CodecError::UnknownKey(key))?;
            let payload = self.pack_value(field, value, list.schema())?;
            let total_length = (payload.len() + 4) as u16;
            out.extend_from_slice(&total_length.to_ne_bytes());
            out.extend_from_slice(&key.to_ne_bytes());
            out.extend_from_slice(&payload);
            let pad = (4 - payload.len() % 4) % 4;
            out.extend(std::iter::repeat(0u8).take(pad));
        }
        Ok(out)
    }

    fn pack_value(
        &self,
        field: &Field,
        value: &Value,
        enclosing: &Arc<AttrListSchema>,
    ) -> Result<Vec<u8>, CodecError> {
        match &field.codec {
            AttrCodec::Scalar(codec) => {
                let scalar = value
                    .as_scalar()
                    .ok_or_else(|| CodecError::msg(format!("field {} is not a scalar", field.name)))?;
                codec.pack(&scalar)
            }
            AttrCodec::Nested(schema) => {
                let nested = value.nested()?;
                schema.pack(nested)
            }
            AttrCodec::SelfRef => {
                let nested = value.nested()?;
                enclosing.pack(nested)
            }
            AttrCodec::Ignore => Err(CodecError::msg(format!(
                "field {} uses the ignore codec and cannot be packed",
                field.name
            ))),
        }
    }

    /// Unpack `bytes` against this schema, resolving self-references to
    /// `self` (the enclosing schema at the top of the recursion).
    pub fn unpack(self: &Arc<Self>, bytes: &[u8]) -> Result<AttrList, CodecError> {
        self.unpack_with(bytes, self)
    }

    fn unpack_with(
        self: &Arc<Self>,
        bytes: &[u8],
        enclosing: &Arc<AttrListSchema>,
    ) -> Result<AttrList, CodecError> {
        let mut values = HashMap::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            if bytes.len() - offset < 4 {
                return Err(CodecError::Truncated {
                    need: 4,
                    have: bytes.len() - offset,
                });
            }
            let raw_len = u16::from_ne_bytes([bytes[offset], bytes[offset + 1]]);
            let key = u16::from_ne_bytes([bytes[offset + 2], bytes[offset + 3]]);
            let total_length = (raw_len & 0x7FFF) as usize;
            if total_length < 4 {
                return Err(CodecError::ShortHeader(raw_len));
            }
            let payload_len = total_length - 4;
            let have = bytes.len() - offset - 4;
            if have < payload_len {
                return Err(CodecError::Truncated {
                    need: payload_len,
                    have,
                });
            }
            let payload = &bytes[offset + 4..offset + 4 + payload_len];
            let field = self.field(key).ok_or(CodecError::UnknownKey(key))?;
            let value = match &field.codec {
                AttrCodec::Scalar(codec) => Value::from(codec.unpack(payload)?),
                AttrCodec::Nested(schema) => Value::Nested(schema.unpack(payload)?),
                AttrCodec::SelfRef => Value::Nested(enclosing.unpack_with(payload, enclosing)?),
                AttrCodec::Ignore => Value::Ignored(Buffer::from(payload)),
            };
            values.insert(key, value);
            offset += (total_length + 3) & !3;
        }
        Ok(AttrList {
            schema: self.clone(),
            values,
        })
    }
}

/// An instance of an [`AttrListSchema`]: a partial map from field key to
/// decoded value.
#[derive(Clone)]
pub struct AttrList {
    schema: Arc<AttrListSchema>,
    values: HashMap<u16, Value>,
}

impl AttrList {
    /// The schema this instance was built from.
    pub fn schema(&self) -> &Arc<AttrListSchema> {
        &self.schema
    }

    fn entries(&self) -> impl Iterator<Item = (u16, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Look up a value by name (case-insensitive) or numeric key.
    pub fn get(&self, key: impl Into<AttrKey>) -> Result<&Value, CodecError> {
        match key.into() {
            AttrKey::Name(name) => {
                let key = self
                    .schema
                    .key_of(&name)
                    .ok_or_else(|| CodecError::UnknownField(name.clone()))?;
                self.values
                    .get(&key)
                    .ok_or(CodecError::UnknownField(name))
            }
            AttrKey::Numeric(key) => self.values.get(&key).ok_or(CodecError::UnknownKey(key)),
        }
    }

    /// Like [`AttrList::get`] but returns `default` instead of failing when
    /// the field is absent (it must still exist in the schema).
    pub fn get_or<'a>(&'a self, key: impl Into<AttrKey>, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }
}

impl PartialEq for AttrList {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

/// Either a field name or a numeric key, accepted by [`AttrList::get`].
pub enum AttrKey {
    Name(String),
    Numeric(u16),
}

impl From<&str> for AttrKey {
    fn from(s: &str) -> Self {
        AttrKey::Name(s.to_owned())
    }
}

impl From<u16> for AttrKey {
    fn from(k: u16) -> Self {
        AttrKey::Numeric(k)
    }
}

/// Builds an [`AttrList`] instance field by field.
pub struct AttrListBuilder {
    schema: Arc<AttrListSchema>,
    values: HashMap<u16, Value>,
}

impl AttrListBuilder {
    /// Set a field by name. Fails if the name does not exist in the schema.
    pub fn set(mut self, name: &str, value: Value) -> Result<Self, CodecError> {
        let key = self
            .schema
            .key_of(name)
            .ok_or_else(|| CodecError::UnknownField(name.to_owned()))?;
        self.values.insert(key, value);
        Ok(self)
    }

    /// Finish building, producing an [`AttrList`].
    pub fn build(self) -> AttrList {
        AttrList {
            schema: self.schema,
            values: self.values,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flat_schema() -> Arc<AttrListSchema> {
        AttrListSchema::new(vec![
            ("u64", AttrCodec::Scalar(ScalarCodec::U64)),
            ("binary", AttrCodec::Scalar(ScalarCodec::Binary)),
            ("nulstring", AttrCodec::Scalar(ScalarCodec::CString)),
        ])
    }

    #[test]
    fn attribute_round_trip() {
        let schema = flat_schema();
        let list = schema
            .instance()
            .set("u64", Value::U64(2))
            .unwrap()
            .set("binary", Value::Bytes(Buffer::from(&b"ABCD"[..])))
            .unwrap()
            .set("nulstring", Value::Text("abcd".to_owned()))
            .unwrap()
            .build();
        let packed = schema.pack(&list).unwrap();
        let unpacked = schema.unpack(&packed).unwrap();
        assert_eq!(unpacked.get("u64").unwrap(), &Value::U64(2));
        assert_eq!(
            unpacked.get("binary").unwrap(),
            &Value::Bytes(Buffer::from(&b"ABCD"[..]))
        );
        assert_eq!(
            unpacked.get("nulstring").unwrap(),
            &Value::Text("abcd".to_owned())
        );
    }

    #[test]
    fn pack_output_is_4_byte_aligned() {
        let schema = flat_schema();
        let list = schema
            .instance()
            .set("nulstring", Value::Text("a".to_owned()))
            .unwrap()
            .build();
        let packed = schema.pack(&list).unwrap();
        assert_eq!(packed.len() % 4, 0);
    }

    #[test]
    fn header_arithmetic_is_payload_len_plus_4() {
        let schema = flat_schema();
        let list = schema
            .instance()
            .set("u64", Value::U64(0xdead_beef))
            .unwrap()
            .build();
        let packed = schema.pack(&list).unwrap();
        let total_length = u16::from_ne_bytes([packed[0], packed[1]]);
        assert_eq!(total_length as usize, 8 + 4);
    }

    #[test]
    fn unknown_field_name_fails() {
        let schema = flat_schema();
        let err = schema.instance().set("bogus", Value::U8(1)).unwrap_err();
        assert_eq!(err, CodecError::UnknownField("bogus".to_owned()));
    }

    #[test]
    fn self_reference_round_trips_at_depth_two() {
        // A schema with a "children" field whose codec is the schema again,
        // e.g. taskstats' AGGR_PID wrapping STATS.
        let schema = AttrListSchema::new(vec![
            ("value", AttrCodec::Scalar(ScalarCodec::U32)),
            ("child", AttrCodec::SelfRef),
        ]);

        let leaf = schema
            .instance()
            .set("value", Value::U32(2))
            .unwrap()
            .build();
        let mid = schema
            .instance()
            .set("value", Value::U32(1))
            .unwrap()
            .set("child", Value::Nested(leaf))
            .unwrap()
            .build();
        let root = schema
            .instance()
            .set("value", Value::U32(0))
            .unwrap()
            .set("child", Value::Nested(mid))
            .unwrap()
            .build();

        let packed = schema.pack(&root).unwrap();
        let unpacked = schema.unpack(&packed).unwrap();

        assert_eq!(unpacked.get("value").unwrap(), &Value::U32(0));
        let mid = unpacked.get("child").unwrap().nested().unwrap();
        assert_eq!(mid.get("value").unwrap(), &Value::U32(1));
        let leaf = mid.get("child").unwrap().nested().unwrap();
        assert_eq!(leaf.get("value").unwrap(), &Value::U32(2));
    }

    #[test]
    fn nested_bit_15_is_not_set_on_pack() {
        let inner = AttrListSchema::new(vec![("x", AttrCodec::Scalar(ScalarCodec::U8))]);
        let outer = AttrListSchema::new(vec![("nested", AttrCodec::Nested(inner.clone()))]);
        let inner_list = inner.instance().set("x", Value::U8(9)).unwrap().build();
        let list = outer
            .instance()
            .set("nested", Value::Nested(inner_list))
            .unwrap()
            .build();
        let packed = outer.pack(&list).unwrap();
        let raw_len = u16::from_ne_bytes([packed[0], packed[1]]);
        assert_eq!(raw_len & 0x8000, 0);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let schema = flat_schema();
        let err = schema.unpack(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                need: 4,
                have: 3
            }
        );
    }
}
