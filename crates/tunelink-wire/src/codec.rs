//! Binary encoding of value trees.
//!
//! Every value is a 4-byte big-endian kind tag followed by its body:
//!
//! ```text
//! none        (no body)
//! error       u32 len (incl. NUL) | bytes | 0x00
//! int64       i64
//! string      u32 len (incl. NUL) | bytes | 0x00
//! collection  u32 type | dict body | list body (idlist) | list body (operands)
//! binary      u32 len | bytes
//! list        u32 restriction tag (0 = none) | u32 count | elements
//! dict        u32 count | (string body, tagged value)*
//! ```
//!
//! Elements of a restricted list are written without their tag. The layout
//! doubles as the on-disk format, so it must not change.

use bytes::{BufMut, Bytes, BytesMut};
use tunelink_value::{Collection, CollectionType, Dict, List, Value, ValueType};

use crate::error::CodecError;

/// Deepest container nesting the decoder accepts.
pub const MAX_DEPTH: usize = 128;

type Result<T> = std::result::Result<T, CodecError>;

/// Serialize a value into a fresh buffer.
pub fn serialize(value: &Value) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    serialize_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the tagged encoding of `value` to `dst`.
pub fn serialize_into(value: &Value, dst: &mut BytesMut) -> Result<()> {
    dst.put_u32(value.kind().tag());
    put_body(value, dst)
}

fn put_len(dst: &mut BytesMut, what: &'static str, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| CodecError::TooLong { what, len })?;
    dst.put_u32(len);
    Ok(())
}

fn put_cstring(dst: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    put_len(dst, "string", bytes.len() + 1)?;
    dst.put_slice(bytes);
    dst.put_u8(0);
    Ok(())
}

fn put_body(value: &Value, dst: &mut BytesMut) -> Result<()> {
    match value.kind() {
        ValueType::None => Ok(()),
        ValueType::Error => put_cstring(dst, value.as_error()?.as_bytes()),
        ValueType::Int64 => {
            dst.put_i64(value.as_int()?);
            Ok(())
        }
        ValueType::String => put_cstring(dst, value.as_string_bytes()?),
        ValueType::Binary => {
            let bytes = value.as_binary()?;
            put_len(dst, "binary", bytes.len())?;
            dst.put_slice(bytes);
            Ok(())
        }
        ValueType::List => put_list(value.as_list()?, dst),
        ValueType::Dict => put_dict(value.as_dict()?, dst),
        ValueType::Collection => put_collection(value.as_collection()?, dst),
    }
}

fn put_list(list: &List, dst: &mut BytesMut) -> Result<()> {
    let restrict = list.restricted_type();
    dst.put_u32(restrict.map_or(ValueType::None.tag(), ValueType::tag));
    put_len(dst, "list", list.len())?;
    for item in list.iter() {
        if restrict.is_some() {
            put_body(item, dst)?;
        } else {
            serialize_into(item, dst)?;
        }
    }
    Ok(())
}

fn put_dict(dict: &Dict, dst: &mut BytesMut) -> Result<()> {
    put_len(dst, "dict", dict.len())?;
    for (key, value) in dict.iter() {
        put_cstring(dst, key.as_bytes())?;
        serialize_into(value, dst)?;
    }
    Ok(())
}

fn put_collection(coll: &Collection, dst: &mut BytesMut) -> Result<()> {
    dst.put_u32(coll.kind().id());
    put_dict(coll.attributes(), dst)?;
    put_list(coll.idlist(), dst)?;
    put_list(coll.operands(), dst)
}

/// Decode exactly one tagged value spanning all of `src`.
pub fn deserialize(src: &[u8]) -> Result<Value> {
    deserialize_bytes(Bytes::copy_from_slice(src))
}

/// Like [`deserialize`], sharing string and binary bodies with `src`.
pub fn deserialize_bytes(src: Bytes) -> Result<Value> {
    let mut decoder = Decoder { buf: src };
    let value = decoder.tagged(0)?;
    if !decoder.buf.is_empty() {
        return Err(CodecError::TrailingBytes(decoder.buf.len()));
    }
    Ok(value)
}

struct Decoder {
    buf: Bytes,
}

impl Decoder {
    fn need(&self, needed: usize) -> Result<()> {
        if self.buf.len() < needed {
            return Err(CodecError::Truncated {
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<Bytes> {
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw);
        Ok(i64::from_be_bytes(bytes))
    }

    fn kind(&mut self) -> Result<ValueType> {
        let tag = self.u32()?;
        ValueType::from_tag(tag).ok_or(CodecError::UnknownTag(tag))
    }

    // String body without its trailing NUL.
    fn cstring(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        if len == 0 {
            return Err(CodecError::MissingNul);
        }
        let mut raw = self.take(len)?;
        if raw[len - 1] != 0 {
            return Err(CodecError::MissingNul);
        }
        raw.truncate(len - 1);
        Ok(raw)
    }

    // Element count, bounded by what could possibly remain in the input.
    fn count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        self.need(count.saturating_mul(min_element_size))?;
        Ok(count)
    }

    fn tagged(&mut self, depth: usize) -> Result<Value> {
        let kind = self.kind()?;
        self.body(kind, depth)
    }

    fn body(&mut self, kind: ValueType, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }
        Ok(match kind {
            ValueType::None => Value::none(),
            ValueType::Error => {
                let raw = self.cstring()?;
                Value::error(String::from_utf8_lossy(&raw).into_owned())
            }
            ValueType::Int64 => Value::int(self.i64()?),
            ValueType::String => Value::string_bytes(self.cstring()?),
            ValueType::Binary => {
                let len = self.u32()? as usize;
                Value::binary(self.take(len)?)
            }
            ValueType::List => Value::list(self.list(depth)?),
            ValueType::Dict => Value::dict(self.dict(depth)?),
            ValueType::Collection => Value::collection(self.collection(depth)?),
        })
    }

    fn list(&mut self, depth: usize) -> Result<List> {
        let restrict = match self.kind()? {
            ValueType::None => None,
            kind => Some(kind),
        };
        let count = self.count(if restrict.is_some() { 0 } else { 4 })?;
        let mut items = Vec::with_capacity(count.min(self.buf.len()));
        for _ in 0..count {
            let item = match restrict {
                Some(kind) => self.body(kind, depth + 1)?,
                None => self.tagged(depth + 1)?,
            };
            items.push(item);
        }
        let mut list = List::from_values(items);
        if let Some(kind) = restrict {
            list.restrict_to(kind)?;
        }
        Ok(list)
    }

    fn dict(&mut self, depth: usize) -> Result<Dict> {
        // Smallest entry: 4-byte key length, NUL, 4-byte tag.
        let count = self.count(9)?;
        let mut dict = Dict::new();
        for _ in 0..count {
            let key = self.cstring()?;
            let key = std::str::from_utf8(&key)
                .map_err(|_| CodecError::InvalidKey)?
                .to_string();
            let value = self.tagged(depth + 1)?;
            dict.set(key, value);
        }
        Ok(dict)
    }

    fn collection(&mut self, depth: usize) -> Result<Collection> {
        let id = self.u32()?;
        let kind = CollectionType::from_id(id).ok_or(CodecError::UnknownCollectionType(id))?;
        let attributes = self.dict(depth)?;
        let idlist = self.list(depth)?;
        let operands = self.list(depth)?;
        Ok(Collection::from_parts(kind, attributes, idlist, operands)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(value: &Value) -> String {
        serialize(value)
            .expect("serialize")
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[test]
    fn scalar_layouts() {
        assert_eq!(hex(&Value::none()), "00000000");
        assert_eq!(hex(&Value::error("foo")), "0000000100000004666f6f00");
        assert_eq!(hex(&Value::from("foo")), "0000000300000004666f6f00");
        assert_eq!(hex(&Value::int(-2)), "00000002fffffffffffffffe");
        assert_eq!(
            hex(&Value::binary(b"\x00\x01ab".to_vec())),
            "000000050000000400016162"
        );
    }

    #[test]
    fn restricted_list_omits_element_tags() {
        let list = List::from_ints([1, 2]);
        assert_eq!(
            hex(&Value::list(list)),
            "00000006000000020000000200000000000000010000000000000002"
        );
        let open = List::from_values([Value::int(1)]);
        assert_eq!(
            hex(&Value::list(open)),
            "000000060000000000000001000000020000000000000001"
        );
    }

    #[test]
    fn dict_layout() {
        let mut dict = Dict::new();
        dict.set("k", Value::none());
        assert_eq!(hex(&Value::dict(dict)), "0000000700000001000000026b0000000000");
    }

    #[test]
    fn reference_collection_layout() {
        let coll = Collection::new(CollectionType::Reference);
        assert_eq!(
            hex(&Value::collection(coll)),
            "00000004000000000000000000000002000000000000000400000000"
        );
    }

    #[test]
    fn empty_containers_roundtrip() {
        let cases = [
            Value::list(List::new()),
            Value::list(List::restricted(ValueType::String).expect("restrict")),
            Value::list(List::restricted(ValueType::Dict).expect("restrict")),
            Value::dict(Dict::new()),
            Value::collection(Collection::new(CollectionType::Universe)),
            Value::collection(Collection::new(CollectionType::Reference)),
            Value::string(""),
            Value::binary(Vec::new()),
            Value::error(""),
            Value::list(List::from_values([
                Value::list(List::new()),
                Value::dict(Dict::new()),
            ])),
        ];
        for value in cases {
            let bytes = serialize(&value).expect("serialize");
            let decoded = deserialize(&bytes).expect("deserialize");
            assert_eq!(decoded, value, "bytes {bytes:02x?}");
        }
    }

    #[test]
    fn nested_tree_roundtrips() {
        let mut child = Collection::new(CollectionType::Equals);
        child.set_attribute("field", "id");
        child.set_attribute("value", "7");
        let mut coll = Collection::new(CollectionType::Intersection);
        coll.idlist_append(3).expect("idlist");
        coll.add_operand(child).expect("operand");

        let mut dict = Dict::new();
        dict.set("coll", Value::collection(coll));
        dict.set("raw", Value::binary(vec![0u8, 255]));
        dict.set("err", Value::error("nope"));
        dict.set("bad", Value::string(b"\xff\xfe"));
        let value = Value::list(List::from_values([
            Value::dict(dict),
            Value::none(),
            Value::list(List::from_ints([5, -5])),
        ]));

        let decoded = deserialize(&serialize(&value).expect("serialize")).expect("deserialize");
        assert_eq!(decoded, value);
    }

    #[test]
    fn truncation_is_reported_not_panicked() {
        let bytes = serialize(&Value::from("hello")).expect("serialize");
        for cut in 0..bytes.len() {
            assert!(matches!(
                deserialize(&bytes[..cut]),
                Err(CodecError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn malformed_inputs() {
        assert_eq!(
            deserialize(&[0, 0, 0, 9]).unwrap_err(),
            CodecError::UnknownTag(9)
        );
        assert_eq!(
            deserialize(&[0, 0, 0, 3, 0, 0, 0, 2, b'a', b'b']).unwrap_err(),
            CodecError::MissingNul
        );
        assert_eq!(
            deserialize(&[0, 0, 0, 0, 1]).unwrap_err(),
            CodecError::TrailingBytes(1)
        );
        // Restricted to Int64 but claims a huge count.
        assert!(matches!(
            deserialize(&[0, 0, 0, 6, 0, 0, 0, 2, 0xff, 0xff, 0xff, 0xff]),
            Err(CodecError::Truncated { .. })
        ));
        // Dict key that is not UTF-8.
        let mut key_bad = vec![0, 0, 0, 7, 0, 0, 0, 1, 0, 0, 0, 2, 0xff, 0];
        key_bad.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(deserialize(&key_bad).unwrap_err(), CodecError::InvalidKey);
    }

    #[test]
    fn nesting_limit() {
        let mut value = Value::none();
        for _ in 0..(MAX_DEPTH + 2) {
            value = Value::list(List::from_values([value]));
        }
        let bytes = serialize(&value).expect("serialize");
        assert_eq!(deserialize(&bytes).unwrap_err(), CodecError::TooDeep(MAX_DEPTH));
    }
}
