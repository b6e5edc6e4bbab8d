use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::coll::Collection;
use crate::dict::Dict;
use crate::error::{Result, ValueError};
use crate::list::List;

/// The kind of a [`Value`]. The discriminants are the on-wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    None,
    Error,
    Int64,
    String,
    Collection,
    Binary,
    List,
    Dict,
}

impl ValueType {
    /// The 32-bit tag written in front of every encoded value.
    pub const fn tag(self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::Error => 1,
            ValueType::Int64 => 2,
            ValueType::String => 3,
            ValueType::Collection => 4,
            ValueType::Binary => 5,
            ValueType::List => 6,
            ValueType::Dict => 7,
        }
    }

    pub const fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => ValueType::None,
            1 => ValueType::Error,
            2 => ValueType::Int64,
            3 => ValueType::String,
            4 => ValueType::Collection,
            5 => ValueType::Binary,
            6 => ValueType::List,
            7 => ValueType::Dict,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValueType::None => "none",
            ValueType::Error => "error",
            ValueType::Int64 => "int64",
            ValueType::String => "string",
            ValueType::Collection => "collection",
            ValueType::Binary => "binary",
            ValueType::List => "list",
            ValueType::Dict => "dict",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
enum Payload {
    None,
    Error(String),
    Int64(i64),
    String(Bytes),
    Binary(Bytes),
    List(List),
    Dict(Dict),
    Collection(Collection),
}

/// A shared, tagged dynamic value.
///
/// Cloning a `Value` only bumps a reference count. The payload is immutable
/// while shared: the `*_mut` accessors and setters copy the payload first
/// when another handle still refers to it, so a value queued for one peer
/// can never be changed underneath it.
#[derive(Clone)]
pub struct Value {
    payload: Arc<Payload>,
}

impl Value {
    fn from_payload(payload: Payload) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    pub fn none() -> Self {
        Self::from_payload(Payload::None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::from_payload(Payload::Error(message.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::from_payload(Payload::Int64(value))
    }

    /// A string value. The bytes are not required to be UTF-8.
    pub fn string(value: impl AsRef<[u8]>) -> Self {
        Self::from_payload(Payload::String(Bytes::copy_from_slice(value.as_ref())))
    }

    pub fn string_bytes(value: Bytes) -> Self {
        Self::from_payload(Payload::String(value))
    }

    pub fn binary(value: impl Into<Bytes>) -> Self {
        Self::from_payload(Payload::Binary(value.into()))
    }

    pub fn list(list: List) -> Self {
        Self::from_payload(Payload::List(list))
    }

    pub fn dict(dict: Dict) -> Self {
        Self::from_payload(Payload::Dict(dict))
    }

    pub fn collection(coll: Collection) -> Self {
        Self::from_payload(Payload::Collection(coll))
    }

    pub fn kind(&self) -> ValueType {
        match &*self.payload {
            Payload::None => ValueType::None,
            Payload::Error(_) => ValueType::Error,
            Payload::Int64(_) => ValueType::Int64,
            Payload::String(_) => ValueType::String,
            Payload::Binary(_) => ValueType::Binary,
            Payload::List(_) => ValueType::List,
            Payload::Dict(_) => ValueType::Dict,
            Payload::Collection(_) => ValueType::Collection,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(&*self.payload, Payload::None)
    }

    pub fn is_error(&self) -> bool {
        matches!(&*self.payload, Payload::Error(_))
    }

    /// Whether two handles share the same payload allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// Number of live handles sharing this payload.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.payload)
    }

    fn mismatch(&self, expected: ValueType) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_error(&self) -> Result<&str> {
        match &*self.payload {
            Payload::Error(message) => Ok(message),
            _ => Err(self.mismatch(ValueType::Error)),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match &*self.payload {
            Payload::Int64(v) => Ok(*v),
            _ => Err(self.mismatch(ValueType::Int64)),
        }
    }

    /// Raw bytes of a string value.
    pub fn as_string_bytes(&self) -> Result<&Bytes> {
        match &*self.payload {
            Payload::String(bytes) => Ok(bytes),
            _ => Err(self.mismatch(ValueType::String)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        let bytes = self.as_string_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| ValueError::InvalidUtf8)
    }

    pub fn as_binary(&self) -> Result<&Bytes> {
        match &*self.payload {
            Payload::Binary(bytes) => Ok(bytes),
            _ => Err(self.mismatch(ValueType::Binary)),
        }
    }

    pub fn as_list(&self) -> Result<&List> {
        match &*self.payload {
            Payload::List(list) => Ok(list),
            _ => Err(self.mismatch(ValueType::List)),
        }
    }

    pub fn as_dict(&self) -> Result<&Dict> {
        match &*self.payload {
            Payload::Dict(dict) => Ok(dict),
            _ => Err(self.mismatch(ValueType::Dict)),
        }
    }

    pub fn as_collection(&self) -> Result<&Collection> {
        match &*self.payload {
            Payload::Collection(coll) => Ok(coll),
            _ => Err(self.mismatch(ValueType::Collection)),
        }
    }

    // The kind check happens before `make_mut` so a failed call never
    // detaches a shared payload.
    fn payload_mut(&mut self, expected: ValueType) -> Result<&mut Payload> {
        if self.kind() != expected {
            return Err(self.mismatch(expected));
        }
        Ok(Arc::make_mut(&mut self.payload))
    }

    pub fn list_mut(&mut self) -> Result<&mut List> {
        let mismatch = self.mismatch(ValueType::List);
        match self.payload_mut(ValueType::List)? {
            Payload::List(list) => Ok(list),
            _ => Err(mismatch),
        }
    }

    pub fn dict_mut(&mut self) -> Result<&mut Dict> {
        let mismatch = self.mismatch(ValueType::Dict);
        match self.payload_mut(ValueType::Dict)? {
            Payload::Dict(dict) => Ok(dict),
            _ => Err(mismatch),
        }
    }

    pub fn collection_mut(&mut self) -> Result<&mut Collection> {
        let mismatch = self.mismatch(ValueType::Collection);
        match self.payload_mut(ValueType::Collection)? {
            Payload::Collection(coll) => Ok(coll),
            _ => Err(mismatch),
        }
    }

    pub fn set_int(&mut self, value: i64) -> Result<()> {
        if let Payload::Int64(slot) = self.payload_mut(ValueType::Int64)? {
            *slot = value;
        }
        Ok(())
    }

    pub fn set_string(&mut self, value: impl AsRef<[u8]>) -> Result<()> {
        if let Payload::String(slot) = self.payload_mut(ValueType::String)? {
            *slot = Bytes::copy_from_slice(value.as_ref());
        }
        Ok(())
    }

    pub fn set_binary(&mut self, value: impl Into<Bytes>) -> Result<()> {
        if let Payload::Binary(slot) = self.payload_mut(ValueType::Binary)? {
            *slot = value.into();
        }
        Ok(())
    }

    pub fn set_error(&mut self, message: impl Into<String>) -> Result<()> {
        if let Payload::Error(slot) = self.payload_mut(ValueType::Error)? {
            *slot = message.into();
        }
        Ok(())
    }

    /// Structural equality that ignores the order of list elements and
    /// collection operands at every level.
    pub fn unordered_eq(&self, other: &Value) -> bool {
        match (&*self.payload, &*other.payload) {
            (Payload::List(a), Payload::List(b)) => {
                a.restricted_type() == b.restricted_type() && unordered_items_eq(a, b)
            }
            (Payload::Dict(a), Payload::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, v)| b.get(key).is_some_and(|w| v.unordered_eq(w)))
            }
            (Payload::Collection(a), Payload::Collection(b)) => {
                a.kind() == b.kind()
                    && a.attributes() == b.attributes()
                    && a.idlist() == b.idlist()
                    && unordered_items_eq(a.operands(), b.operands())
            }
            _ => self == other,
        }
    }
}

fn unordered_items_eq(a: &List, b: &List) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|x| {
        let found = b
            .iter()
            .enumerate()
            .position(|(i, y)| !used[i] && x.unordered_eq(y));
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (&*self.payload, &*other.payload) {
            (Payload::None, Payload::None) => true,
            (Payload::Error(a), Payload::Error(b)) => a == b,
            (Payload::Int64(a), Payload::Int64(b)) => a == b,
            (Payload::String(a), Payload::String(b)) => a == b,
            (Payload::Binary(a), Payload::Binary(b)) => a == b,
            (Payload::List(a), Payload::List(b)) => a == b,
            (Payload::Dict(a), Payload::Dict(b)) => a == b,
            (Payload::Collection(a), Payload::Collection(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::none()
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::int(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::string_bytes(Bytes::from(value))
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::list(list)
    }
}

impl From<Dict> for Value {
    fn from(dict: Dict) -> Self {
        Value::dict(dict)
    }
}

impl From<Collection> for Value {
    fn from(coll: Collection) -> Self {
        Value::collection(coll)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.payload {
            Payload::None => f.write_str("none"),
            Payload::Error(message) => write!(f, "error({message:?})"),
            Payload::Int64(v) => write!(f, "{v}"),
            Payload::String(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Payload::Binary(bytes) => write!(f, "<binary {} bytes>", bytes.len()),
            Payload::List(list) => {
                f.write_str("[")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Payload::Dict(dict) => {
                let mut entries: Vec<_> = dict.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                f.write_str("{")?;
                for (i, (key, value)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
            Payload::Collection(coll) => write!(f, "{coll}"),
        }
    }
}
