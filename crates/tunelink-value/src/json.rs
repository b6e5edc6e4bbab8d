//! JSON conversion for operator tooling.
//!
//! Strings that are not UTF-8 are rendered lossily, binaries as byte arrays,
//! errors as `{"error": message}` and collections as a tagged object.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::coll::Collection;
use crate::dict::Dict;
use crate::error::{Result, ValueError};
use crate::list::List;
use crate::value::{Value, ValueType};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.kind() {
            ValueType::None => serializer.serialize_unit(),
            ValueType::Error => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", self.as_error().unwrap_or_default())?;
                map.end()
            }
            ValueType::Int64 => serializer.serialize_i64(self.as_int().unwrap_or_default()),
            ValueType::String => {
                let text = self
                    .as_string_bytes()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                serializer.serialize_str(&text)
            }
            ValueType::Binary => {
                let bytes = self.as_binary().map(|b| b.to_vec()).unwrap_or_default();
                bytes.serialize(serializer)
            }
            ValueType::List => match self.as_list() {
                Ok(list) => list.serialize(serializer),
                Err(_) => serializer.serialize_unit(),
            },
            ValueType::Dict => match self.as_dict() {
                Ok(dict) => dict.serialize(serializer),
                Err(_) => serializer.serialize_unit(),
            },
            ValueType::Collection => match self.as_collection() {
                Ok(coll) => coll.serialize(serializer),
                Err(_) => serializer.serialize_unit(),
            },
        }
    }
}

impl Serialize for List {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for item in self.iter() {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl Serialize for Dict {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("type", self.kind().name())?;
        map.serialize_entry("attributes", self.attributes())?;
        map.serialize_entry("idlist", self.idlist())?;
        map.serialize_entry("operands", self.operands())?;
        map.end()
    }
}

/// Build a value from a JSON document.
///
/// Booleans become 0/1 and only integral numbers are accepted.
pub fn from_json(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::none(),
        serde_json::Value::Bool(b) => Value::int(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(v) => Value::int(v),
            None => {
                return Err(ValueError::UnsupportedJson(format!(
                    "number {n} is not a 64-bit integer"
                )))
            }
        },
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            let values = items.iter().map(from_json).collect::<Result<Vec<_>>>()?;
            Value::list(List::from_values(values))
        }
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (key, value) in map {
                dict.set(key.clone(), from_json(value)?);
            }
            Value::dict(dict)
        }
    })
}

/// Render a value as a JSON document.
pub fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
