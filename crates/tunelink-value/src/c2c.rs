//! Client-to-client message envelopes.

use std::fmt;

use crate::dict::Dict;
use crate::error::{Result, ValueError};
use crate::value::Value;

pub const KEY_SENDER: &str = "sender";
pub const KEY_DESTINATION: &str = "destination";
pub const KEY_ID: &str = "id";
pub const KEY_PAYLOAD: &str = "payload";

/// How many replies the sender of a courier message is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplyPolicy {
    #[default]
    NoReply,
    SingleReply,
    MultiReply,
}

impl ReplyPolicy {
    pub fn as_int(self) -> i64 {
        match self {
            ReplyPolicy::NoReply => 0,
            ReplyPolicy::SingleReply => 1,
            ReplyPolicy::MultiReply => 2,
        }
    }

    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            0 => Some(ReplyPolicy::NoReply),
            1 => Some(ReplyPolicy::SingleReply),
            2 => Some(ReplyPolicy::MultiReply),
            _ => None,
        }
    }

    pub fn expects_reply(self) -> bool {
        self != ReplyPolicy::NoReply
    }
}

impl fmt::Display for ReplyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplyPolicy::NoReply => "no-reply",
            ReplyPolicy::SingleReply => "single-reply",
            ReplyPolicy::MultiReply => "multi-reply",
        })
    }
}

/// A relayed message: who sent it, who it is for, the exchange id to reply
/// to (0 when no reply is expected) and the application payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: u32,
    pub destination: u32,
    pub id: u32,
    pub payload: Value,
}

impl Envelope {
    pub fn new(sender: u32, destination: u32, id: u32, payload: Value) -> Self {
        Self {
            sender,
            destination,
            id,
            payload,
        }
    }

    /// Wrap a value that did not come through the courier.
    pub fn anonymous(payload: Value) -> Self {
        Self::new(0, 0, 0, payload)
    }

    pub fn expects_reply(&self) -> bool {
        self.id != 0
    }

    pub fn to_value(&self) -> Value {
        let mut dict = Dict::new();
        dict.set(KEY_SENDER, Value::from(self.sender));
        dict.set(KEY_DESTINATION, Value::from(self.destination));
        dict.set(KEY_ID, Value::from(self.id));
        dict.set(KEY_PAYLOAD, self.payload.clone());
        Value::dict(dict)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let dict = value.as_dict()?;
        let payload = dict
            .get(KEY_PAYLOAD)
            .cloned()
            .ok_or_else(|| ValueError::InvalidEnvelope("missing payload".into()))?;
        Ok(Self {
            sender: id_field(dict, KEY_SENDER)?,
            destination: id_field(dict, KEY_DESTINATION)?,
            id: id_field(dict, KEY_ID)?,
            payload,
        })
    }

    /// True when `value` carries every envelope key.
    pub fn is_envelope(value: &Value) -> bool {
        value.as_dict().is_ok_and(|dict| {
            [KEY_SENDER, KEY_DESTINATION, KEY_ID, KEY_PAYLOAD]
                .iter()
                .all(|key| dict.contains_key(key))
        })
    }
}

fn id_field(dict: &Dict, key: &str) -> Result<u32> {
    let raw = dict
        .get(key)
        .ok_or_else(|| ValueError::InvalidEnvelope(format!("missing {key}")))?
        .as_int()?;
    u32::try_from(raw).map_err(|_| ValueError::InvalidEnvelope(format!("{key} out of range: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_dict_shape() {
        let env = Envelope::new(3, 7, 12, Value::from("hi"));
        let value = env.to_value();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.len(), 4);
        assert_eq!(dict.get("sender"), Some(&Value::int(3)));
        assert_eq!(dict.get("destination"), Some(&Value::int(7)));
        assert_eq!(dict.get("id"), Some(&Value::int(12)));
        assert_eq!(Envelope::from_value(&value).unwrap(), env);
        assert!(Envelope::is_envelope(&value));
    }

    #[test]
    fn rejects_incomplete_envelopes() {
        let mut dict = Dict::new();
        dict.set("sender", Value::int(1));
        dict.set("payload", Value::none());
        let value = Value::dict(dict);
        assert!(!Envelope::is_envelope(&value));
        assert!(matches!(
            Envelope::from_value(&value),
            Err(ValueError::InvalidEnvelope(_))
        ));
        assert!(Envelope::from_value(&Value::int(1)).is_err());
    }

    #[test]
    fn anonymous_has_zero_ids() {
        let env = Envelope::anonymous(Value::int(5));
        assert_eq!((env.sender, env.destination, env.id), (0, 0, 0));
        assert!(!env.expects_reply());
    }

    #[test]
    fn policy_ids() {
        for policy in [
            ReplyPolicy::NoReply,
            ReplyPolicy::SingleReply,
            ReplyPolicy::MultiReply,
        ] {
            assert_eq!(ReplyPolicy::from_int(policy.as_int()), Some(policy));
        }
        assert_eq!(ReplyPolicy::from_int(3), None);
        assert!(!ReplyPolicy::NoReply.expects_reply());
    }
}
