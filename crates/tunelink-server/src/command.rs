use std::sync::Arc;

use tunelink_value::{List, Value};

use crate::error::CommandError;
use crate::peer::PeerHandle;
use crate::runtime::Runtime;

/// What a command handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Send this value back as a REPLY with the request's cookie.
    Value(Value),
    /// Nothing now; the handler (or a later event) answers the cookie itself.
    Deferred,
}

impl Reply {
    pub fn none() -> Self {
        Reply::Value(Value::none())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

/// The request a handler is answering.
pub struct CommandContext<'a> {
    pub runtime: &'a Runtime,
    pub peer: &'a Arc<PeerHandle>,
    pub object: u32,
    pub command: u32,
    pub cookie: u32,
}

impl CommandContext<'_> {
    pub fn client_id(&self) -> u32 {
        self.peer.id()
    }
}

/// A registered command handler.
pub trait Command: Send + Sync {
    fn call(&self, ctx: &CommandContext<'_>, args: &Value) -> Result<Reply, CommandError>;
}

impl<F> Command for F
where
    F: Fn(&CommandContext<'_>, &Value) -> Result<Reply, CommandError> + Send + Sync,
{
    fn call(&self, ctx: &CommandContext<'_>, args: &Value) -> Result<Reply, CommandError> {
        self(ctx, args)
    }
}

/// Positional view of a command's argument list.
pub struct Args<'a> {
    list: &'a List,
}

impl<'a> Args<'a> {
    /// Require `payload` to be a list of exactly `expected` arguments.
    pub fn parse(payload: &'a Value, expected: usize) -> Result<Self, CommandError> {
        let list = payload
            .as_list()
            .map_err(|_| CommandError::new("arguments must be a list"))?;
        if list.len() != expected {
            return Err(CommandError::new(format!(
                "expected {expected} arguments, got {}",
                list.len()
            )));
        }
        Ok(Self { list })
    }

    pub fn value(&self, index: usize) -> Result<&'a Value, CommandError> {
        self.list
            .as_slice()
            .get(index)
            .ok_or_else(|| CommandError::new(format!("missing argument {index}")))
    }

    pub fn int(&self, index: usize) -> Result<i64, CommandError> {
        self.value(index)?
            .as_int()
            .map_err(|err| CommandError::new(format!("argument {index}: {err}")))
    }

    /// An int argument that must fit a client or message id.
    pub fn id(&self, index: usize) -> Result<u32, CommandError> {
        let raw = self.int(index)?;
        u32::try_from(raw)
            .map_err(|_| CommandError::new(format!("argument {index}: id {raw} out of range")))
    }

    pub fn str(&self, index: usize) -> Result<&'a str, CommandError> {
        self.value(index)?
            .as_str()
            .map_err(|err| CommandError::new(format!("argument {index}: {err}")))
    }
}
