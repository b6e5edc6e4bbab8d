//! Client-to-client messaging through the server's courier.

use std::time::Duration;

use tunelink_value::{List, ReplyPolicy, Value};
use tunelink_wire::ids::{courier, object, signal};

use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::result::{CallResult, ResultClass};

fn courier_args(id: u32, policy: ReplyPolicy, payload: Value) -> Value {
    Value::list(List::from_values([
        Value::from(id),
        Value::int(policy.as_int()),
        payload,
    ]))
}

fn client_ids(value: &Value) -> Result<Vec<u32>> {
    value
        .as_list()?
        .iter()
        .map(|item| {
            let raw = item.as_int()?;
            u32::try_from(raw).map_err(|_| ClientError::Server(format!("invalid client id {raw}")))
        })
        .collect()
}

impl Connection {
    /// Send `payload` to client `destination`.
    ///
    /// With `NoReply` the result receives None once the message is routed.
    /// Otherwise it receives the reply envelopes; a `MultiReply` result
    /// stays open for every reply.
    pub fn send_message(
        &self,
        destination: u32,
        policy: ReplyPolicy,
        payload: Value,
    ) -> Result<CallResult> {
        let class = match policy {
            ReplyPolicy::MultiReply => ResultClass::Broadcast,
            _ => ResultClass::Default,
        };
        self.request(
            object::COURIER,
            courier::SEND_MESSAGE,
            courier_args(destination, policy, payload),
            class,
            true,
            None,
        )
    }

    /// Answer message `msgid`. A reply may itself expect a reply.
    pub fn reply(&self, msgid: u32, policy: ReplyPolicy, payload: Value) -> Result<CallResult> {
        let class = match policy {
            ReplyPolicy::MultiReply => ResultClass::Broadcast,
            _ => ResultClass::Default,
        };
        self.request(
            object::COURIER,
            courier::REPLY,
            courier_args(msgid, policy, payload),
            class,
            true,
            None,
        )
    }

    /// Subscribe to messages addressed to this client. Deliveries are
    /// envelopes.
    pub fn broadcast_c2c_messages(&self) -> Result<CallResult> {
        self.subscribe(ResultClass::Broadcast, signal::COURIER_MESSAGE, true)
    }

    /// Subscribe to ready announcements of other clients.
    pub fn broadcast_c2c_ready(&self) -> Result<CallResult> {
        self.subscribe(ResultClass::Broadcast, signal::COURIER_READY, true)
    }

    /// Announce that this client is ready to receive messages.
    pub fn ready(&self) -> Result<CallResult> {
        self.request(
            object::COURIER,
            courier::READY,
            Value::list(List::new()),
            ResultClass::Default,
            true,
            None,
        )
    }

    /// Ids of every connected client, ascending.
    pub fn connected_clients(&self, timeout: Duration) -> Result<Vec<u32>> {
        let result = self.call(
            object::COURIER,
            courier::GET_CONNECTED_CLIENTS,
            Value::list(List::new()),
        )?;
        client_ids(&result.wait_ok(timeout)?)
    }

    /// Ids of clients that announced readiness, ascending.
    pub fn ready_clients(&self, timeout: Duration) -> Result<Vec<u32>> {
        let result = self.call(
            object::COURIER,
            courier::GET_READY_CLIENTS,
            Value::list(List::new()),
        )?;
        client_ids(&result.wait_ok(timeout)?)
    }
}
