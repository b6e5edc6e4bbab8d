use std::sync::Arc;

use tracing::{debug, trace};
use tunelink_value::Value;
use tunelink_wire::ids::{self, signal_cmd};
use tunelink_wire::Message;

use crate::command::{Args, CommandContext, Reply};
use crate::error::{CommandError, Result, ServerError};
use crate::peer::PeerHandle;
use crate::runtime::Runtime;

impl Runtime {
    /// Handle one inbound message from `peer`.
    ///
    /// Failures become an ERROR frame with the request's cookie; they never
    /// end the session.
    pub(crate) fn dispatch(&self, peer: &Arc<PeerHandle>, message: Message) {
        let Message {
            object,
            command,
            cookie,
            payload,
        } = message;
        debug!(client_id = peer.id(), object, command, cookie, "dispatch");

        let outcome = if object == ids::object::SIGNAL {
            register_interest(peer, command, cookie, &payload)
        } else {
            self.handler(object, command).and_then(|handler| {
                let ctx = CommandContext {
                    runtime: self,
                    peer,
                    object,
                    command,
                    cookie,
                };
                handler.call(&ctx, &payload)
            })
        };

        let response = match outcome {
            Ok(Reply::Value(value)) => Message::reply(object, cookie, value),
            Ok(Reply::Deferred) => return,
            Err(err) => {
                debug!(client_id = peer.id(), cookie, error = %err, "command failed");
                Message::error(object, cookie, err.0)
            }
        };
        if let Err(err) = peer.enqueue(response) {
            debug!(client_id = peer.id(), error = %err, "reply dropped");
        }
    }

    /// Deliver `value` once to every client holding a pending registration
    /// for `signal`, consuming the registration. Returns the delivery count.
    pub fn emit_signal(&self, signal: u32, value: &Value) -> usize {
        let mut delivered = 0;
        for peer in self.peers() {
            if let Some(cookie) = peer.take_signal(signal) {
                let message = Message::new(
                    ids::object::SIGNAL,
                    signal_cmd::SIGNAL,
                    cookie,
                    value.clone(),
                );
                if peer.enqueue(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        trace!(signal, delivered, "signal emitted");
        delivered
    }

    /// Deliver `value` to every broadcast registration for `signal`.
    pub fn emit_broadcast(&self, signal: u32, value: &Value) -> usize {
        self.peers()
            .iter()
            .map(|peer| deliver_broadcast(peer, signal, value).unwrap_or(0))
            .sum()
    }

    /// Deliver a broadcast to a single client.
    ///
    /// A connected client without a registration receives nothing and that
    /// is not an error; an unknown client is.
    pub fn broadcast_to(&self, client_id: u32, signal: u32, value: &Value) -> Result<usize> {
        let peer = self
            .peer(client_id)
            .ok_or(ServerError::PeerNotFound(client_id))?;
        deliver_broadcast(&peer, signal, value)
    }
}

fn deliver_broadcast(peer: &PeerHandle, signal: u32, value: &Value) -> Result<usize> {
    let cookies = peer.broadcast_cookies(signal);
    for cookie in &cookies {
        peer.enqueue(Message::new(
            ids::object::SIGNAL,
            signal_cmd::BROADCAST,
            *cookie,
            value.clone(),
        ))?;
    }
    Ok(cookies.len())
}

fn register_interest(
    peer: &PeerHandle,
    command: u32,
    cookie: u32,
    payload: &Value,
) -> std::result::Result<Reply, CommandError> {
    let signal = Args::parse(payload, 1)?.id(0)?;
    match command {
        signal_cmd::SIGNAL => {
            peer.register_signal(signal, cookie);
            Ok(Reply::Deferred)
        }
        signal_cmd::BROADCAST => {
            peer.register_broadcast(signal, cookie);
            Ok(Reply::Deferred)
        }
        signal_cmd::UNREGISTER => {
            peer.unregister(signal);
            Ok(Reply::none())
        }
        other => Err(CommandError::new(format!(
            "unknown command {other} on object {}",
            ids::object::SIGNAL
        ))),
    }
}
