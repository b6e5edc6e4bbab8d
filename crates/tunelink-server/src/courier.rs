//! Client-to-client message relay.
//!
//! A message that expects a reply is recorded as a [`PendingExchange`]
//! keyed by a message id. Replies route back to the original sender on the
//! cookie of its SEND_MESSAGE request, so a MULTI_REPLY sender sees every
//! reply on one result. Exchanges die with either party; a sender whose
//! destination vanishes gets exactly one Error for each open exchange.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use tracing::{debug, info};
use tunelink_value::{Envelope, List, ReplyPolicy, Value};
use tunelink_wire::ids::{courier as cmd, object, signal};
use tunelink_wire::Message;

use crate::command::{Args, CommandContext, Reply};
use crate::error::CommandError;
use crate::peer::lock;
use crate::runtime::Runtime;

pub const PENDING_NOT_FOUND: &str = "pending message not found";
pub const SENDER_MISMATCH: &str = "sender mismatch in reply";
pub const DESTINATION_DISCONNECTED: &str = "destination client disconnected";

/// An outstanding reply-expecting message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExchange {
    pub id: u32,
    pub sender: u32,
    pub destination: u32,
    /// Cookie of the sender's request; replies are written to it.
    pub cookie: u32,
    pub policy: ReplyPolicy,
}

#[derive(Debug)]
struct CourierState {
    next_id: u32,
    pending: HashMap<u32, PendingExchange>,
    ready: BTreeSet<u32>,
}

/// Pending-exchange pool and ready-client set.
#[derive(Debug)]
pub struct Courier {
    state: Mutex<CourierState>,
}

impl Courier {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CourierState {
                next_id: 1,
                pending: HashMap::new(),
                ready: BTreeSet::new(),
            }),
        }
    }

    fn store_pending(
        &self,
        sender: u32,
        destination: u32,
        cookie: u32,
        policy: ReplyPolicy,
    ) -> u32 {
        let mut state = lock(&self.state);
        // Id 0 means "no reply expected" and is never handed out.
        let mut id = state.next_id;
        while id == 0 || state.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_id = id.wrapping_add(1);
        state.pending.insert(
            id,
            PendingExchange {
                id,
                sender,
                destination,
                cookie,
                policy,
            },
        );
        id
    }

    fn remove_pending(&self, id: u32) -> Option<PendingExchange> {
        lock(&self.state).pending.remove(&id)
    }

    pub fn pending(&self, id: u32) -> Option<PendingExchange> {
        lock(&self.state).pending.get(&id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Clients that announced readiness, ascending.
    pub fn ready_clients(&self) -> Vec<u32> {
        lock(&self.state).ready.iter().copied().collect()
    }

    fn mark_ready(&self, client_id: u32) -> bool {
        lock(&self.state).ready.insert(client_id)
    }

    /// Forget every exchange involving `client_id` and fail the ones it was
    /// supposed to answer.
    pub(crate) fn on_disconnected(&self, runtime: &Runtime, client_id: u32) {
        let orphaned: Vec<PendingExchange> = {
            let mut state = lock(&self.state);
            state.ready.remove(&client_id);
            let mut orphaned = Vec::new();
            state.pending.retain(|_, exchange| {
                let involved = exchange.sender == client_id || exchange.destination == client_id;
                if involved && exchange.destination == client_id && exchange.sender != client_id {
                    orphaned.push(exchange.clone());
                }
                !involved
            });
            orphaned
        };

        for exchange in orphaned {
            debug!(
                msgid = exchange.id,
                sender = exchange.sender,
                "failing exchange with departed destination"
            );
            let _ = runtime.send_to(
                exchange.sender,
                Message::error(object::COURIER, exchange.cookie, DESTINATION_DISCONNECTED),
            );
        }
    }
}

pub(crate) fn register(runtime: &Runtime) {
    runtime.register_command(object::COURIER, cmd::SEND_MESSAGE, send_message);
    runtime.register_command(object::COURIER, cmd::REPLY, reply);
    runtime.register_command(
        object::COURIER,
        cmd::GET_CONNECTED_CLIENTS,
        get_connected_clients,
    );
    runtime.register_command(object::COURIER, cmd::READY, ready);
    runtime.register_command(object::COURIER, cmd::GET_READY_CLIENTS, get_ready_clients);
}

fn policy_arg(args: &Args<'_>, index: usize) -> Result<ReplyPolicy, CommandError> {
    let raw = args.int(index)?;
    ReplyPolicy::from_int(raw)
        .ok_or_else(|| CommandError::new(format!("invalid reply policy {raw}")))
}

/// `[Int destination, Int policy, Value payload]`
fn send_message(ctx: &CommandContext<'_>, args: &Value) -> Result<Reply, CommandError> {
    let args = Args::parse(args, 3)?;
    let destination = args.id(0)?;
    let policy = policy_arg(&args, 1)?;
    let payload = args.value(2)?.clone();

    let courier = ctx.runtime.courier();
    let msgid = if policy.expects_reply() {
        courier.store_pending(ctx.client_id(), destination, ctx.cookie, policy)
    } else {
        0
    };
    info!(
        sender = ctx.client_id(),
        destination,
        msgid,
        %policy,
        "relaying message"
    );
    send_internal(ctx, destination, msgid, payload, policy, None)
}

/// `[Int msgid, Int policy, Value payload]`
fn reply(ctx: &CommandContext<'_>, args: &Value) -> Result<Reply, CommandError> {
    let args = Args::parse(args, 3)?;
    let msgid = args.id(0)?;
    let policy = policy_arg(&args, 1)?;
    let payload = args.value(2)?.clone();

    let courier = ctx.runtime.courier();
    let context = courier
        .pending(msgid)
        .ok_or_else(|| CommandError::new(PENDING_NOT_FOUND))?;
    if context.destination != ctx.client_id() {
        return Err(CommandError::new(SENDER_MISMATCH));
    }
    if context.policy == ReplyPolicy::SingleReply {
        courier.remove_pending(msgid);
    }

    let new_id = if policy.expects_reply() {
        courier.store_pending(ctx.client_id(), context.sender, ctx.cookie, policy)
    } else {
        0
    };
    debug!(
        replier = ctx.client_id(),
        sender = context.sender,
        msgid,
        new_id,
        "relaying reply"
    );
    send_internal(ctx, context.sender, new_id, payload, policy, Some(context.cookie))
}

// Route an envelope to `destination`: as a targeted COURIER_MESSAGE
// broadcast, or as a reply on `reply_cookie`. The caller's own request is
// answered with None right away only when it expects no reply.
fn send_internal(
    ctx: &CommandContext<'_>,
    destination: u32,
    msgid: u32,
    payload: Value,
    policy: ReplyPolicy,
    reply_cookie: Option<u32>,
) -> Result<Reply, CommandError> {
    let envelope = Envelope::new(ctx.client_id(), destination, msgid, payload).to_value();
    let routed = match reply_cookie {
        None => ctx
            .runtime
            .broadcast_to(destination, signal::COURIER_MESSAGE, &envelope)
            .map(|_| ()),
        Some(cookie) => ctx.runtime.send_to(
            destination,
            Message::reply(object::COURIER, cookie, envelope),
        ),
    };

    match routed {
        Ok(()) if policy.expects_reply() => Ok(Reply::Deferred),
        Ok(()) => Ok(Reply::none()),
        Err(err) => {
            if msgid != 0 {
                ctx.runtime.courier().remove_pending(msgid);
            }
            Err(err.into())
        }
    }
}

fn get_connected_clients(ctx: &CommandContext<'_>, _args: &Value) -> Result<Reply, CommandError> {
    let ids = ctx.runtime.peer_ids();
    Ok(Reply::Value(Value::list(List::from_ints(
        ids.into_iter().map(i64::from),
    ))))
}

fn ready(ctx: &CommandContext<'_>, _args: &Value) -> Result<Reply, CommandError> {
    let client_id = ctx.client_id();
    if ctx.runtime.courier().mark_ready(client_id) {
        info!(client_id, "client ready");
    }
    ctx.runtime
        .emit_broadcast(signal::COURIER_READY, &Value::from(client_id));
    Ok(Reply::none())
}

fn get_ready_clients(ctx: &CommandContext<'_>, _args: &Value) -> Result<Reply, CommandError> {
    let ids = ctx.runtime.courier().ready_clients();
    Ok(Reply::Value(Value::list(List::from_ints(
        ids.into_iter().map(i64::from),
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_start_at_one_and_skip_zero() {
        let courier = Courier::new();
        assert_eq!(courier.store_pending(1, 2, 10, ReplyPolicy::SingleReply), 1);
        assert_eq!(courier.store_pending(1, 2, 11, ReplyPolicy::MultiReply), 2);

        lock(&courier.state).next_id = u32::MAX;
        assert_eq!(
            courier.store_pending(1, 2, 12, ReplyPolicy::SingleReply),
            u32::MAX
        );
        // Wraps past 0 and the ids still in use.
        assert_eq!(courier.store_pending(1, 2, 13, ReplyPolicy::SingleReply), 3);
        assert_eq!(courier.pending_count(), 4);
    }

    #[test]
    fn pending_lookup_and_removal() {
        let courier = Courier::new();
        let id = courier.store_pending(4, 5, 99, ReplyPolicy::SingleReply);
        let exchange = courier.pending(id).unwrap();
        assert_eq!(
            exchange,
            PendingExchange {
                id,
                sender: 4,
                destination: 5,
                cookie: 99,
                policy: ReplyPolicy::SingleReply,
            }
        );
        assert!(courier.remove_pending(id).is_some());
        assert!(courier.pending(id).is_none());
    }

    #[test]
    fn ready_set_is_sorted_and_deduplicated() {
        let courier = Courier::new();
        assert!(courier.mark_ready(9));
        assert!(courier.mark_ready(3));
        assert!(!courier.mark_ready(9));
        assert_eq!(courier.ready_clients(), vec![3, 9]);
    }
}
