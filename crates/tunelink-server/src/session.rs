use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use tunelink_value::Value;
use tunelink_wire::ids::signal;
use tunelink_wire::{FrameError, Message, MessageCodec};

use crate::peer::PeerHandle;
use crate::runtime::Runtime;

/// Serve one accepted connection until it closes, fails, or is cancelled.
///
/// Inbound frames are dispatched in arrival order on this task; outbound
/// messages drain from the peer's queue on a separate writer task. A
/// transport or decode failure ends only this session.
pub(crate) async fn run(runtime: Runtime, stream: UnixStream, client_id: u32) {
    let codec = MessageCodec::new(runtime.config().max_payload_size);
    let (mut sink, mut frames) = Framed::new(stream, codec).split();
    let (tx, mut rx) = mpsc::channel(runtime.config().outgoing_queue_capacity);
    let cancel = runtime.shutdown_token().child_token();

    let peer = Arc::new(PeerHandle::new(client_id, tx, cancel.clone()));
    runtime.add_peer(Arc::clone(&peer));
    info!(client_id, "client connected");
    runtime.emit_broadcast(signal::CLIENT_CONNECTED, &Value::from(client_id));

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                next = rx.recv() => {
                    let Some(message) = next else { break };
                    let (object, cookie) = (message.object, message.cookie);
                    match sink.send(message).await {
                        Ok(()) => {}
                        // Nothing was written; answer the cookie instead.
                        Err(err @ (FrameError::PayloadTooLarge { .. } | FrameError::Codec(_))) => {
                            warn!(
                                client_id,
                                object,
                                cookie,
                                error = %err,
                                "outgoing message not encodable"
                            );
                            let failure = Message::error(object, cookie, err.to_string());
                            if let Err(err) = sink.send(failure).await {
                                debug!(client_id, error = %err, "write failed");
                                break;
                            }
                        }
                        Err(err) => {
                            debug!(client_id, error = %err, "write failed");
                            break;
                        }
                    }
                }
            }
        }
        writer_cancel.cancel();
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(client_id, "session cancelled");
                break;
            }
            next = frames.next() => match next {
                Some(Ok(message)) => runtime.dispatch(&peer, message),
                Some(Err(err)) => {
                    warn!(client_id, error = %err, "dropping connection");
                    break;
                }
                None => {
                    debug!(client_id, "connection closed by client");
                    break;
                }
            },
        }
    }

    cancel.cancel();
    if let Err(err) = writer.await {
        warn!(client_id, error = %err, "writer task failed");
    }
    runtime.disconnect(client_id);
}
