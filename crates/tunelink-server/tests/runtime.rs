#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tunelink_server::{RunningServer, Runtime, ServerConfig};
use tunelink_value::{Envelope, List, ReplyPolicy, Value};
use tunelink_wire::ids::{command, courier, main, object, signal, signal_cmd, PROTOCOL_VERSION};
use tunelink_wire::{Message, MessageCodec};

fn make_sock_path(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/tlsrv-{}-{}-{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("server.sock")
}

fn start(tag: &str) -> (RunningServer, PathBuf) {
    let path = make_sock_path(tag);
    let runtime = Runtime::new(ServerConfig::new(&path));
    let server = runtime.start().expect("server should start");
    (server, path)
}

async fn stop(server: RunningServer, path: PathBuf) {
    server.shutdown().await.expect("server should stop cleanly");
    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

fn args(values: impl IntoIterator<Item = Value>) -> Value {
    Value::list(List::from_values(values))
}

/// Raw protocol client speaking frames directly.
struct TestClient {
    framed: Framed<UnixStream, MessageCodec>,
    next_cookie: u32,
}

impl TestClient {
    async fn connect(path: &PathBuf) -> Self {
        let stream = UnixStream::connect(path)
            .await
            .expect("client should connect");
        Self {
            framed: Framed::new(stream, MessageCodec::default()),
            next_cookie: 1,
        }
    }

    async fn send(&mut self, object: u32, cmd: u32, payload: Value) -> u32 {
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        self.framed
            .send(Message::new(object, cmd, cookie, payload))
            .await
            .expect("send should succeed");
        cookie
    }

    async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("message should arrive in time")
            .expect("connection should stay open")
            .expect("frame should decode")
    }

    /// Send a request and return the next message, which must answer it.
    async fn call(&mut self, object: u32, cmd: u32, payload: Value) -> Message {
        let cookie = self.send(object, cmd, payload).await;
        let reply = self.recv().await;
        assert_eq!(reply.cookie, cookie, "unexpected message {reply:?}");
        reply
    }

    async fn hello(&mut self, name: &str) -> u32 {
        let reply = self
            .call(
                object::MAIN,
                main::HELLO,
                args([Value::int(PROTOCOL_VERSION), Value::from(name)]),
            )
            .await;
        assert_eq!(reply.command, command::REPLY);
        u32::try_from(reply.payload.as_int().expect("hello returns an int"))
            .expect("client id fits u32")
    }

    /// Everything sent before this call has been processed once it returns.
    async fn sync(&mut self) {
        let reply = self
            .call(object::COURIER, courier::GET_CONNECTED_CLIENTS, args([]))
            .await;
        assert_eq!(reply.command, command::REPLY);
    }

    async fn register(&mut self, cmd: u32, signal_id: u32) -> u32 {
        self.send(object::SIGNAL, cmd, args([Value::from(signal_id)]))
            .await
    }

    async fn send_message(&mut self, dest: u32, policy: ReplyPolicy, payload: Value) -> u32 {
        self.send(
            object::COURIER,
            courier::SEND_MESSAGE,
            args([Value::from(dest), Value::int(policy.as_int()), payload]),
        )
        .await
    }

    async fn reply(&mut self, msgid: u32, policy: ReplyPolicy, payload: Value) -> Message {
        self.call(
            object::COURIER,
            courier::REPLY,
            args([Value::from(msgid), Value::int(policy.as_int()), payload]),
        )
        .await
    }
}

fn error_text(message: &Message) -> &str {
    assert_eq!(message.command, command::ERROR, "expected an error: {message:?}");
    message.payload.as_error().expect("payload should be an Error")
}

#[tokio::test]
async fn hello_assigns_ids_and_checks_version() {
    let (server, path) = start("hello");
    let mut a = TestClient::connect(&path).await;
    let mut b = TestClient::connect(&path).await;

    let id_a = a.hello("alpha").await;
    let id_b = b.hello("beta").await;
    assert_ne!(id_a, id_b);
    assert_eq!(
        server.runtime().peer(id_a).and_then(|p| p.name()).as_deref(),
        Some("alpha")
    );

    let reply = a
        .call(
            object::MAIN,
            main::HELLO,
            args([Value::int(PROTOCOL_VERSION + 1), Value::from("alpha")]),
        )
        .await;
    assert!(error_text(&reply).contains("protocol version mismatch"));

    stop(server, path).await;
}

#[tokio::test]
async fn signal_fires_once_broadcast_repeats() {
    let (server, path) = start("signals");
    let mut client = TestClient::connect(&path).await;
    client.hello("listener").await;

    let sig_cookie = client.register(signal_cmd::SIGNAL, signal::USER_START).await;
    let bc_cookie = client
        .register(signal_cmd::BROADCAST, signal::USER_START + 1)
        .await;
    client.sync().await;

    let runtime = server.runtime();
    assert_eq!(runtime.emit_signal(signal::USER_START, &Value::int(10)), 1);
    assert_eq!(runtime.emit_signal(signal::USER_START, &Value::int(20)), 0);
    assert_eq!(runtime.emit_broadcast(signal::USER_START + 1, &Value::int(10)), 1);
    assert_eq!(runtime.emit_broadcast(signal::USER_START + 1, &Value::int(20)), 1);

    let first = client.recv().await;
    assert_eq!(
        first,
        Message::new(object::SIGNAL, signal_cmd::SIGNAL, sig_cookie, Value::int(10))
    );
    for expected in [10, 20] {
        let delivery = client.recv().await;
        assert_eq!(
            delivery,
            Message::new(
                object::SIGNAL,
                signal_cmd::BROADCAST,
                bc_cookie,
                Value::int(expected)
            )
        );
    }

    stop(server, path).await;
}

#[tokio::test]
async fn unregister_stops_deliveries() {
    let (server, path) = start("unregister");
    let mut client = TestClient::connect(&path).await;

    client.register(signal_cmd::BROADCAST, 70).await;
    let reply = client
        .call(object::SIGNAL, signal_cmd::UNREGISTER, args([Value::int(70)]))
        .await;
    assert_eq!(reply.command, command::REPLY);
    assert!(reply.payload.is_none());
    assert_eq!(server.runtime().emit_broadcast(70, &Value::int(1)), 0);

    stop(server, path).await;
}

#[tokio::test]
async fn unknown_command_replies_error_and_keeps_connection() {
    let (server, path) = start("unknown");
    let mut client = TestClient::connect(&path).await;

    let reply = client.call(9, 40, Value::none()).await;
    assert_eq!(error_text(&reply), "unknown object 9");
    let reply = client.call(object::MAIN, 99, Value::none()).await;
    assert_eq!(error_text(&reply), "unknown command 99 on object 0");
    let reply = client.call(object::MAIN, main::HELLO, Value::int(1)).await;
    assert_eq!(error_text(&reply), "arguments must be a list");

    assert!(client.hello("still-here").await > 0);
    stop(server, path).await;
}

#[tokio::test]
async fn custom_command_and_deferred_reply() {
    let (server, path) = start("custom");
    let runtime = server.runtime();
    runtime.register_command(100, 32, |_ctx, args| {
        let n = args.as_int()?;
        Ok(tunelink_server::Reply::Value(Value::int(n * 2)))
    });
    runtime.register_command(100, 33, |ctx, _args| {
        ctx.runtime
            .send_to(
                ctx.client_id(),
                Message::reply(ctx.object, ctx.cookie, Value::from("later")),
            )
            .map_err(tunelink_server::CommandError::from)?;
        Ok(tunelink_server::Reply::Deferred)
    });

    let mut client = TestClient::connect(&path).await;
    let reply = client.call(100, 32, Value::int(21)).await;
    assert_eq!(reply.payload, Value::int(42));
    let reply = client.call(100, 33, Value::none()).await;
    assert_eq!(reply.payload, Value::from("later"));
    let reply = client.call(100, 32, Value::from("x")).await;
    assert_eq!(reply.command, command::ERROR);

    stop(server, path).await;
}

#[tokio::test]
async fn oversized_reply_becomes_error_and_keeps_connection() {
    let path = make_sock_path("oversized");
    let runtime = Runtime::new(ServerConfig::new(&path).with_max_payload_size(64));
    let server = runtime.start().expect("server should start");
    runtime.register_command(100, 32, |_ctx, args| {
        let len = usize::try_from(args.as_int()?).unwrap_or(0);
        Ok(tunelink_server::Reply::Value(Value::binary(vec![7u8; len])))
    });

    let mut client = TestClient::connect(&path).await;
    let reply = client.call(100, 32, Value::int(1024)).await;
    assert!(
        error_text(&reply).starts_with("payload too large"),
        "unexpected error {reply:?}"
    );

    let reply = client.call(100, 32, Value::int(4)).await;
    assert_eq!(reply.payload, Value::binary(vec![7u8; 4]));

    stop(server, path).await;
}

#[tokio::test]
async fn no_reply_message_is_acknowledged_exactly_once() {
    let (server, path) = start("noreply");
    let mut a = TestClient::connect(&path).await;
    let mut b = TestClient::connect(&path).await;
    let id_a = a.hello("a").await;
    let id_b = b.hello("b").await;

    let inbox = b
        .register(signal_cmd::BROADCAST, signal::COURIER_MESSAGE)
        .await;
    b.sync().await;

    let cookie = a
        .send_message(id_b, ReplyPolicy::NoReply, Value::from("hi"))
        .await;
    let ack = a.recv().await;
    assert_eq!(ack, Message::reply(object::COURIER, cookie, Value::none()));
    a.sync().await;

    let delivery = b.recv().await;
    assert_eq!(delivery.cookie, inbox);
    assert_eq!(delivery.command, signal_cmd::BROADCAST);
    let envelope = Envelope::from_value(&delivery.payload).expect("envelope should parse");
    assert_eq!(envelope, Envelope::new(id_a, id_b, 0, Value::from("hi")));
    assert_eq!(server.runtime().courier().pending_count(), 0);

    stop(server, path).await;
}

#[tokio::test]
async fn message_to_unknown_client_fails() {
    let (server, path) = start("unrouted");
    let mut a = TestClient::connect(&path).await;
    a.hello("a").await;

    let cookie = a
        .send_message(9999, ReplyPolicy::SingleReply, Value::from("lost"))
        .await;
    let reply = a.recv().await;
    assert_eq!(reply.cookie, cookie);
    assert_eq!(error_text(&reply), "peer 9999 not found");
    assert_eq!(server.runtime().courier().pending_count(), 0);

    stop(server, path).await;
}

#[tokio::test]
async fn single_reply_exchange() {
    let (server, path) = start("single");
    let mut a = TestClient::connect(&path).await;
    let mut b = TestClient::connect(&path).await;
    let mut c = TestClient::connect(&path).await;
    let id_a = a.hello("a").await;
    let id_b = b.hello("b").await;
    c.hello("c").await;

    b.register(signal_cmd::BROADCAST, signal::COURIER_MESSAGE)
        .await;
    b.sync().await;

    let cookie = a
        .send_message(id_b, ReplyPolicy::SingleReply, Value::from("ping"))
        .await;
    let envelope = Envelope::from_value(&b.recv().await.payload).expect("envelope should parse");
    assert_eq!(envelope.sender, id_a);
    assert!(envelope.expects_reply());
    let msgid = envelope.id;

    let mismatch = c.reply(msgid, ReplyPolicy::NoReply, Value::from("me?")).await;
    assert_eq!(error_text(&mismatch), "sender mismatch in reply");

    let ack = b.reply(msgid, ReplyPolicy::NoReply, Value::from("pong")).await;
    assert_eq!(ack.command, command::REPLY);
    assert!(ack.payload.is_none());

    let answer = a.recv().await;
    assert_eq!(answer.cookie, cookie);
    assert_eq!(answer.command, command::REPLY);
    let envelope = Envelope::from_value(&answer.payload).expect("envelope should parse");
    assert_eq!(envelope, Envelope::new(id_b, id_a, 0, Value::from("pong")));

    let again = b.reply(msgid, ReplyPolicy::NoReply, Value::from("pong")).await;
    assert_eq!(error_text(&again), "pending message not found");

    stop(server, path).await;
}

#[tokio::test]
async fn multi_reply_keeps_exchange_open() {
    let (server, path) = start("multi");
    let mut a = TestClient::connect(&path).await;
    let mut b = TestClient::connect(&path).await;
    a.hello("a").await;
    let id_b = b.hello("b").await;

    b.register(signal_cmd::BROADCAST, signal::COURIER_MESSAGE)
        .await;
    b.sync().await;

    let cookie = a
        .send_message(id_b, ReplyPolicy::MultiReply, Value::from("stream"))
        .await;
    let msgid = Envelope::from_value(&b.recv().await.payload)
        .expect("envelope should parse")
        .id;

    for n in 1..=3 {
        b.reply(msgid, ReplyPolicy::NoReply, Value::int(n)).await;
        let answer = a.recv().await;
        assert_eq!(answer.cookie, cookie);
        let envelope = Envelope::from_value(&answer.payload).expect("envelope should parse");
        assert_eq!(envelope.payload, Value::int(n));
    }
    assert_eq!(server.runtime().courier().pending_count(), 1);

    stop(server, path).await;
}

#[tokio::test]
async fn departed_destination_fails_sender_once() {
    let (server, path) = start("departed");
    let mut a = TestClient::connect(&path).await;
    let mut b = TestClient::connect(&path).await;
    a.hello("a").await;
    let id_b = b.hello("b").await;

    b.register(signal_cmd::BROADCAST, signal::COURIER_MESSAGE)
        .await;
    b.sync().await;

    let cookie = a
        .send_message(id_b, ReplyPolicy::SingleReply, Value::from("anyone?"))
        .await;
    b.recv().await;
    drop(b);

    let failure = a.recv().await;
    assert_eq!(failure.cookie, cookie);
    assert_eq!(error_text(&failure), "destination client disconnected");
    a.sync().await;
    assert_eq!(server.runtime().courier().pending_count(), 0);

    stop(server, path).await;
}

#[tokio::test]
async fn ready_and_connected_clients() {
    let (server, path) = start("ready");
    let mut a = TestClient::connect(&path).await;
    let mut b = TestClient::connect(&path).await;
    let id_a = a.hello("a").await;
    let id_b = b.hello("b").await;

    let ready_cookie = a.register(signal_cmd::BROADCAST, signal::COURIER_READY).await;
    let gone_cookie = a
        .register(signal_cmd::BROADCAST, signal::CLIENT_DISCONNECTED)
        .await;
    a.sync().await;

    let ack = b.call(object::COURIER, courier::READY, args([])).await;
    assert!(ack.payload.is_none());
    let announce = a.recv().await;
    assert_eq!(announce.cookie, ready_cookie);
    assert_eq!(announce.payload, Value::from(id_b));

    let ready = a
        .call(object::COURIER, courier::GET_READY_CLIENTS, args([]))
        .await;
    assert_eq!(ready.payload, Value::list(List::from_ints([i64::from(id_b)])));
    let connected = a
        .call(object::COURIER, courier::GET_CONNECTED_CLIENTS, args([]))
        .await;
    let mut expected = [i64::from(id_a), i64::from(id_b)];
    expected.sort_unstable();
    assert_eq!(connected.payload, Value::list(List::from_ints(expected)));

    drop(b);
    let gone = a.recv().await;
    assert_eq!(gone.cookie, gone_cookie);
    assert_eq!(gone.payload, Value::from(id_b));
    let ready = a
        .call(object::COURIER, courier::GET_READY_CLIENTS, args([]))
        .await;
    assert_eq!(ready.payload, Value::list(List::from_ints([])));

    stop(server, path).await;
}

#[tokio::test]
async fn shutdown_closes_sessions_and_removes_socket() {
    let (server, path) = start("shutdown");
    let mut client = TestClient::connect(&path).await;
    client.hello("a").await;
    assert_eq!(server.runtime().client_count(), 1);

    let runtime = server.runtime().clone();
    server.shutdown().await.expect("server should stop cleanly");
    assert!(runtime.is_shut_down());
    assert_eq!(runtime.client_count(), 0);
    assert!(!path.exists());

    let next = tokio::time::timeout(Duration::from_secs(5), client.framed.next())
        .await
        .expect("close should be observed");
    assert!(next.is_none() || matches!(next, Some(Err(_))));
    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}
