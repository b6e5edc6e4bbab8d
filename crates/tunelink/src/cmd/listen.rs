use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::{info, warn};
use tunelink_client::DEFAULT_CONNECT_TIMEOUT;
use tunelink_value::{Envelope, ReplyPolicy};

use crate::cmd::{connect, ListenArgs};
use crate::exit::{client_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_envelope, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let conn = connect(args.path, DEFAULT_CONNECT_TIMEOUT)?;

    let (tx, rx) = mpsc::channel();
    let inbox = conn
        .broadcast_c2c_messages()
        .map_err(|err| client_error("subscribe failed", err))?;
    inbox.notifier_set_c2c(move |value| tx.send(value.clone()).is_ok());

    if args.ready {
        conn.ready()
            .and_then(|result| result.wait_ok(DEFAULT_CONNECT_TIMEOUT))
            .map_err(|err| client_error("ready failed", err))?;
    }
    info!(client_id = conn.client_id(), "listening for messages");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let value = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(value) => value,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        let envelope = Envelope::from_value(&value)
            .map_err(|err| CliError::new(FAILURE, format!("unexpected delivery: {err}")))?;
        if envelope.sender == 0 && envelope.payload.is_error() {
            // Anonymous Error envelope: the connection failed.
            return Err(CliError::new(
                FAILURE,
                format!("connection lost: {}", envelope.payload),
            ));
        }

        print_envelope(&envelope, format);
        printed = printed.saturating_add(1);

        if args.echo && envelope.expects_reply() {
            let answered = conn
                .reply(envelope.id, ReplyPolicy::NoReply, envelope.payload.clone())
                .and_then(|result| result.wait_ok(DEFAULT_CONNECT_TIMEOUT));
            if let Err(err) = answered {
                warn!(msgid = envelope.id, error = %err, "echo reply failed");
            }
        }

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
