use std::sync::mpsc;

use tracing::debug;
use tunelink_value::{from_json, Envelope, ReplyPolicy, Value};

use crate::cmd::{connect, parse_duration, SendArgs};
use crate::exit::{
    client_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_envelope, print_value, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let policy = ReplyPolicy::from(args.policy);
    let conn = connect(args.path, timeout)?;

    let result = conn
        .send_message(args.to, policy, payload)
        .map_err(|err| client_error("send failed", err))?;
    debug!(to = args.to, %policy, cookie = result.cookie(), "message sent");

    if policy != ReplyPolicy::MultiReply {
        let value = result
            .wait_ok(timeout)
            .map_err(|err| client_error("send failed", err))?;
        print_reply(&value, format);
        return Ok(SUCCESS);
    }

    let (tx, rx) = mpsc::channel();
    result.notifier_set_c2c(move |value| tx.send(value.clone()).is_ok());

    let mut printed = 0usize;
    loop {
        let value = match rx.recv_timeout(timeout) {
            Ok(value) => value,
            Err(_) if printed > 0 => break,
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {timeout:?}"),
                ))
            }
        };
        if let Ok(message) = value.as_error() {
            return Err(CliError::new(FAILURE, format!("send failed: {message}")));
        }
        print_reply(&value, format);
        printed += 1;
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }
    result.disconnect();
    Ok(SUCCESS)
}

fn print_reply(value: &Value, format: OutputFormat) {
    match Envelope::from_value(value) {
        Ok(envelope) => print_envelope(&envelope, format),
        Err(_) => print_value(value, format),
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Value> {
    if let Some(json) = &args.json {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return from_json(&parsed)
            .map_err(|err| CliError::new(DATA_INVALID, format!("--json not representable: {err}")));
    }
    if let Some(data) = &args.data {
        return Ok(Value::from(data.as_str()));
    }
    Ok(Value::none())
}
