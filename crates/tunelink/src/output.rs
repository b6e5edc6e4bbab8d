use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tunelink_value::{to_json, Envelope, Value};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOutput {
    sender: u32,
    destination: u32,
    id: u32,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct ClientsOutput<'a> {
    connected: &'a [u32],
    ready: &'a [u32],
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EnvelopeOutput {
            sender: envelope.sender,
            destination: envelope.destination,
            id: envelope.id,
            payload: to_json(&envelope.payload),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SENDER", "DESTINATION", "ID", "PAYLOAD"])
                .add_row(vec![
                    envelope.sender.to_string(),
                    envelope.destination.to_string(),
                    envelope.id.to_string(),
                    envelope.payload.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "sender={} destination={} id={} payload={}",
                envelope.sender, envelope.destination, envelope.id, envelope.payload
            );
        }
        OutputFormat::Raw => print_raw(&envelope.payload),
    }
}

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&to_json(value)),
        OutputFormat::Table | OutputFormat::Pretty => println!("{value}"),
        OutputFormat::Raw => print_raw(value),
    }
}

pub fn print_clients(connected: &[u32], ready: &[u32], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ClientsOutput { connected, ready }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CLIENT", "READY"]);
            for id in connected {
                table.add_row(vec![id.to_string(), ready.contains(id).to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for id in connected {
                println!("client={id} ready={}", ready.contains(id));
            }
        }
        OutputFormat::Raw => {
            for id in connected {
                println!("{id}");
            }
        }
    }
}

/// Strings and binaries verbatim, anything else in display form.
pub fn print_raw(value: &Value) {
    let mut out = std::io::stdout();
    let _ = match (value.as_string_bytes(), value.as_binary()) {
        (Ok(bytes), _) | (_, Ok(bytes)) => out.write_all(bytes),
        _ => writeln!(out, "{value}"),
    };
    let _ = out.flush();
}
