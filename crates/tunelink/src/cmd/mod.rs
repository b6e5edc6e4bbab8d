use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use tunelink_client::{ClientConfig, Connection};
use tunelink_transport::default_socket_path;
use tunelink_value::ReplyPolicy;

use crate::exit::{client_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod clients;
pub mod listen;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a tunelink daemon until interrupted.
    Serve(ServeArgs),
    /// List connected and ready clients.
    Clients(ClientsArgs),
    /// Send one courier message and print the reply.
    Send(SendArgs),
    /// Print courier messages addressed to this client.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Clients(args) => clients::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind. Default: per-user path in the temp dir.
    #[arg(env = "TUNELINK_SOCKET")]
    pub path: Option<PathBuf>,
    /// Socket permission bits, octal.
    #[arg(long, default_value = "600")]
    pub mode: String,
    /// Messages buffered per client before it is dropped.
    #[arg(long)]
    pub queue: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ClientsArgs {
    /// Socket path to connect to.
    #[arg(env = "TUNELINK_SOCKET")]
    pub path: Option<PathBuf>,
    /// Connection and reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PolicyArg {
    NoReply,
    SingleReply,
    MultiReply,
}

impl From<PolicyArg> for ReplyPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::NoReply => ReplyPolicy::NoReply,
            PolicyArg::SingleReply => ReplyPolicy::SingleReply,
            PolicyArg::MultiReply => ReplyPolicy::MultiReply,
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    #[arg(env = "TUNELINK_SOCKET")]
    pub path: Option<PathBuf>,
    /// Destination client id.
    #[arg(long)]
    pub to: u32,
    /// Reply policy of the message.
    #[arg(long, value_enum, default_value = "single-reply")]
    pub policy: PolicyArg,
    /// JSON payload.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// String payload.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
    /// Stop after N replies (multi-reply only).
    #[arg(long)]
    pub count: Option<usize>,
    /// Maximum time to wait for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to connect to.
    #[arg(env = "TUNELINK_SOCKET")]
    pub path: Option<PathBuf>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Announce readiness to other clients after subscribing.
    #[arg(long)]
    pub ready: bool,
    /// Answer messages that expect a reply with their own payload.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn socket_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(default_socket_path)
}

pub fn connect(path: Option<PathBuf>, timeout: Duration) -> CliResult<Connection> {
    let path = socket_path(path);
    let config = ClientConfig::new("tunelink-cli").with_connect_timeout(timeout);
    Connection::connect(&path, config).map_err(|err| client_error("connect failed", err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
