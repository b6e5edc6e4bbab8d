use crate::cmd::{connect, parse_duration, ClientsArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_clients, OutputFormat};

pub fn run(args: ClientsArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let conn = connect(args.path, timeout)?;
    let own_id = conn.client_id();

    // Leave this short-lived connection out of the listing.
    let connected: Vec<u32> = conn
        .connected_clients(timeout)
        .map_err(|err| client_error("listing clients failed", err))?
        .into_iter()
        .filter(|id| *id != own_id)
        .collect();
    let ready = conn
        .ready_clients(timeout)
        .map_err(|err| client_error("listing ready clients failed", err))?;

    print_clients(&connected, &ready, format);
    Ok(SUCCESS)
}
