use tracing::info;
use tunelink_server::{Runtime, ServerConfig};

use crate::cmd::{socket_path, ServeArgs};
use crate::exit::{server_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let mode = parse_mode(&args.mode)?;
    let mut config = ServerConfig::new(socket_path(args.path)).with_socket_mode(mode);
    if let Some(queue) = args.queue {
        config = config.with_outgoing_queue_capacity(queue);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("tokio runtime setup failed: {err}")))?;

    let runtime = Runtime::new(config);
    install_ctrlc_handler(runtime.clone())?;

    rt.block_on(async {
        let listener = runtime.bind().map_err(|err| server_error("bind failed", err))?;
        info!(path = %listener.path().display(), "serving");
        runtime
            .serve(listener)
            .await
            .map_err(|err| server_error("serve failed", err))
    })?;

    info!("stopped");
    Ok(SUCCESS)
}

fn parse_mode(input: &str) -> CliResult<u32> {
    u32::from_str_radix(input.trim_start_matches("0o"), 8)
        .ok()
        .filter(|mode| *mode <= 0o777)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid socket mode: {input}")))
}

fn install_ctrlc_handler(runtime: Runtime) -> CliResult<()> {
    ctrlc::set_handler(move || {
        runtime.shutdown();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
