use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("tunelink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: tunelink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol: {}", tunelink_wire::ids::PROTOCOL_VERSION);
    println!(
        "target: {}",
        option_env!("TUNELINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: server={}, client={}, cli=true",
        cfg!(feature = "server"),
        cfg!(feature = "client")
    );

    Ok(SUCCESS)
}
