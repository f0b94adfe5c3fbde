use clap::Parser;
use log::info;
use server::game::Maze;
use server::lobby::TimeoutPolicy;
use server::network::{Server, ServerConfig};
use server::shutdown::listen_for_signals;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Two-player game session server", long_about = None)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Map description loaded at the start of every match
    map_file: PathBuf,

    /// Single-shot mode: shut down after one match
    #[arg(long)]
    test: bool,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Seconds the first player waits for an opponent
    #[arg(long, default_value = "30")]
    registration_timeout: u64,

    /// Start a one-player match instead of evicting a lone player at timeout
    #[arg(long)]
    solo_on_timeout: bool,
}

/// Accepts the historical single-dash `-test` spelling.
fn normalized_args() -> Vec<OsString> {
    std::env::args_os()
        .map(|arg| if arg == "-test" { "--test".into() } else { arg })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse_from(normalized_args()) {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let map = std::fs::read_to_string(&args.map_file)
        .map_err(|e| format!("cannot read map {}: {}", args.map_file.display(), e))?;

    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        map,
        single_shot: args.test,
        registration_timeout: Duration::from_secs(args.registration_timeout),
        timeout_policy: if args.solo_on_timeout {
            TimeoutPolicy::PlaySolo
        } else {
            TimeoutPolicy::Evict
        },
    };

    if config.single_shot {
        info!("Test mode: the server stops after one match");
    }

    let server = Server::bind(config, Maze, listen_for_signals()).await?;
    server.run().await?;

    Ok(())
}
