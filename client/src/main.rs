use clap::Parser;
use client::frontend::Frontend;
use client::network::{ClientConfig, ClientSession};
use log::info;
use shared::protocol::MovementEncoding;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Two-player game session client", long_about = None)]
struct Args {
    /// Server IP address
    server_ip: String,

    /// Server port
    port: u16,

    /// Send bare direction bytes instead of tagged movement frames
    #[arg(long)]
    test: bool,

    /// Graphical front end to run; stdin/stdout are used when absent
    #[arg(long)]
    frontend: Option<PathBuf>,
}

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

    let config = ClientConfig {
        server_addr: format!("{}:{}", args.server_ip, args.port),
        encoding: if args.test {
            MovementEncoding::Raw
        } else {
            MovementEncoding::Tagged
        },
    };

    let session = ClientSession::connect(&config).await?;

    match args.frontend {
        Some(program) => {
            let Frontend {
                mut child,
                moves,
                updates,
            } = Frontend::spawn(&program)?;

            tokio::select! {
                end = session.run(moves, updates) => {
                    end?;
                }
                status = child.wait() => {
                    info!("Front end exited with {}", status?);
                }
            }
        }
        None => {
            session.run(tokio::io::stdin(), tokio::io::stdout()).await?;
        }
    }

    Ok(())
}
