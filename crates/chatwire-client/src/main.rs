//! Chatwire client binary.
//!
//! # Usage
//!
//! ```bash
//! chatwire-client alice 127.0.0.1:7878 ./downloads
//! ```
//!
//! Type to chat; lines starting with `/` are commands (`/users`,
//! `/request <name>`, `/accept <name>`, `/refuse <name>`,
//! `/send <name> <path>`, `/quit`).

use std::{io::BufRead, path::PathBuf};

use chatwire_client::{ClientConfig, Command, CommandError, run_client};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatwire chat client
#[derive(Parser, Debug)]
#[command(name = "chatwire-client")]
#[command(about = "Chatwire chat protocol client")]
#[command(version)]
struct Args {
    /// Display name to log in under
    name: String,

    /// Server address to connect to
    #[arg(default_value = "127.0.0.1:7878")]
    server: String,

    /// Directory received files are written to
    #[arg(long, default_value = ".")]
    files_dir: PathBuf,

    /// Bind address for the direct listener (port 0 picks a free port)
    #[arg(long, default_value = "0.0.0.0:0")]
    direct_bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Logs go to stderr; stdout belongs to the chat.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let (commands_tx, commands_rx) = mpsc::channel::<Command>(16);

    // Blocking console reader on its own thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(CommandError::Empty) => continue,
                Err(e) => {
                    eprintln!("{e}");
                    continue;
                },
            };
            let quit = command == Command::Quit;
            if commands_tx.blocking_send(command).is_err() || quit {
                break;
            }
        }
    });

    let config = ClientConfig {
        name: args.name,
        server_addr: args.server,
        files_dir: args.files_dir,
        direct_bind: args.direct_bind,
    };

    run_client(config, commands_rx).await?;

    Ok(())
}
