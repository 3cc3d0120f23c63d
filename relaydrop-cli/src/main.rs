mod command;
mod event;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::command::{ReceiveArgs, RelayArgs, SendArgs, run_receive, run_relay, run_send};

/// relaydrop: hand a file to someone through a relay, using a short
/// shared secret instead of an address.
///
/// One side runs `send`, which prints the secret. The other side runs
/// `receive` with that secret. The relay in between pairs the two and
/// streams the bytes across.
#[derive(Parser, Debug)]
#[command(name = "relaydrop", version, about)]
struct Args {
    /// Log protocol steps (debug level) unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a relay that pairs senders and receivers.
    Relay(RelayArgs),
    /// Send a file; prints the secret the receiver needs.
    Send(SendArgs),
    /// Receive the file announced under a secret.
    Receive(ReceiveArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version are not errors.
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    // Tracing goes to stderr: stdout carries nothing but the sender's
    // secret.
    let default_filter = if args.verbose {
        "relaydrop=debug,warn"
    } else {
        "relaydrop=info,warn"
    };
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let result = match args.command {
        Command::Relay(args) => run_relay(args).await,
        Command::Send(args) => run_send(args).await,
        Command::Receive(args) => run_receive(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("relaydrop: {e:#}");
            ExitCode::FAILURE
        }
    }
}
