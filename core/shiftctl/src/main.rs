//! shiftctl: command-line client for zara-shiftd.
//!
//! Each subcommand sends one request over the daemon socket and prints the
//! response data as pretty JSON. Error responses exit with status 1.
//!
//! ## Subcommands
//!
//! - `health`: daemon status and job snapshot
//! - `machine add|status`, `user add`: registry and manual status changes
//! - `op start|end`, `produce`, `quality`: floor events
//! - `rollover`, `sweep`: manual triggers for the periodic jobs
//! - `shifts`, `archives`, `notifications`: read views

mod client;
mod commands;
mod logging;

use clap::Parser;

#[derive(Parser)]
#[command(name = "shiftctl")]
#[command(about = "ZARA shift tracking client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let (method, params) = match cli.command.to_call() {
        Ok(call) => call,
        Err(err) => {
            eprintln!("error: failed to encode request: {}", err);
            std::process::exit(2);
        }
    };

    match client::call(method, params) {
        Ok(data) => match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("error: failed to render response: {}", err);
                std::process::exit(1);
            }
        },
        Err(err) => {
            tracing::error!(error = %err, method = ?method, "shiftctl request failed");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}
