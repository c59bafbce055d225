//! rostore CLI - read-only storage sync for a git-backed config store.

use clap::Parser;
use rostore::cli::{Cli, Commands};
use rostore::commands::{self, Output};
use rostore::logging::init_tracing;
use rostore::server::{ServeOptions, start_server};
use std::path::PathBuf;
use std::process;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    init_tracing(cli.verbose, cli.log_json);

    if let Err(e) = run_command(cli.command, cli.config_path, human) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

fn run_command(command: Commands, config_path: PathBuf, human: bool) -> rostore::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            local_password,
        } => run_server(ServeOptions {
            config_path,
            host,
            port,
            local_password,
        }),
        Commands::Status => {
            let result = commands::status(&config_path)?;
            output(&result, human);
            Ok(())
        }
        Commands::Sync => {
            let result = commands::sync(&config_path)?;
            output(&result, human);
            Ok(())
        }
        Commands::HashSecret { secret } => {
            let result = commands::hash_secret(&secret)?;
            output(&result, human);
            Ok(())
        }
    }
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Run the management server until Ctrl+C.
fn run_server(options: ServeOptions) -> rostore::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| rostore::Error::Other(format!("Failed to create runtime: {}", e)))?
        .block_on(start_server(options))
}
