mod cli;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cyphy", about = "Cyber-physical experiment design compiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Semantically check a design and print the diagnostics.
    Check {
        /// Path to a serialized design view (JSON).
        design: PathBuf,
    },
    /// Check a design and, if it passes, write both compile artifacts.
    Compile {
        /// Path to a serialized design view (JSON).
        design: PathBuf,
        /// User the artifacts are scoped under.
        #[arg(long, default_value = "local")]
        user: String,
        /// Root directory for generated artifacts.
        #[arg(long, default_value = "out")]
        out: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { design } => cli::check::run(&design),
        Command::Compile { design, user, out } => cli::compile::run(&design, &user, &out),
    }
}
