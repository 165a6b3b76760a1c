//! Kiln CLI: the command-line front-end of the asset pipeline.
//!
//! Provides `kiln build` to build declared assets, `kiln status` to show the
//! recorded fingerprints, and `kiln cache-server` to run a remote artifact
//! cache.

#![warn(missing_docs)]

mod build;
mod cache_server;
mod pipelines;
mod project;
mod status;

use std::process;

use clap::{Parser, Subcommand};
use kiln_common::Guid;
use tracing::Level;

/// Kiln: dependency-tracked asset builds.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln asset pipeline")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build assets and everything they depend on.
    Build(BuildArgs),
    /// Show the recorded fingerprint of assets.
    Status(StatusArgs),
    /// Run a remote cache server.
    CacheServer(CacheServerArgs),
}

/// Arguments for the `kiln build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Root assets to build. Builds every declared asset when omitted.
    pub guids: Vec<Guid>,

    /// Rebuild even when an up-to-date artifact is cached.
    #[arg(long)]
    pub force: bool,

    /// Worker threads (0 = one per CPU). Overrides `[build].threads`.
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

/// Arguments for the `kiln status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Assets to show. Shows every declared asset when omitted.
    pub guids: Vec<Guid>,
}

/// Arguments for the `kiln cache-server` subcommand.
#[derive(Parser, Debug)]
pub struct CacheServerArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:21813")]
    pub bind: String,

    /// Maximum bytes of artifacts kept in memory.
    #[arg(long, default_value_t = 512 * 1024 * 1024)]
    pub capacity: usize,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

impl GlobalArgs {
    /// Log level selected by `--quiet` / `--verbose`.
    pub fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(global.log_level())
        .with_target(global.verbose)
        .init();

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Status(ref args) => status::run(args, &global),
        Command::CacheServer(ref args) => cache_server::run(args),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
