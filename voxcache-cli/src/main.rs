//! voxcache CLI: cache keys for image arguments, image inspection and
//! convergence traces.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use voxcache_core::{DtypeRequest, HashAlgorithm};

/// voxcache: content-addressable cache keys for spatial images
#[derive(Parser, Debug)]
#[command(name = "voxcache", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (for `.voxcache/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the cache key of a call taking the given images as positional arguments
    Hash {
        /// Image files (.nii or .nii.gz)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Hash algorithm: blake3 or sha256
        #[arg(long)]
        algorithm: Option<HashAlgorithm>,

        /// Make the storage kind (file region vs in-memory) part of the hash
        #[arg(long)]
        no_coerce_mmap: bool,

        /// Hash images by full content instead of (filename, mtime)
        #[arg(long)]
        content: bool,

        /// Function identity used in the key
        #[arg(long, default_value = "voxcache.hash")]
        function: String,
    },
    /// Show shape, dtype and affine of an image
    Inspect {
        path: PathBuf,

        /// Target dtype: keep, auto, or a type name such as float32
        #[arg(long)]
        dtype: Option<DtypeRequest>,
    },
    /// Print a saved convergence trace as a table
    Trace { file: PathBuf },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "voxcache", "voxcache")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "voxcache.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut stdout = std::io::stdout().lock();
    commands::handle_command(cli.command, &workspace, &mut stdout)
}
