use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trellis::commands::{graph, plan};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Task graph planning and hook-driven execution", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.toml (falls back to $TRELLIS_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a graph from a request file and print it as JSON
    Plan {
        /// Request file (.json, .yaml or .toml)
        request: PathBuf,

        /// Directory of task spec files
        #[arg(short, long)]
        tasks: PathBuf,
    },

    /// Validate a graph IR file (non-zero exit on errors)
    Validate {
        /// Graph IR JSON file
        graph: PathBuf,
    },

    /// Print the canonical content hash of a graph
    Hash {
        /// Graph IR JSON file
        graph: PathBuf,
    },

    /// Print layers, maximum parallelism and the critical path
    Schedule {
        /// Graph IR JSON file
        graph: PathBuf,
    },
}

fn main() -> Result<()> {
    trellis::logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { request, tasks } => plan::execute(&request, &tasks, cli.config.as_deref()),
        Commands::Validate { graph: path } => graph::validate(&path),
        Commands::Hash { graph: path } => graph::hash(&path),
        Commands::Schedule { graph: path } => graph::schedule(&path),
    }
}
