use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "strata", about = "Strata: local history for workspace files", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// History store directory
    #[arg(long, global = true, default_value = ".strata")]
    pub store: PathBuf,

    /// Store configuration (TOML); defaults to <store>/config.toml if present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record the current content of a file as a state of a resource
    Snapshot(SnapshotArgs),
    /// List the recorded states of a resource, newest first
    Log(LogArgs),
    /// Print the content of a recorded state
    Show(ShowArgs),
    /// List resources with history
    Files(FilesArgs),
    /// Copy or move history from one resource to another
    Copy(CopyArgs),
    /// Drop the history of a resource and everything below it
    Forget(ForgetArgs),
    /// Apply the retention policy to every entry
    Clean(CleanArgs),
    /// Delete blobs no state refers to
    Gc(GcArgs),
    /// Compare a directory with the history of a project
    Status(StatusArgs),
    /// Snapshot every new or modified file of a directory
    Sync(SyncArgs),
}

#[derive(Args)]
pub struct SnapshotArgs {
    /// Resource path, e.g. /project/src/main.rs
    pub path: String,
    /// File holding the content
    pub file: PathBuf,
}

#[derive(Args)]
pub struct LogArgs {
    pub path: String,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub path: String,
    /// Position in the log (0 = newest)
    #[arg(short, long, default_value = "0")]
    pub index: usize,
}

#[derive(Args)]
pub struct FilesArgs {
    #[arg(default_value = "/")]
    pub base: String,
    #[arg(long, default_value = "infinite")]
    pub depth: DepthArg,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum DepthArg {
    Zero,
    One,
    Infinite,
}

#[derive(Args)]
pub struct CopyArgs {
    pub source: String,
    pub destination: String,
    /// Remove the source history afterwards
    #[arg(long = "move")]
    pub is_move: bool,
}

#[derive(Args)]
pub struct ForgetArgs {
    pub path: String,
}

#[derive(Args)]
pub struct CleanArgs {}

#[derive(Args)]
pub struct GcArgs {}

#[derive(Args)]
pub struct StatusArgs {
    /// Project name
    pub project: String,
    /// Directory holding the project's files
    #[arg(default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct SyncArgs {
    pub project: String,
    #[arg(default_value = ".")]
    pub dir: PathBuf,
    /// Report what would be recorded without recording it
    #[arg(long)]
    pub dry_run: bool,
}
