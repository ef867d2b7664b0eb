use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "opal",
    about = "opal: object graph persistence, from the command line",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Persistence settings (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build and show class schemas from a model file
    Schema(SchemaArgs),
    /// Map stored records into objects and show them
    Map(MapArgs),
    /// Map every record and commit the unit of work
    Check(CheckArgs),
    /// Show the effective persistence settings
    Config,
}

#[derive(Args)]
pub struct ModelArgs {
    /// JSON array of class definitions
    #[arg(short, long)]
    pub model: PathBuf,
}

#[derive(Args)]
pub struct SchemaArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// Classes to build; every class in the model when empty
    pub classes: Vec<String>,
}

#[derive(Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// JSON array of raw records
    #[arg(short, long)]
    pub records: PathBuf,
    /// Identifiers to map; every record when empty
    pub identifiers: Vec<String>,
    /// Identifiers the backend should treat as inaccessible
    #[arg(long)]
    pub hide: Vec<String>,
}

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    #[arg(short, long)]
    pub records: PathBuf,
}
