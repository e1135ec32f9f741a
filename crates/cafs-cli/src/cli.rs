use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cafs",
    about = "cafs: content-addressed file store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML config file; only its [adder] queue sizes are used here
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
    /// Print the content key of a file or directory
    Hash(HashArgs),
    /// Stream files into a store, reporting each stored leaf
    Add(AddArgs),
    /// Store a file or directory and print it back as a tree
    Tree(TreeArgs),
}

#[derive(Args)]
pub struct HashArgs {
    pub path: PathBuf,
    /// Also list every record the store holds
    #[arg(long)]
    pub dump: bool,
}

#[derive(Args)]
pub struct AddArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Wrap all added paths in one root directory
    #[arg(short, long)]
    pub wrap: bool,
    #[arg(long)]
    pub pin: bool,
}

#[derive(Args)]
pub struct TreeArgs {
    pub path: PathBuf,
}
