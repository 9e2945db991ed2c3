use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML config file (defaults are built in).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data root holding index.json, assets.json, tissues.json and slides/.
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index the catalog, discover assets, then merge and download.
    Run,
    /// Crawl the catalog into index.json.
    Index(StageArgs),
    /// Walk the media categories into assets.json.
    Discover(StageArgs),
    /// Match, download and write tissues.json.
    Merge,
}

#[derive(Debug, Args)]
pub struct StageArgs {
    /// Crawl even when the existing output looks populated.
    #[arg(long)]
    pub force: bool,
}
