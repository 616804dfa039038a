//! Generic operational CLI for inspecting a taskstore database directly.
//!
//! This operates below the `Record` abstraction (it reads the `records`
//! table's raw JSON) since the `taskstore` crate itself has no concrete
//! record types to parse into - those live in `taskdaemon`/`contextstore`.
//! It exists for ops/debugging: listing collections, dumping a raw record,
//! or forcing a WAL checkpoint.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "taskstore", about = "Inspect a taskstore database")]
pub struct Cli {
    /// Path to the store directory
    #[arg(short, long, default_value = ".taskstore")]
    pub store_path: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List distinct collection names present in the store
    Collections,

    /// List record ids in a collection
    List {
        collection: String,
    },

    /// Dump a single record's raw JSON
    Get {
        collection: String,
        id: String,
    },

    /// Force a WAL checkpoint
    Sync,
}
