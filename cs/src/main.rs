use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use contextstore::archival::{ArchivalMemory, ArchivalStore, SearchScope, SourceType};
use contextstore::cli::{Cli, Command};
use contextstore::config::Config;
use contextstore::embedding::HashEmbedder;
use contextstore::pattern::PatternStore;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let embedder = HashEmbedder::new();

    info!("contextstore starting");

    match cli.command {
        Command::Record {
            content,
            repo,
            task_id,
            global,
        } => {
            let store = ArchivalStore::new(taskstore::Store::open(&config.store_path)?);
            let embedding = embedder.embed(&content);
            let row = ArchivalMemory::new(content, embedding, SourceType::Observation, repo, task_id, global);
            let id = store.insert(row)?;
            println!("{} Archived as: {}", "✓".green(), id.cyan());
        }
        Command::Search {
            query,
            repo,
            task_id,
            include_global,
            threshold,
        } => {
            let store = ArchivalStore::new(taskstore::Store::open(&config.store_path)?);
            let scope = SearchScope {
                repo,
                task_id,
                include_global,
                source_types: None,
            };
            let hits = store.search(&query, &embedder, &scope, threshold.unwrap_or(config.similarity_threshold), 10)?;
            if hits.is_empty() {
                println!("No matches");
            }
            for hit in hits {
                println!("{} {:.3} {}", hit.id.yellow(), hit.similarity, hit.title);
            }
        }
        Command::PatternOutcome { id, success } => {
            let store = PatternStore::new(taskstore::Store::open(&config.store_path)?);
            match store.update_pattern_outcome(&id, success)? {
                Some(p) => println!("{} confidence now {:.3}", "✓".green(), p.confidence),
                None => println!("Pattern not found: {}", id),
            }
        }
        Command::PatternsEligible => {
            let store = PatternStore::new(taskstore::Store::open(&config.store_path)?);
            let eligible = store.eligible_for_promotion(config.min_pattern_confidence)?;
            if eligible.is_empty() {
                println!("No patterns eligible for promotion");
            }
            for p in eligible {
                println!("{} {:.3} {}", p.id.cyan(), p.confidence, p.description);
            }
        }
        Command::CleanupExpired => {
            let store = ArchivalStore::new(taskstore::Store::open(&config.store_path)?);
            let removed = store.cleanup_expired()?;
            println!("{} Removed {} expired rows", "✓".green(), removed);
        }
    }

    Ok(())
}
