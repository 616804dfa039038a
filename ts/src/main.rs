use clap::Parser;
use eyre::Result;

use taskstore::Store;
use taskstore::cli::{Cli, Command};

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let store = Store::open(&cli.store_path)?;

    match cli.command {
        Command::Collections => {
            for name in store.raw_collections()? {
                println!("{}", name);
            }
        }
        Command::List { collection } => {
            for id in store.raw_list_ids(&collection)? {
                println!("{}", id);
            }
        }
        Command::Get { collection, id } => match store.raw_get(&collection, &id)? {
            Some(json) => println!("{}", json),
            None => eprintln!("not found: {}/{}", collection, id),
        },
        Command::Sync => {
            store.sync()?;
            println!("synced");
        }
    }

    Ok(())
}
