//! aniflix CLI application.

use aniflix::api::{catalog, Season};
use aniflix::{JikanClient, WatchStore};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::{Config, DataPaths, Database};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Top-ranked anime
    Top {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    /// Anime airing in a season (defaults to the current one)
    Seasonal {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        season: Option<Season>,
    },
    /// Full details for one anime
    Anime { id: u32 },
    /// Episode list for one anime
    Episodes {
        id: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Free-text search, best scored first
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    /// Anime in a genre (id or name)
    Genre {
        genre: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// List the browsable genres
    Genres,
    /// One random anime
    Random,
    /// Manage my list
    List {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Manage the continue-watching list
    Continue {
        #[command(subcommand)]
        action: ContinueAction,
    },
    /// Recently viewed anime
    Recent,
    /// Search history
    History {
        /// Clear the history instead of showing it
        #[arg(long)]
        clear: bool,
    },
    /// Remove all locally stored lists
    ClearData,
}

#[derive(Subcommand, Debug)]
enum ListAction {
    Show,
    Add { id: u32 },
    Remove { id: u32 },
}

#[derive(Subcommand, Debug)]
enum ContinueAction {
    Show,
    Add {
        id: u32,
        #[arg(long, default_value_t = 1)]
        episode: u32,
        #[arg(long, default_value_t = 0)]
        progress: u8,
    },
    Remove { id: u32 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let mut log_config = shared::LogConfig::from_settings(&config.logging, &config.log_dir(), "aniflix");
    if args.verbose {
        log_config.default_level = tracing::Level::DEBUG;
    }
    shared::logging::init(log_config)?;

    info!(config_file = %args.config.display(), "aniflix starting");

    DataPaths::new(config.data_dir())
        .create_dirs()
        .context("Failed to create data directories")?;

    let database = Database::open(config.database_path()).context("Failed to open database")?;
    let store = WatchStore::new(database, config.store.clone());

    let client = JikanClient::from_config(&config.api).context("Failed to create Jikan client")?;

    run(args.command, &client, &store).await
}

async fn run(command: Command, client: &JikanClient, store: &WatchStore) -> Result<()> {
    match command {
        Command::Top { page, limit } => print_json(&client.get_top_anime(page, limit).await?),
        Command::Seasonal { year, season } => {
            print_json(&client.get_seasonal_anime(year, season).await?)
        }
        Command::Anime { id } => {
            let response = client.get_anime_by_id(id).await?;
            store.add_to_recently_viewed(&response.data)?;
            print_json(&response)
        }
        Command::Episodes { id, page } => print_json(&client.get_anime_episodes(id, page).await?),
        Command::Search { query, page, limit } => {
            store.add_to_search_history(&query)?;
            print_json(&client.search_anime(&query, page, limit).await?)
        }
        Command::Genre { genre, page } => {
            let Some(genre_id) = catalog::resolve_genre(&genre) else {
                bail!("Unknown genre: {} (see `aniflix genres`)", genre);
            };
            print_json(&client.get_anime_by_genre(genre_id, page).await?)
        }
        Command::Genres => {
            for (id, name) in catalog::GENRES {
                println!("{:>3}  {}", id, name);
            }
            Ok(())
        }
        Command::Random => print_json(&client.get_random_anime().await?),
        Command::List { action } => match action {
            ListAction::Show => print_json(&store.get_my_list()?),
            ListAction::Add { id } => {
                let anime = client.get_anime_by_id(id).await?.data;
                if store.add_to_my_list(&anime)? {
                    info!(mal_id = id, title = %anime.display_title(), "Added to my list");
                } else {
                    info!(mal_id = id, "Already in my list");
                }
                Ok(())
            }
            ListAction::Remove { id } => {
                if !store.remove_from_my_list(id)? {
                    info!(mal_id = id, "Not in my list");
                }
                Ok(())
            }
        },
        Command::Continue { action } => match action {
            ContinueAction::Show => print_json(&store.get_continue_watching()?),
            ContinueAction::Add { id, episode, progress } => {
                let anime = client.get_anime_by_id(id).await?.data;
                store.add_to_continue_watching(&anime, episode, progress)?;
                info!(mal_id = id, episode = episode, progress = progress, "Updated continue watching");
                Ok(())
            }
            ContinueAction::Remove { id } => {
                if !store.remove_from_continue_watching(id)? {
                    info!(mal_id = id, "Not in continue watching");
                }
                Ok(())
            }
        },
        Command::Recent => print_json(&store.get_recently_viewed()?),
        Command::History { clear } => {
            if clear {
                store.clear_search_history()
            } else {
                print_json(&store.get_search_history()?)
            }
        }
        Command::ClearData => {
            store.clear_all()?;
            info!("Cleared all local data");
            Ok(())
        }
    }
}
