use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use rapunzel::backend::cache::DeviceCache;
use rapunzel::backend::feed::{FeedKind, FeedState, LoadMode};
use rapunzel::backend::fs::LocalFileSystem;
use rapunzel::backend::mangadex::MangaDex;
use rapunzel::backend::paths::StaticLibraryPaths;
use rapunzel::backend::provider::ContentProvider;
use rapunzel::backend::storage::JsonFileStore;
use rapunzel::{LoadReport, Settings, Store};

#[derive(Parser)]
#[command(name = "rapunzel", version, about = "Browse manga and keep covers and chapters cached")]
struct Cli {
    /// Where cached images live
    #[arg(long, env = "RAPUNZEL_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Where settings, library and feed snapshots are stored
    #[arg(long, env = "RAPUNZEL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Content repository to browse
    #[arg(long, env = "RAPUNZEL_REPOSITORY")]
    repository: Option<String>,

    /// Skip the randomized delay before each download
    #[arg(long)]
    no_jitter: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recently updated books
    Latest {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Most followed books
    Trending,
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Cache a chapter for offline reading (first chapter if none given)
    Read {
        book_id: String,
        chapter_id: Option<String>,
    },
    /// Feeds restored from the last run
    Show,
    /// Saved books, or save/unsave one
    Library {
        #[arg(long)]
        toggle: Option<String>,
    },
    /// Cache usage, optionally pruned or cleared
    Cache {
        /// Trim the cache down to this many megabytes
        #[arg(long)]
        prune_mb: Option<u64>,
        #[arg(long)]
        clear: bool,
    },
    /// Effective settings, optionally stored as the new defaults
    Config {
        #[arg(long)]
        save: bool,
    },
}

fn mode_for(page: u32) -> LoadMode {
    if page <= 1 {
        LoadMode::Clean
    } else {
        LoadMode::Append { page }
    }
}

fn print_feed(name: &str, feed: &FeedState) {
    println!("== {} (page {}, {} books)", name, feed.page, feed.rendered.len());
    for (i, book) in feed.books().enumerate() {
        println!(
            "{:>3}. {} | {} | {}",
            i + 1,
            book.title,
            book.status,
            feed.image_of(&book.id).unwrap_or("-")
        );
    }
}

fn print_report(report: &LoadReport) {
    if report.is_empty() {
        println!("No results.");
    } else {
        println!("{} fetched, {} images cached", report.fetched, report.cached);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let kv = Arc::new(match &cli.config_dir {
        Some(dir) => JsonFileStore::new(dir),
        None => JsonFileStore::in_config_dir(),
    });

    let mut settings = Settings::load(kv.as_ref()).await;
    if let Some(dir) = cli.cache_dir {
        settings.cache_root = Some(dir);
    }
    if let Some(repository) = cli.repository {
        settings.repository = repository;
    }
    if cli.no_jitter {
        settings = settings.without_jitter();
    }

    if let Command::Config { save } = cli.command {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        if save {
            settings.save(kv.as_ref()).await?;
            println!("Settings saved");
        }
        return Ok(());
    }

    let provider: Arc<dyn ContentProvider> = match settings.repository.as_str() {
        "mangadex" => Arc::new(MangaDex::new()?),
        other => return Err(format!("unsupported repository '{}'", other).into()),
    };

    let fs = Arc::new(LocalFileSystem::new()?);
    let cache = DeviceCache::new(fs, settings.cache_root(), &settings);
    cache.ensure_folders().await?;
    info!("Cache root: {}", cache.root().display());

    let store = Store::new(cache, provider, kv, settings);
    store.hydrate().await;

    match cli.command {
        Command::Latest { page } => {
            print_report(&store.load_latest(mode_for(page)).await);
            print_feed("Latest", &store.feed(FeedKind::Latest).await);
        }
        Command::Trending => {
            print_report(&store.load_trending().await);
            print_feed("Trending", &store.feed(FeedKind::Trending).await);
        }
        Command::Search { query, page } => {
            print_report(&store.search(&query, mode_for(page)).await);
            print_feed(&format!("Search: {}", query), &store.feed(FeedKind::Browse).await);
        }
        Command::Read {
            book_id,
            chapter_id,
        } => {
            let chapter_id = match chapter_id {
                Some(id) => id,
                None => {
                    let book = store.provider().get_book(&book_id).await?;
                    // Chapters come newest first
                    let first = book
                        .chapters
                        .last()
                        .ok_or_else(|| format!("'{}' has no readable chapters", book.base.title))?;
                    first.id.clone()
                }
            };
            let report = store.load_chapter(&book_id, &chapter_id).await;
            print_report(&report);
            for (i, page) in store.reader().await.pages.iter().enumerate() {
                println!("{:>3}. {}", i + 1, page.as_deref().unwrap_or("-"));
            }
        }
        Command::Show => {
            print_feed("Latest", &store.feed(FeedKind::Latest).await);
            print_feed("Trending", &store.feed(FeedKind::Trending).await);
            let query = store.search_text().await;
            if !query.is_empty() {
                println!("Last search: {}", query);
            }
        }
        Command::Library { toggle } => {
            if let Some(book_id) = toggle {
                let book = store.provider().get_book(&book_id).await?;
                let saved = store.toggle_saved(book.base).await;
                println!("{} {}", if saved { "Saved" } else { "Removed" }, book_id);
            }
            for entry in store.library().await {
                println!("{} | {} | saved {}", entry.id, entry.book.title, entry.saved_at);
            }
        }
        Command::Cache { prune_mb, clear } => {
            if clear {
                for kind in FeedKind::ALL {
                    store.clear_feed(kind).await?;
                }
                store.cache().clear_folder(StaticLibraryPaths::ReadBooks).await?;
            }
            if let Some(mb) = prune_mb {
                let removed = store.cache().prune(mb * 1024 * 1024).await?;
                println!("Pruned {} files", removed);
            }
            for folder in StaticLibraryPaths::ALL {
                let size = store.cache().folder_size(folder).await?;
                println!("{:<14} {:>10} bytes", folder.as_str(), size);
            }
        }
        Command::Config { .. } => {}
    }

    store.shutdown().await;
    Ok(())
}
