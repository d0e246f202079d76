use citywatch_sync::{
  config::Config, logging, CacheKey, HttpRemote, ReadEvent, ReadStream, SyncRepository,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "citywatch-sync")]
#[command(about = "Inspect and drive the CityWatch local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/citywatch-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Act as this signed-in user
  #[arg(short, long)]
  viewer: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show every cached collection with its hash and age
  Stats,
  /// Run one cache-first read and print each event
  Sync {
    #[command(subcommand)]
    target: SyncTarget,
  },
  /// Compare server checksums against the cache and flag what changed
  Validate,
  /// Force the next read of a collection to refetch (`reports`, `comments_<id>`)
  Invalidate { key: String },
  /// Wipe the local cache
  Clear,
}

#[derive(Subcommand, Debug)]
enum SyncTarget {
  Reports,
  Comments { report_id: String },
  Profile { user_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let remote = Arc::new(HttpRemote::new(&config.remote)?);
  let repo = SyncRepository::open(&config, remote)?;
  if let Some(viewer) = &args.viewer {
    repo.sign_in(viewer).await;
  }

  let result = run(&repo, args.command).await;
  repo.close().await;
  result
}

async fn run(repo: &SyncRepository, command: Command) -> Result<()> {
  match command {
    Command::Stats => {
      let metadata = repo.cache().all_metadata().await;
      println!("cached reports: {}", repo.cache().report_count().await);
      if metadata.is_empty() {
        println!("cache is empty");
      }
      for meta in metadata {
        let written = chrono::DateTime::from_timestamp_millis(meta.last_updated)
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| "-".to_string());
        let hash = if meta.hash.is_empty() {
          "(invalidated)"
        } else {
          meta.hash.as_str()
        };
        println!(
          "{:<32} {:>6} items  {}  {}",
          meta.cache_key, meta.item_count, written, hash
        );
      }
    }
    Command::Sync { target } => match target {
      SyncTarget::Reports => print_events(repo.reports()).await,
      SyncTarget::Comments { report_id } => print_events(repo.comments(&report_id)).await,
      SyncTarget::Profile { user_id } => print_events(repo.user_profile(&user_id)).await,
    },
    Command::Validate => {
      let changed = repo.validate_on_navigation().await;
      if changed.is_empty() {
        println!("cache is current");
      }
      for key in changed {
        println!("invalidated {}", key);
      }
    }
    Command::Invalidate { key } => {
      let key = match CacheKey::parse(&key) {
        Some(CacheKey::Profile(_)) => return Err(eyre!("Profiles expire by TTL only")),
        Some(key) => key,
        None => return Err(eyre!("Unknown cache key: {}", key)),
      };
      repo.invalidate(&key).await;
      println!("invalidated {}", key);
    }
    Command::Clear => {
      repo.cache().clear_all().await;
      println!("cache cleared");
    }
  }
  Ok(())
}

async fn print_events<T: Debug>(mut stream: ReadStream<T>) {
  while let Some(event) = stream.next().await {
    match event {
      ReadEvent::CacheHit(items) => println!("cache hit: {} items", items.len()),
      ReadEvent::Fresh { items, source } => {
        println!("fresh ({:?}): {} items", source, items.len());
        for item in &items {
          println!("  {:?}", item);
        }
      }
      ReadEvent::Loading(loading) => println!("loading: {}", loading),
      ReadEvent::Failed(e) => println!("failed: {}", e),
    }
  }
}
