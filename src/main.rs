use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use storeguard::config::{Config, StorageBackend};
use storeguard::logging::{self, LogTarget};
use storeguard::{
  CacheGuard, Collection, HttpSource, MemoryStorage, RecordStorage, RecordStore, ResourceStore,
  Source, SqliteStorage,
};

#[derive(Parser, Debug)]
#[command(name = "storeguard")]
#[command(about = "Cached, deduplicated fetching of record collections")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./storeguard.yaml or $XDG_CONFIG_HOME/storeguard/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch every record of one or more types through the cache
  Fetch {
    /// Resource types to fetch (repeat a type to see requests share one fetch)
    #[arg(required = true)]
    types: Vec<String>,

    /// Remote base URL (overrides remote.url)
    #[arg(long)]
    url: Option<String>,

    /// Freshness window for these requests (overrides cache.cache_seconds)
    #[arg(long)]
    cache_seconds: Option<u64>,

    /// Number of request rounds
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Seconds to wait between rounds
    #[arg(long, default_value_t = 0)]
    interval: u64,
  },
  /// Print the locally held records of a type
  Peek { type_key: String },
  /// Remove the locally held records of a type
  Clear { type_key: String },
}

/// Source used by commands that never touch the network.
struct Offline;

impl Source for Offline {
  fn fetch(&self, type_name: &str) -> BoxFuture<'static, Result<Collection>> {
    let err = eyre!("Cannot fetch {} without a remote source", type_name);
    futures::future::ready(Err(err)).boxed()
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let target = if args.log_stderr {
    LogTarget::Stderr
  } else {
    LogTarget::File
  };
  let _log_guard = logging::init(target)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  match config.storage.backend {
    StorageBackend::Memory => run(MemoryStorage::new(), &config, args.command).await,
    StorageBackend::Sqlite => {
      let path = match &config.storage.path {
        Some(path) => path.clone(),
        None => SqliteStorage::default_path()?,
      };
      run(SqliteStorage::open(&path)?, &config, args.command).await
    }
  }
}

async fn run<R: RecordStorage>(storage: R, config: &Config, command: Command) -> Result<()> {
  match command {
    Command::Fetch {
      types,
      url,
      cache_seconds,
      repeat,
      interval,
    } => {
      let url = match url {
        Some(url) => url,
        None => config.remote_url()?.to_string(),
      };
      let source = HttpSource::new(&url, config.remote.timeout(), Config::get_api_token())?;
      let store = RecordStore::new(storage, source).with_aliases(&config.types);
      let guard = CacheGuard::new(store).with_cache_seconds(config.cache.cache_seconds);

      for round in 0..repeat.max(1) {
        if round > 0 {
          tokio::time::sleep(Duration::from_secs(interval)).await;
        }
        fetch_round(&guard, &types, cache_seconds).await?;
      }
      Ok(())
    }
    Command::Peek { type_key } => {
      let store = RecordStore::new(storage, Offline).with_aliases(&config.types);
      let guard = CacheGuard::new(store);
      print_records(&guard.peek_all(&type_key)?)
    }
    Command::Clear { type_key } => {
      let store = RecordStore::new(storage, Offline).with_aliases(&config.types);
      let guard = CacheGuard::new(store);
      guard.invalidate(&type_key)?;
      info!(type_key = %type_key, "cleared local records");
      println!("{}: cleared", type_key);
      Ok(())
    }
  }
}

/// Issue every request first so repeated types join one fetch, then await them.
async fn fetch_round<R: RecordStorage>(
  guard: &CacheGuard<RecordStore<R, HttpSource>>,
  types: &[String],
  cache_seconds: Option<u64>,
) -> Result<()> {
  let requests = types
    .iter()
    .map(|type_key| -> Result<_> { Ok((type_key, guard.request_all(type_key, cache_seconds)?)) })
    .collect::<Result<Vec<_>>>()?;

  for (type_key, fetch) in requests {
    let origin = if fetch.is_cached() { "cached" } else { "fetched" };
    let records = fetch.await?;
    info!(type_key = %type_key, count = records.len(), origin, "request served");
    println!("{}: {} records ({})", type_key, records.len(), origin);
    print_records(&records)?;
  }

  Ok(())
}

fn print_records(records: &Collection) -> Result<()> {
  for record in records {
    let line = serde_json::to_string(&record.data)
      .map_err(|e| eyre!("Failed to serialize record {}: {}", record.id, e))?;
    println!("{}", line);
  }
  Ok(())
}
