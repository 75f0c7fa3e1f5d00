mod cache;
mod config;
mod control;
mod net;
mod request;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use url::Url;

use cache::{BucketStore, CacheManager, CachePolicy, Handled, Served, SqliteStore};
use control::ControlListener;
use net::HttpClient;
use request::Request;

#[derive(Parser, Debug)]
#[command(name = "cachet")]
#[command(about = "Offline-first asset cache with versioned buckets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachet/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database (default: platform data dir)
  #[arg(short, long)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Warm the current cache bucket from the asset manifest
  Install,
  /// Delete stale buckets and make the current one active
  Activate,
  /// Route one request through the cache and print the body
  Get {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Delete every cache bucket
  Clear,
  /// Print the current version and bucket name as JSON
  Version,
  /// Process control messages from stdin (one JSON object per line)
  Listen,
  /// List buckets and their entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  // Logs go to stderr so `get` can stream bodies on stdout
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cachet=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let policy = CachePolicy::from_config(&config)?;

  let store = match &args.store {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };
  let manager = CacheManager::new(store, policy);
  let client = HttpClient::new()?;

  match args.command {
    Command::Install => {
      let warmed = manager.init(|url| client.fetch_url(url)).await?;
      println!(
        "warmed {} entries into {}",
        warmed,
        manager.version_info().cache_name
      );
    }
    Command::Activate => {
      manager.promote()?;
      println!("active bucket: {}", manager.version_info().cache_name);
    }
    Command::Get {
      url,
      navigate,
      output,
    } => {
      run_get(&manager, &client, &url, navigate, output.as_deref()).await?;
    }
    Command::Clear => {
      manager.teardown()?;
      println!("all buckets cleared");
    }
    Command::Version => {
      println!("{}", serde_json::to_string(&manager.version_info())?);
    }
    Command::Listen => {
      let listener = ControlListener::new(tokio::io::stdin());
      control::run(&manager, listener, tokio::io::stdout()).await?;
    }
    Command::Status => {
      for (name, count) in manager.status()? {
        println!("{}\t{} entries", name, count);
      }
    }
  }

  Ok(())
}

async fn run_get<S: BucketStore>(
  manager: &CacheManager<S>,
  client: &HttpClient,
  url: &str,
  navigate: bool,
  output: Option<&Path>,
) -> Result<()> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid url {}: {}", url, e))?;
  let request = if navigate {
    Request::navigation(url)
  } else {
    Request::get(url)
  };

  let handled = manager.handle(&request, || client.fetch(&request)).await;

  let served = match handled {
    Handled::Response(served) => served,
    Handled::Declined => {
      // Outside the cache's scope; plain uncached fetch
      let response = client.fetch(&request).await?;
      Served::from_network(response)
    }
    Handled::Unavailable => {
      return Err(eyre!("{} is unreachable and not cached", request.url));
    }
  };

  tracing::info!(
    url = %request.url,
    source = ?served.source,
    status = served.response.status,
    "request served"
  );

  match output {
    Some(path) => std::fs::write(path, &served.response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => {
      let mut stdout = std::io::stdout();
      stdout
        .write_all(&served.response.body)
        .map_err(|e| eyre!("Failed to write body: {}", e))?;
    }
  }

  Ok(())
}
