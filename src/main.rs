mod agent;
mod app;
mod cache;
mod config;
mod event;
mod http;
mod logging;
mod network;
mod platform;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

use crate::agent::Agent;
use crate::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use crate::event::Event;
use crate::http::Request;
use crate::network::HttpNetwork;
use crate::platform::StdioPlatform;

#[derive(Parser, Debug)]
#[command(name = "linogtor-agent")]
#[command(about = "Offline cache agent for the LINOGTOR earthquake map")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/linogtor-agent/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin the application is served from
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Cache version to deploy (current store is <prefix>-<version>)
  #[arg(long, global = true)]
  cache_version: Option<String>,

  /// Keep cache stores in memory instead of the SQLite file
  #[arg(long, global = true)]
  in_memory: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read JSON events from stdin, one per line (default)
  Run,
  /// Populate the current cache store from the static manifest
  Install,
  /// Delete cache stores from previous versions
  Activate,
  /// Intercept a single request
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Accept header to send, e.g. text/html
    #[arg(long)]
    accept: Option<String>,
  },
  /// Show a push notification
  Push { payload: Option<String> },
  /// Click a notification
  Click {
    /// Notification tag (default: configured tag)
    tag: Option<String>,
    #[arg(short, long)]
    action: Option<String>,
  },
  /// Run a background sync
  Sync {
    /// Sync tag (default: configured tag)
    tag: Option<String>,
  },
  /// List cache stores and their entries
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }
  config.validate()?;

  let _logging = logging::init(&config.logging)?;

  let command = args.command.unwrap_or(Command::Run);

  if args.in_memory {
    run(MemoryStorage::new(), config, command).await
  } else {
    let storage = SqliteStorage::open(&config.storage_path()?)?;
    run(storage, config, command).await
  }
}

async fn run<S: CacheStorage + 'static>(
  storage: S,
  config: config::Config,
  command: Command,
) -> Result<()> {
  let list_caches = matches!(command, Command::Caches);

  let event = match command {
    Command::Run | Command::Caches => None,
    Command::Install => Some(Event::Install),
    Command::Activate => Some(Event::Activate),
    Command::Fetch {
      url,
      method,
      accept,
    } => {
      let mut request = Request {
        method,
        ..Request::get(url)
      };
      if let Some(accept) = accept {
        request.headers.insert("accept", accept);
      }
      Some(Event::Fetch { request })
    }
    Command::Push { payload } => Some(Event::Push { payload }),
    Command::Click { tag, action } => Some(Event::NotificationClick {
      tag: tag.unwrap_or_else(|| config.notification.tag.clone()),
      action,
    }),
    Command::Sync { tag } => Some(Event::Sync {
      tag: tag.unwrap_or_else(|| config.sync.tag.clone()),
    }),
  };

  let platform = Arc::new(StdioPlatform::new());
  let network = Arc::new(HttpNetwork::new()?);
  let agent = Agent::new(config, storage, network, platform.clone());
  let mut app = app::App::new(agent, platform);

  if list_caches {
    return app.list_caches();
  }

  match event {
    Some(event) => app.run_once(event).await,
    None => app.run(BufReader::new(tokio::io::stdin())).await.map(|_| ()),
  }
}
