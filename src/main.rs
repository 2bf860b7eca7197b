mod cache;
mod config;
mod db;
mod error;
mod event;
mod http;
mod lifetime;
mod logging;
mod queue;
mod router;
#[cfg(test)]
mod testing;
mod worker;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::cache::SqliteStorage;
use crate::event::{Event, EventHandler};
use crate::http::{Headers, HttpTransport, Request, RequestMode, Transport};
use crate::lifetime::Lifetime;
use crate::queue::{ActionId, NewAction, SqliteActionStore};
use crate::worker::OfflineWorker;

#[derive(Parser, Debug)]
#[command(name = "errands-offline")]
#[command(about = "Offline cache router and action queue for the ERRANDS admin dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/errands-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the dashboard origin from the config file
  #[arg(long)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest into the configured generation
  Install,
  /// Make the configured generation current and purge the rest
  Activate,
  /// Route one request through the cache router and print the response
  Fetch {
    /// Path (resolved against the origin) or absolute URL
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    #[arg(long, value_enum, default_value_t = RequestMode::Cors)]
    mode: RequestMode,
    /// Header as "Name: value", repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Queue a mutating request for replay
  Enqueue {
    target: String,
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// List pending actions in replay order
  Pending {
    /// One JSON object per line
    #[arg(long)]
    json: bool,
  },
  /// Drop a pending action
  Remove { id: i64 },
  /// Deliver a sync trigger (replays the queue for the configured tag)
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// List stored cache generations
  Generations,
  /// Probe connectivity and replay the queue whenever it comes back
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let _guard = logging::init(&config.log_dir()?)?;

  let db = db::Database::open(&config.database_path()?)?;
  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.request_timeout())?);
  let worker = OfflineWorker::new(
    &config,
    Arc::new(SqliteStorage::new(db.clone())),
    Arc::new(SqliteActionStore::new(db)),
    Arc::clone(&transport),
  )?;

  match args.command {
    Command::Install => match worker.on_install().await {
      Ok(Some(report)) => {
        println!("Installed and activated {}", config.cache_version);
        for name in report.purged {
          println!("Deleted old cache: {}", name);
        }
      }
      Ok(None) => println!("Installed {}, waiting for activation", config.cache_version),
      Err(e) => return Err(eyre!("Install of {} failed: {}", config.cache_version, e)),
    },

    Command::Activate => {
      let report = worker
        .on_activate()
        .await
        .map_err(|e| eyre!("Activation failed: {}", e))?;
      println!("Activated {}", config.cache_version);
      for name in report.purged {
        println!("Deleted old cache: {}", name);
      }
    }

    Command::Fetch {
      target,
      method,
      mode,
      headers,
      data,
    } => {
      let mut request = Request::new(parse_method(&method)?, config.origin.join(&target)?)
        .with_mode(mode);
      request.headers = parse_headers(&headers)?;
      request.body = data.map(Bytes::from);

      let lifetime = Lifetime::new();
      let response = worker.on_fetch(request, &lifetime).await;
      lifetime.settled().await;

      eprintln!("HTTP {} ({:?})", response.status(), response.source());
      for (name, value) in response.headers().iter() {
        eprintln!("{}: {}", name, String::from_utf8_lossy(value));
      }
      std::io::stdout().write_all(&response.into_bytes())?;
    }

    Command::Enqueue {
      target,
      method,
      headers,
      data,
    } => {
      let action = NewAction {
        method: parse_method(&method)?,
        url: config.origin.join(&target)?,
        headers: parse_headers(&headers)?,
        body: data.map(Bytes::from),
      };
      let id = worker
        .queue()
        .enqueue(action)
        .await
        .map_err(|e| eyre!("Failed to queue action: {}", e))?;
      println!("{}", id);
    }

    Command::Pending { json } => {
      let pending = worker
        .queue()
        .list_pending()
        .await
        .map_err(|e| eyre!("Failed to list pending actions: {}", e))?;
      for action in pending {
        if json {
          let body = action.body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned());
          let line = json!({
            "id": action.id.0,
            "method": action.method.as_str(),
            "url": action.url.as_str(),
            "headers": action.headers,
            "body": body,
            "enqueued_at": action.enqueued_at,
          });
          println!("{}", line);
        } else {
          println!(
            "{:>6}  {:<7} {}  ({})",
            action.id.0,
            action.method.as_str(),
            action.url,
            action.enqueued_at.format("%Y-%m-%d %H:%M:%S")
          );
        }
      }
    }

    Command::Remove { id } => {
      let removed = worker
        .queue()
        .remove(ActionId(id))
        .await
        .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;
      if removed {
        println!("Removed {}", id);
      } else {
        println!("No pending action {}", id);
      }
    }

    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| config.sync_tag.clone());
      match worker.on_sync(&tag).await {
        Some(report) if report.skipped => println!("Replay already in progress"),
        Some(report) => println!(
          "Replayed {}, still pending {}",
          report.replayed.len(),
          report.failed.len()
        ),
        None => println!("Ignored sync trigger '{}'", tag),
      }
    }

    Command::Generations => {
      let generations = worker
        .generations()
        .await
        .map_err(|e| eyre!("Failed to list generations: {}", e))?;
      for generation in generations {
        println!(
          "{:<24} {:<11} {:>5} entries  created {}",
          generation.name,
          generation.state.as_str(),
          generation.entries,
          generation.created_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }

    Command::Watch => {
      let probe_url = config
        .probe_url
        .clone()
        .ok_or_else(|| eyre!("`watch` needs probe_url in the config file"))?;
      info!("Watching connectivity via {}", probe_url);

      let mut events = EventHandler::new(transport, probe_url, config.probe_interval());
      loop {
        tokio::select! {
          event = events.next() => match event {
            Some(Event::ConnectivityRestored) => {
              let report = worker.on_connectivity_restored().await;
              info!(
                "Replayed {}, still pending {}",
                report.replayed.len(),
                report.failed.len()
              );
            }
            Some(Event::ConnectivityLost) => info!("Connectivity lost"),
            None => break,
          },
          _ = tokio::signal::ctrl_c() => break,
        }
      }
    }
  }

  Ok(())
}

fn parse_method(method: &str) -> Result<Method> {
  Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid HTTP method '{}': {}", method, e))
}

fn parse_headers(raw: &[String]) -> Result<Headers> {
  raw
    .iter()
    .map(|header| {
      let (name, value) = header
        .split_once(':')
        .ok_or_else(|| eyre!("Invalid header '{}', expected \"Name: value\"", header))?;
      Ok((name.trim().to_string(), value.trim().to_string()))
    })
    .collect::<Result<Vec<_>>>()
    .map(Headers::from_iter)
}
