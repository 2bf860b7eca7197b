use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::http::{Request, Transport};

/// Connectivity events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// The probe answered after being unreachable (or on the first answer)
  ConnectivityRestored,
  /// The probe stopped answering
  ConnectivityLost,
}

/// Produces connectivity events by probing a URL on a fixed interval.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Start probing `probe_url` every `tick_rate`.
  ///
  /// The initial state counts as offline, so a reachable probe emits
  /// `ConnectivityRestored` once at startup.
  pub fn new(transport: Arc<dyn Transport>, probe_url: Url, tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut online = false;
      let mut ticker = tokio::time::interval(tick_rate);
      loop {
        ticker.tick().await;
        if tx.is_closed() {
          break;
        }

        let request = Request::get(probe_url.clone()).with_header("cache-control", "no-store");
        let reachable = match transport.send(request).await {
          Ok(_) => true,
          Err(e) => {
            debug!("Connectivity probe failed: {}", e);
            false
          }
        };

        let event = match (online, reachable) {
          (false, true) => Some(Event::ConnectivityRestored),
          (true, false) => Some(Event::ConnectivityLost),
          _ => None,
        };
        online = reachable;

        if let Some(event) = event {
          if tx.send(event).is_err() {
            break;
          }
        }
      }
      debug!("Connectivity probe stopped");
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
