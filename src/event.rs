use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::http::Request;

/// Events the platform delivers to the agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
  Install,
  Activate,
  Fetch {
    request: Request,
  },
  Push {
    #[serde(default)]
    payload: Option<String>,
  },
  NotificationClick {
    tag: String,
    #[serde(default)]
    action: Option<String>,
  },
  Sync {
    tag: String,
  },
}

impl Event {
  pub fn kind(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Push { .. } => "push",
      Event::NotificationClick { .. } => "notification_click",
      Event::Sync { .. } => "sync",
    }
  }

  /// Lifecycle events run one at a time, in order.
  pub fn is_lifecycle(&self) -> bool {
    matches!(self, Event::Install | Event::Activate)
  }
}

/// Foreground clients coming and going; handled by the host itself
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
  ClientConnected { client: String },
  ClientDisconnected { client: String },
}

/// One input line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HostInput {
  Client(ClientEvent),
  Agent(Event),
}

/// Event handler that decodes newline-delimited JSON input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<HostInput>,
}

impl EventHandler {
  /// Spawn a reader over `input`; the handler ends when the input does.
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read input");
            break;
          }
        };

        if line.trim().is_empty() {
          continue;
        }

        match serde_json::from_str::<HostInput>(&line) {
          Ok(input) => {
            if tx.send(input).is_err() {
              break;
            }
          }
          Err(e) => warn!(line = %line, error = %e, "skipping unreadable event"),
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<HostInput> {
    self.rx.recv().await
  }
}
