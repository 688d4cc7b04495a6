//! Surfaces the hosting platform exposes to the agent: lifecycle primitives,
//! notifications, client windows and client messaging.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::agent::{ClientMessage, Notification};

pub trait Platform: Send + Sync {
  /// Become eligible for activation without waiting for old pages to close.
  fn skip_waiting(&self);

  /// Take control of every open page.
  fn claim_clients(&self);

  fn show_notification(&self, notification: &Notification) -> Result<()>;

  fn close_notification(&self, tag: &str);

  /// Open (or focus) a client window on `url`.
  fn open_window(&self, url: &str) -> Result<()>;

  /// Ids of the currently connected foreground clients.
  fn clients(&self) -> Vec<String>;

  fn post_message(&self, client: &str, message: &ClientMessage) -> Result<()>;
}

/// A platform side effect, as written to the host's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
  SkipWaiting,
  ClaimClients,
  ShowNotification { notification: Notification },
  CloseNotification { tag: String },
  OpenWindow { url: String },
  PostMessage { client: String, message: ClientMessage },
}

/// Write one JSON document per line on stdout.
pub fn write_json_line<T: Serialize>(value: &T) -> Result<()> {
  let line = serde_json::to_string(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", line);
  Ok(())
}

/// Platform for the CLI host: effects become JSON lines on stdout and the
/// client list is maintained from connect/disconnect events.
#[derive(Default)]
pub struct StdioPlatform {
  clients: Mutex<BTreeSet<String>>,
}

impl StdioPlatform {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn connect(&self, client: &str) {
    if let Ok(mut clients) = self.clients.lock() {
      clients.insert(client.to_string());
    }
  }

  pub fn disconnect(&self, client: &str) {
    if let Ok(mut clients) = self.clients.lock() {
      clients.remove(client);
    }
  }

  fn emit(&self, effect: Effect) -> Result<()> {
    write_json_line(&effect)
  }
}

impl Platform for StdioPlatform {
  fn skip_waiting(&self) {
    let _ = self.emit(Effect::SkipWaiting);
  }

  fn claim_clients(&self) {
    let _ = self.emit(Effect::ClaimClients);
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.emit(Effect::ShowNotification {
      notification: notification.clone(),
    })
  }

  fn close_notification(&self, tag: &str) {
    let _ = self.emit(Effect::CloseNotification {
      tag: tag.to_string(),
    });
  }

  fn open_window(&self, url: &str) -> Result<()> {
    self.emit(Effect::OpenWindow {
      url: url.to_string(),
    })
  }

  fn clients(&self) -> Vec<String> {
    self
      .clients
      .lock()
      .map(|clients| clients.iter().cloned().collect())
      .unwrap_or_default()
  }

  fn post_message(&self, client: &str, message: &ClientMessage) -> Result<()> {
    if !self.clients().iter().any(|c| c == client) {
      return Err(eyre!("Client {} is not connected", client));
    }
    self.emit(Effect::PostMessage {
      client: client.to_string(),
      message: message.clone(),
    })
  }
}
