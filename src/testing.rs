//! In-crate fakes for the network and the platform.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::agent::{ClientMessage, Notification};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::platform::{Effect, Platform};

/// Network answering from a fixed table. Unknown URLs fail like a refused
/// connection.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Result<Response, String>>>,
  calls: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Ok(response));
  }

  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Err("connection reset".to_string()));
  }

  pub fn response_for(&self, url: &str) -> Option<Response> {
    self.routes.lock().unwrap().get(url)?.clone().ok()
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());
    match self.routes.lock().unwrap().get(&request.url) {
      Some(Ok(response)) => Ok(response.clone()),
      Some(Err(reason)) => Err(eyre!("{}: {}", request.url, reason)),
      None => Err(eyre!("{}: connection refused", request.url)),
    }
  }
}

/// Platform that records every effect in order.
#[derive(Default)]
pub struct RecordingPlatform {
  clients: Vec<String>,
  effects: Mutex<Vec<Effect>>,
}

impl RecordingPlatform {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_clients(clients: &[&str]) -> Self {
    Self {
      clients: clients.iter().map(|c| c.to_string()).collect(),
      effects: Mutex::default(),
    }
  }

  pub fn effects(&self) -> Vec<Effect> {
    self.effects.lock().unwrap().clone()
  }

  fn record(&self, effect: Effect) {
    self.effects.lock().unwrap().push(effect);
  }
}

impl Platform for RecordingPlatform {
  fn skip_waiting(&self) {
    self.record(Effect::SkipWaiting);
  }

  fn claim_clients(&self) {
    self.record(Effect::ClaimClients);
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.record(Effect::ShowNotification {
      notification: notification.clone(),
    });
    Ok(())
  }

  fn close_notification(&self, tag: &str) {
    self.record(Effect::CloseNotification {
      tag: tag.to_string(),
    });
  }

  fn open_window(&self, url: &str) -> Result<()> {
    self.record(Effect::OpenWindow {
      url: url.to_string(),
    });
    Ok(())
  }

  fn clients(&self) -> Vec<String> {
    self.clients.clone()
  }

  fn post_message(&self, client: &str, message: &ClientMessage) -> Result<()> {
    self.record(Effect::PostMessage {
      client: client.to_string(),
      message: message.clone(),
    });
    Ok(())
  }
}
