//! The offline cache agent.
//!
//! Each platform event is handled by one method; `dispatch` matches on the
//! event kind and returns the future the host awaits before it considers the
//! event complete.

mod fetch;
mod lifecycle;
mod notify;
mod sync;

pub use fetch::FetchOutcome;
pub use notify::Notification;
pub use sync::{ClientMessage, SyncReport};

use color_eyre::Result;
use std::sync::Arc;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::event::Event;
use crate::network::Network;
use crate::platform::Platform;

/// What a handled event produced.
#[derive(Debug)]
pub enum Outcome {
  /// Number of manifest entries written to the current store
  Installed(usize),
  /// Names of the stale stores that were deleted
  Activated(Vec<String>),
  Fetch(FetchOutcome),
  Notified(Notification),
  /// URL of the window opened by the click, if any
  Clicked(Option<String>),
  /// `None` when the sync tag is not ours
  Synced(Option<SyncReport>),
}

pub struct Agent<S: CacheStorage> {
  config: Arc<Config>,
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
  platform: Arc<dyn Platform>,
}

impl<S: CacheStorage + 'static> Agent<S> {
  pub fn new(
    config: Config,
    storage: S,
    network: Arc<dyn Network>,
    platform: Arc<dyn Platform>,
  ) -> Self {
    let cache = CacheLayer::new(storage, config.cache_name());
    Self {
      config: Arc::new(config),
      cache,
      network,
      platform,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn network(&self) -> &Arc<dyn Network> {
    &self.network
  }

  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    match event {
      Event::Install => self.install().await.map(Outcome::Installed),
      Event::Activate => self.activate().await.map(Outcome::Activated),
      Event::Fetch { request } => Ok(Outcome::Fetch(self.handle_fetch(request).await)),
      Event::Push { payload } => self.handle_push(payload).await.map(Outcome::Notified),
      Event::NotificationClick { tag, action } => self
        .handle_notification_click(&tag, action.as_deref())
        .await
        .map(Outcome::Clicked),
      Event::Sync { tag } => self.handle_sync(&tag).await.map(Outcome::Synced),
    }
  }
}

impl<S: CacheStorage> Clone for Agent<S> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      cache: self.cache.clone(),
      network: Arc::clone(&self.network),
      platform: Arc::clone(&self.platform),
    }
  }
}
