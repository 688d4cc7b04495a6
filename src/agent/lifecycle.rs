//! Install and activate: provisioning the current cache store and retiring
//! stores from previous versions.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{error, info};

use super::Agent;
use crate::cache::CacheStorage;
use crate::http::{Request, Response};

impl<S: CacheStorage + 'static> Agent<S> {
  /// Populate the current store with every manifest entry.
  ///
  /// All entries are fetched concurrently and written in one atomic step, so
  /// a failed install leaves nothing behind. Any network error or non-2xx
  /// status fails the whole install.
  pub async fn install(&self) -> Result<usize> {
    info!(cache = self.cache.cache_name(), "installing");
    self.cache.open()?;

    let requests = self
      .config
      .manifest
      .iter()
      .map(|entry| self.config.resolve(entry).map(|url| Request::get(url.as_str())))
      .collect::<Result<Vec<_>>>()?;

    let fetches = requests.into_iter().map(|request| self.fetch_manifest_entry(request));
    let entries = try_join_all(fetches).await.map_err(|e| {
      error!(error = %e, "install failed");
      e
    })?;

    self.cache.put_all(&entries)?;
    info!(
      cache = self.cache.cache_name(),
      entries = entries.len(),
      "cached static assets"
    );

    self.platform.skip_waiting();
    Ok(entries.len())
  }

  async fn fetch_manifest_entry(&self, request: Request) -> Result<(Request, Response)> {
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Failed to fetch manifest entry {}: {}", request.url, e))?;

    if !response.is_success() {
      return Err(eyre!(
        "Manifest entry {} returned {} {}",
        request.url,
        response.status,
        response.status_text
      ));
    }

    Ok((request, response))
  }

  /// Delete every store but the current one, then claim open pages.
  pub async fn activate(&self) -> Result<Vec<String>> {
    info!(cache = self.cache.cache_name(), "activating");

    let deleted = self.cache.prune_stale()?;
    for name in &deleted {
      info!(cache = %name, "deleted old cache");
    }

    self.platform.claim_clients();
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use crate::agent::Agent;
  use crate::cache::{CacheStorage, MemoryStorage};
  use crate::config::Config;
  use crate::http::{Request, Response};
  use crate::platform::Effect;
  use crate::testing::{FakeNetwork, RecordingPlatform};

  fn config() -> Config {
    Config {
      manifest: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string(),
      ],
      ..Config::default()
    }
  }

  fn serving_manifest() -> Arc<FakeNetwork> {
    let network = Arc::new(FakeNetwork::new());
    network.respond("http://localhost:5000/", Response::new(200, "OK", "<html>map</html>"));
    network.respond(
      "http://localhost:5000/offline.html",
      Response::new(200, "OK", "<html>offline</html>"),
    );
    network.respond(
      "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
      Response::new(200, "OK", "/* leaflet */").with_header("content-type", "text/javascript"),
    );
    network
  }

  #[tokio::test]
  async fn test_install_caches_every_manifest_entry() {
    let network = serving_manifest();
    let platform = Arc::new(RecordingPlatform::new());
    let agent = Agent::new(config(), MemoryStorage::new(), network.clone(), platform.clone());

    assert_eq!(agent.install().await.unwrap(), 3);

    for url in [
      "http://localhost:5000/",
      "http://localhost:5000/offline.html",
      "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
    ] {
      let request = Request::get(url);
      let cached = agent.cache().match_request(&request).unwrap().unwrap();
      let served = network.response_for(url).unwrap();
      assert_eq!(cached.response.body, served.body, "{url}");
    }
    assert_eq!(platform.effects(), vec![Effect::SkipWaiting]);
  }

  #[tokio::test]
  async fn test_install_fails_when_any_entry_fails() {
    let network = serving_manifest();
    network.fail("https://unpkg.com/leaflet@1.9.4/dist/leaflet.js");
    let platform = Arc::new(RecordingPlatform::new());
    let agent = Agent::new(config(), MemoryStorage::new(), network, platform.clone());

    let err = agent.install().await.unwrap_err();
    assert!(err.to_string().contains("leaflet.js"));

    let name = agent.cache().cache_name().to_string();
    assert!(agent.cache().storage().requests(&name).unwrap().is_empty());
    assert!(platform.effects().is_empty(), "no skip-waiting on failure");
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let network = serving_manifest();
    network.respond(
      "http://localhost:5000/offline.html",
      Response::new(404, "Not Found", ""),
    );
    let agent = Agent::new(
      config(),
      MemoryStorage::new(),
      network,
      Arc::new(RecordingPlatform::new()),
    );

    let err = agent.install().await.unwrap_err();
    assert!(err.to_string().contains("404"));
  }

  #[tokio::test]
  async fn test_activate_removes_stale_generations() {
    let storage = MemoryStorage::new();
    storage.open("linogtor-v0.9.0").unwrap();
    storage
      .put(
        "linogtor-v0.9.0",
        &Request::get("http://localhost:5000/"),
        &Response::new(200, "OK", "old"),
      )
      .unwrap();
    storage.open("linogtor-v1.0.0").unwrap();

    let platform = Arc::new(RecordingPlatform::new());
    let agent = Agent::new(
      Config::default(),
      storage,
      Arc::new(FakeNetwork::new()),
      platform.clone(),
    );

    let deleted = agent.activate().await.unwrap();

    assert_eq!(deleted, vec!["linogtor-v0.9.0"]);
    assert_eq!(agent.cache().storage().keys().unwrap(), vec!["linogtor-v1.0.0"]);
    assert_eq!(platform.effects(), vec![Effect::ClaimClients]);
  }
}
