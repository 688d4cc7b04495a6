//! Background sync of earthquake data to foreground clients.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::Agent;
use crate::cache::CacheStorage;
use crate::http::Request;

/// Structured message posted to foreground clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SyncComplete(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
  pub data: Value,
  /// Clients the message was delivered to
  pub delivered: usize,
}

impl<S: CacheStorage + 'static> Agent<S> {
  /// Fetch fresh data and broadcast it. A fetch or parse failure fails the
  /// task before anything is broadcast; rescheduling is up to the platform.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.config.sync.tag {
      debug!(tag, "ignoring sync event");
      return Ok(None);
    }

    info!(tag, "background sync: syncing earthquake data");
    let data = self.fetch_sync_payload().await.map_err(|e| {
      error!(error = %e, "background sync failed");
      e
    })?;

    let message = ClientMessage::SyncComplete(data.clone());
    let mut delivered = 0;
    for client in self.platform.clients() {
      match self.platform.post_message(&client, &message) {
        Ok(()) => delivered += 1,
        Err(e) => warn!(client = %client, error = %e, "failed to post sync result"),
      }
    }
    info!(delivered, "sync complete");

    Ok(Some(SyncReport { data, delivered }))
  }

  async fn fetch_sync_payload(&self) -> Result<Value> {
    let url = self.config.resolve(&self.config.sync.endpoint)?;
    let request = Request::get(url.as_str()).with_header("accept", "application/json");

    let response = self.network.fetch(&request).await?;

    serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Failed to parse {} response as JSON: {}", url, e))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::cache::MemoryStorage;
  use crate::config::Config;
  use crate::http::Response;
  use crate::platform::Effect;
  use crate::testing::{FakeNetwork, RecordingPlatform};

  const ENDPOINT: &str = "http://localhost:5000/api/earthquakes";

  fn agent(network: Arc<FakeNetwork>, platform: Arc<RecordingPlatform>) -> Agent<MemoryStorage> {
    Agent::new(Config::default(), MemoryStorage::new(), network, platform)
  }

  #[tokio::test]
  async fn test_sync_broadcasts_once_per_client() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(
      ENDPOINT,
      Response::new(200, "OK", r#"{"earthquakes":[{"magnitude":4.6,"place":"Bogo"}]}"#),
    );
    let platform = Arc::new(RecordingPlatform::with_clients(&["tab-1", "tab-2"]));

    let report = agent(network, platform.clone())
      .handle_sync("sync-earthquakes")
      .await
      .unwrap()
      .unwrap();

    let expected = serde_json::json!({"earthquakes":[{"magnitude":4.6,"place":"Bogo"}]});
    assert_eq!(report.data, expected);
    assert_eq!(report.delivered, 2);
    assert_eq!(
      platform.effects(),
      vec![
        Effect::PostMessage {
          client: "tab-1".to_string(),
          message: ClientMessage::SyncComplete(expected.clone()),
        },
        Effect::PostMessage {
          client: "tab-2".to_string(),
          message: ClientMessage::SyncComplete(expected),
        },
      ]
    );
  }

  #[tokio::test]
  async fn test_sync_fetch_failure_broadcasts_nothing() {
    let network = Arc::new(FakeNetwork::new());
    network.fail(ENDPOINT);
    let platform = Arc::new(RecordingPlatform::with_clients(&["tab-1"]));

    let result = agent(network, platform.clone())
      .handle_sync("sync-earthquakes")
      .await;

    assert!(result.is_err());
    assert!(platform.effects().is_empty());
  }

  #[tokio::test]
  async fn test_sync_parse_failure_broadcasts_nothing() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(ENDPOINT, Response::new(200, "OK", "<html>not json</html>"));
    let platform = Arc::new(RecordingPlatform::with_clients(&["tab-1"]));

    let err = agent(network, platform.clone())
      .handle_sync("sync-earthquakes")
      .await
      .unwrap_err();

    assert!(err.to_string().contains("JSON"));
    assert!(platform.effects().is_empty());
  }

  #[tokio::test]
  async fn test_other_tags_are_ignored() {
    let network = Arc::new(FakeNetwork::new());
    let platform = Arc::new(RecordingPlatform::with_clients(&["tab-1"]));

    let report = agent(network.clone(), platform.clone())
      .handle_sync("sync-reports")
      .await
      .unwrap();

    assert!(report.is_none());
    assert!(network.calls().is_empty());
    assert!(platform.effects().is_empty());
  }
}
