//! Cache layer that binds the storage backend to the current cache store and
//! implements the network-first strategy.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::{CacheStorage, CachedEntry};
use super::traits::CacheResult;
use crate::http::{Request, Response};

/// Outcome of a network-first lookup.
#[derive(Debug)]
pub enum NetworkFirst {
  /// The network answered. `cache_write` is the detached task mirroring
  /// the response into the store, if the status was cacheable.
  Fresh {
    response: Response,
    cache_write: Option<JoinHandle<()>>,
  },
  /// The network failed and the store had an entry for the request.
  Cached(CacheResult<Response>),
  /// The network failed and nothing was cached for the request.
  Miss,
}

/// Cache layer bound to the one current cache store.
///
/// Every read and write goes to the store named by `cache_name`; other
/// stores are only ever listed and deleted.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  cache_name: Arc<str>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer over `storage` for the given store name.
  pub fn new(storage: S, cache_name: impl Into<Arc<str>>) -> Self {
    Self {
      storage: Arc::new(storage),
      cache_name: cache_name.into(),
    }
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Create the current store if absent.
  pub fn open(&self) -> Result<()> {
    self.storage.open(&self.cache_name)
  }

  /// Write all entries into the current store in one atomic step.
  pub fn put_all(&self, entries: &[(Request, Response)]) -> Result<()> {
    self.storage.put_all(&self.cache_name, entries)
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.match_request(&self.cache_name, request)
  }

  /// Delete every store other than the current one. Returns the deleted names.
  pub fn prune_stale(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name != *self.cache_name {
        debug!(cache = %name, "deleting stale cache");
        if self.storage.delete(&name)? {
          deleted.push(name);
        }
      }
    }
    Ok(deleted)
  }

  /// Mirror a response into the current store on a detached blocking task.
  ///
  /// There is no ordering between this write and the response handed back
  /// to the caller, nor between writes for the same request; the store keeps
  /// whichever lands last. Failures are logged and otherwise dropped.
  pub fn spawn_put(&self, request: Request, response: Response) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let cache_name = Arc::clone(&self.cache_name);

    tokio::task::spawn_blocking(move || {
      match storage.put(&cache_name, &request, &response) {
        Ok(()) => debug!(url = %request.url, cache = %cache_name, "cached response"),
        Err(e) => warn!(url = %request.url, error = %e, "cache write failed"),
      }
    })
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Try the network - on success return it, mirroring 200s into the store
  /// 2. On network failure, return the stored entry if there is one
  /// 3. Otherwise report a miss; storage errors count as misses
  pub async fn fetch_network_first<F, Fut>(&self, request: &Request, fetcher: F) -> NetworkFirst
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        let cache_write = response
          .is_cacheable()
          .then(|| self.spawn_put(request.clone(), response.clone()));
        NetworkFirst::Fresh {
          response,
          cache_write,
        }
      }
      Err(network_error) => {
        debug!(url = %request.url, error = %network_error, "network failed, trying cache");
        match self.match_request(request) {
          Ok(Some(entry)) => {
            NetworkFirst::Cached(CacheResult::from_cache(entry.response, entry.cached_at))
          }
          Ok(None) => NetworkFirst::Miss,
          Err(e) => {
            warn!(url = %request.url, error = %e, "cache lookup failed");
            NetworkFirst::Miss
          }
        }
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      cache_name: Arc::clone(&self.cache_name),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use color_eyre::eyre::eyre;

  fn layer() -> CacheLayer<MemoryStorage> {
    CacheLayer::new(MemoryStorage::new(), "linogtor-v1.0.0")
  }

  #[tokio::test]
  async fn test_network_success_is_mirrored() {
    let cache = layer();
    let request = Request::get("http://localhost:5000/api/stats");

    let outcome = cache
      .fetch_network_first(&request, || async { Ok(Response::new(200, "OK", "{}")) })
      .await;

    let NetworkFirst::Fresh {
      response,
      cache_write,
    } = outcome
    else {
      panic!("expected network response");
    };
    assert_eq!(response.text(), "{}");
    cache_write.expect("200 is cached").await.unwrap();

    let entry = cache.match_request(&request).unwrap().unwrap();
    assert_eq!(entry.response, response);
  }

  #[tokio::test]
  async fn test_non_200_is_not_mirrored() {
    let cache = layer();
    let request = Request::get("http://localhost:5000/missing");

    let outcome = cache
      .fetch_network_first(&request, || async { Ok(Response::new(404, "Not Found", "")) })
      .await;

    assert!(matches!(
      outcome,
      NetworkFirst::Fresh {
        cache_write: None,
        ..
      }
    ));
    assert!(cache.match_request(&request).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_failure_serves_cache() {
    let cache = layer();
    let request = Request::get("http://localhost:5000/");
    cache
      .put_all(&[(request.clone(), Response::new(200, "OK", "<html>map</html>"))])
      .unwrap();

    let outcome = cache
      .fetch_network_first(&request, || async { Err(eyre!("connection refused")) })
      .await;

    let NetworkFirst::Cached(result) = outcome else {
      panic!("expected cache hit");
    };
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.text(), "<html>map</html>");
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_network_failure_without_entry_is_miss() {
    let cache = layer();
    let outcome = cache
      .fetch_network_first(&Request::get("http://localhost:5000/x"), || async {
        Err(eyre!("offline"))
      })
      .await;
    assert!(matches!(outcome, NetworkFirst::Miss));
  }

  #[test]
  fn test_prune_keeps_only_current() {
    let cache = layer();
    cache.storage().open("linogtor-v0.9.0").unwrap();
    cache.open().unwrap();
    cache.storage().open("other-cache").unwrap();

    let deleted = cache.prune_stale().unwrap();

    assert_eq!(deleted, vec!["linogtor-v0.9.0", "other-cache"]);
    assert_eq!(cache.storage().keys().unwrap(), vec!["linogtor-v1.0.0"]);
  }
}
