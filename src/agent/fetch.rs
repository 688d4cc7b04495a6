//! Fetch interception: network first, then the current store, then the
//! offline document or a placeholder.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Agent;
use crate::cache::{CacheResult, CacheStorage, NetworkFirst};
use crate::http::{Request, Response};

#[derive(Debug)]
pub enum FetchOutcome {
  /// Not ours; the platform handles the request as if no agent existed.
  Passthrough,
  Respond(Intercepted),
}

#[derive(Debug)]
pub struct Intercepted {
  pub result: CacheResult<Response>,
  /// Detached write mirroring a network response into the store. The
  /// response does not wait on it; it may land before or after the
  /// response is consumed.
  pub cache_write: Option<JoinHandle<()>>,
}

impl Intercepted {
  fn served(result: CacheResult<Response>) -> Self {
    Self {
      result,
      cache_write: None,
    }
  }

  #[cfg(test)]
  pub fn response(&self) -> &Response {
    &self.result.data
  }
}

impl<S: CacheStorage + 'static> Agent<S> {
  /// Handle an intercepted request. Never fails: every network failure ends
  /// in one of the fallback tiers.
  pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
    if !request.is_get() {
      debug!(method = %request.method, url = %request.url, "passing through non-GET request");
      return FetchOutcome::Passthrough;
    }

    let url = match self.config.resolve(&request.url) {
      Ok(url) => url,
      Err(e) => {
        warn!(url = %request.url, error = %e, "passing through unresolvable request");
        return FetchOutcome::Passthrough;
      }
    };
    if self.config.excluded_schemes.contains(url.scheme()) {
      debug!(url = %url, "passing through excluded scheme");
      return FetchOutcome::Passthrough;
    }

    let request = Request {
      url: url.to_string(),
      ..request
    };

    let outcome = self
      .cache
      .fetch_network_first(&request, || self.network.fetch(&request))
      .await;

    match outcome {
      NetworkFirst::Fresh {
        response,
        cache_write,
      } => FetchOutcome::Respond(Intercepted {
        result: CacheResult::from_network(response),
        cache_write,
      }),
      NetworkFirst::Cached(result) => {
        info!(url = %request.url, "serving from cache");
        FetchOutcome::Respond(Intercepted::served(result))
      }
      NetworkFirst::Miss => {
        FetchOutcome::Respond(Intercepted::served(self.offline_fallback(&request)))
      }
    }
  }

  /// Last two tiers: the offline document for HTML requests, otherwise the
  /// placeholder. An HTML request also gets the placeholder when the offline
  /// document itself is not cached.
  fn offline_fallback(&self, request: &Request) -> CacheResult<Response> {
    if request.accepts_html() {
      match self.cached_offline_document() {
        Some(result) => {
          info!(url = %request.url, "serving offline document");
          return result;
        }
        None => warn!(document = %self.config.offline_document, "offline document not cached"),
      }
    }

    debug!(url = %request.url, "serving offline placeholder");
    let placeholder = &self.config.placeholder;
    CacheResult::placeholder(Response::plain_text(
      placeholder.status,
      placeholder.status_text.clone(),
      placeholder.body.clone(),
    ))
  }

  fn cached_offline_document(&self) -> Option<CacheResult<Response>> {
    let url = self.config.resolve(&self.config.offline_document).ok()?;
    match self.cache.match_request(&Request::get(url.as_str())) {
      Ok(entry) => {
        entry.map(|entry| CacheResult::offline_document(entry.response, entry.cached_at))
      }
      Err(e) => {
        warn!(error = %e, "offline document lookup failed");
        None
      }
    }
  }
}
