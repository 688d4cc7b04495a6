//! Request and response descriptors exchanged between the host, the network
//! and the cache stores.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Header map with case-insensitive names (stored lowercased).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(
  #[serde(deserialize_with = "deserialize_lowercase_map")] BTreeMap<String, String>,
);

fn deserialize_lowercase_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let m: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
  Ok(m.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(&name.to_lowercase()).map(String::as_str)
  }

  pub fn insert(&mut self, name: &str, value: impl Into<String>) {
    self.0.insert(name.to_lowercase(), value.into());
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }
}

fn default_method() -> String {
  "GET".to_string()
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default = "default_method")]
  pub method: String,
  pub url: String,
  #[serde(default)]
  pub headers: Headers,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: default_method(),
      url: url.into(),
      headers: Headers::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Whether the caller asked for an HTML document. A missing `Accept`
  /// header counts as non-HTML.
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get("accept")
      .is_some_and(|accept| accept.contains("text/html"))
  }

  /// Stable storage key for the request identity (method + URL).
  pub fn cache_key(&self) -> String {
    let input = format!("{} {}", self.method.to_uppercase(), self.url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response descriptor. The body is fully buffered, so `clone()` yields an
/// independent copy that can be written to a cache store while the original
/// goes back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text.into(),
      headers: Headers::new(),
      body: body.into(),
    }
  }

  /// Plain text response with an explicit `Content-Type: text/plain`.
  pub fn plain_text(
    status: u16,
    status_text: impl Into<String>,
    body: impl Into<String>,
  ) -> Self {
    Self::new(status, status_text, body.into().into_bytes())
      .with_header("content-type", "text/plain")
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only an exact 200 is mirrored into the cache store.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
