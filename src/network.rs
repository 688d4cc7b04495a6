use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use crate::http::{Headers, Request, Response};

/// The platform's network. An `Err` means the request never produced a
/// response (DNS, refused connection, reset); HTTP error statuses are `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a shared reqwest client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("linogtor-agent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

fn to_header_map(headers: &Headers) -> Result<HeaderMap> {
  let mut map = HeaderMap::new();
  for (name, value) in headers.iter() {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
    let value =
      HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value '{}': {}", value, e))?;
    map.insert(name, value);
  }
  Ok(map)
}

fn from_header_map(map: &HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    // Non UTF-8 values are not representable; skip them
    if let Ok(value) = value.to_str() {
      headers.insert(name.as_str(), value);
    }
  }
  headers
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let response = self
      .client
      .request(method, &request.url)
      .headers(to_header_map(&request.headers)?)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let headers = from_header_map(response.headers());
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}
