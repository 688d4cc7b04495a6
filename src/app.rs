use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::agent::{Agent, FetchOutcome, Outcome};
use crate::cache::{CacheResult, CacheSource, CacheStorage};
use crate::event::{ClientEvent, Event, EventHandler, HostInput};
use crate::http::{Headers, Request, Response};
use crate::platform::{write_json_line, StdioPlatform};

/// Where the agent is in its deployment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; a new install attempt is required
  Redundant,
}

impl Lifecycle {
  /// Fetches are routed to the agent only once it is active.
  pub fn controls_fetches(self) -> bool {
    self == Lifecycle::Activated
  }
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Lifecycle::Parsed => "parsed",
      Lifecycle::Installing => "installing",
      Lifecycle::Installed => "installed",
      Lifecycle::Activating => "activating",
      Lifecycle::Activated => "activated",
      Lifecycle::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// How a fetch was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Served {
  /// Default platform handling, agent not involved
  Passthrough,
  Network,
  Cache,
  OfflineDocument,
  Placeholder,
}

impl From<CacheSource> for Served {
  fn from(source: CacheSource) -> Self {
    match source {
      CacheSource::Network => Served::Network,
      CacheSource::Cache => Served::Cache,
      CacheSource::OfflineDocument => Served::OfflineDocument,
      CacheSource::Placeholder => Served::Placeholder,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchReport {
  pub url: String,
  pub served: Served,
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: String,
  /// When the served entry was stored, for cache and offline-document hits
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cached_at: Option<DateTime<Utc>>,
}

impl FetchReport {
  fn new(url: &str, served: Served, response: &Response) -> Self {
    Self {
      url: url.to_string(),
      served,
      status: response.status,
      status_text: response.status_text.clone(),
      headers: response.headers.clone(),
      body: response.text(),
      cached_at: None,
    }
  }

  fn intercepted(url: &str, result: &CacheResult<Response>) -> Self {
    Self {
      cached_at: result.cached_at,
      ..Self::new(url, result.source.into(), &result.data)
    }
  }
}

/// Event-specific part of a report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Detail {
  Installed { cached: usize },
  Activated { deleted: Vec<String> },
  Fetch(FetchReport),
  Notified { title: String, body: String },
  Clicked { opened: Option<String> },
  Synced { delivered: usize },
  Ignored { ignored: bool },
}

/// One line of output per handled event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
  pub event: &'static str,
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(flatten)]
  pub detail: Option<Detail>,
}

impl Report {
  fn success(event: &'static str, detail: Detail) -> Self {
    Self {
      event,
      ok: true,
      error: None,
      detail: Some(detail),
    }
  }

  fn failure(event: &'static str, error: impl ToString) -> Self {
    Self {
      event,
      ok: false,
      error: Some(error.to_string()),
      detail: None,
    }
  }
}

/// Tally of the events one `run` handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  pub handled: usize,
  pub failed: usize,
}

impl RunSummary {
  fn record(&mut self, ok: bool) {
    self.handled += 1;
    if !ok {
      self.failed += 1;
    }
  }
}

/// Host runtime: delivers events to the agent and reports the results.
pub struct App<S: CacheStorage> {
  agent: Agent<S>,
  platform: Arc<StdioPlatform>,
  lifecycle: Lifecycle,
}

impl<S: CacheStorage + 'static> App<S> {
  pub fn new(agent: Agent<S>, platform: Arc<StdioPlatform>) -> Self {
    Self {
      agent,
      platform,
      lifecycle: Lifecycle::Parsed,
    }
  }

  #[allow(dead_code)]
  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  /// Long-running mode: read events until the input closes.
  ///
  /// Lifecycle events are awaited before the next line is read. Everything
  /// else runs as an independent task, so reports may come out of order.
  /// A failed event is reported and the loop carries on.
  pub async fn run<R>(&mut self, input: R) -> Result<RunSummary>
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let mut events = EventHandler::new(input);
    let mut tasks = JoinSet::new();
    let mut summary = RunSummary::default();

    info!(cache = self.agent.cache().cache_name(), "agent loaded");

    while let Some(input) = events.next().await {
      match input {
        HostInput::Client(event) => self.handle_client_event(event),
        HostInput::Agent(event) if event.is_lifecycle() => {
          let report = self.handle_lifecycle(event).await;
          write_json_line(&report)?;
          summary.record(report.ok);
        }
        HostInput::Agent(event) => {
          let agent = self.agent.clone();
          let controlled = self.lifecycle.controls_fetches();
          tasks.spawn(async move {
            let handled = if controlled {
              dispatch(&agent, event).await
            } else {
              uncontrolled(&agent, event).await
            };
            let ok = handled.report.ok;
            if let Err(e) = handled.finish().await {
              warn!(error = %e, "failed to write report");
            }
            ok
          });
        }
      }

      while let Some(done) = tasks.try_join_next() {
        summary.record(task_ok(done));
      }
    }

    // Let in-flight events finish before exiting
    while let Some(done) = tasks.join_next().await {
      summary.record(task_ok(done));
    }

    info!(handled = summary.handled, failed = summary.failed, "input closed");
    Ok(summary)
  }

  /// One-shot mode: deliver a single event without lifecycle gating.
  pub async fn run_once(&self, event: Event) -> Result<()> {
    let report = dispatch(&self.agent, event).await.finish().await?;

    match report.error {
      Some(error) => Err(eyre!("{} failed: {}", report.event, error)),
      None => Ok(()),
    }
  }

  /// Print every cache store with its entries.
  pub fn list_caches(&self) -> Result<()> {
    let cache = self.agent.cache();

    for name in cache.storage().keys()? {
      let urls: Vec<String> = cache
        .storage()
        .requests(&name)?
        .into_iter()
        .map(|request| request.url)
        .collect();

      write_json_line(&serde_json::json!({
        "cache": name,
        "current": name == cache.cache_name(),
        "entries": urls.len(),
        "urls": urls,
      }))?;
    }

    Ok(())
  }

  fn handle_client_event(&self, event: ClientEvent) {
    match event {
      ClientEvent::ClientConnected { client } => {
        debug!(client = %client, "client connected");
        self.platform.connect(&client);
      }
      ClientEvent::ClientDisconnected { client } => {
        debug!(client = %client, "client disconnected");
        self.platform.disconnect(&client);
      }
    }
  }

  async fn handle_lifecycle(&mut self, event: Event) -> Report {
    let kind = event.kind();

    match event {
      Event::Install => {
        self.lifecycle = Lifecycle::Installing;
        let report = dispatch(&self.agent, event).await.report;
        self.lifecycle = if report.ok {
          Lifecycle::Installed
        } else {
          Lifecycle::Redundant
        };
        report
      }
      Event::Activate => {
        if self.lifecycle != Lifecycle::Installed {
          return Report::failure(kind, format!("cannot activate while {}", self.lifecycle));
        }
        self.lifecycle = Lifecycle::Activating;
        let report = dispatch(&self.agent, event).await.report;
        // A failed cleanup leaves the installed version waiting for another try
        self.lifecycle = if report.ok {
          Lifecycle::Activated
        } else {
          Lifecycle::Installed
        };
        report
      }
      other => dispatch(&self.agent, other).await.report,
    }
  }
}

fn task_ok(done: Result<bool, tokio::task::JoinError>) -> bool {
  done.unwrap_or_else(|e| {
    warn!(error = %e, "event task failed");
    false
  })
}

/// A report, plus the detached cache write the event started, if any.
pub struct Handled {
  pub report: Report,
  pub cache_write: Option<JoinHandle<()>>,
}

impl From<Report> for Handled {
  fn from(report: Report) -> Self {
    Self {
      report,
      cache_write: None,
    }
  }
}

impl Handled {
  /// Write the report, then wait for the cache write so process exit does
  /// not cut it off. The response is already out before the wait.
  pub async fn finish(self) -> Result<Report> {
    write_json_line(&self.report)?;
    if let Some(cache_write) = self.cache_write {
      if let Err(e) = cache_write.await {
        warn!(error = %e, "cache write task failed");
      }
    }
    Ok(self.report)
  }
}

/// Run one event through the agent and describe the result.
pub async fn dispatch<S: CacheStorage + 'static>(agent: &Agent<S>, event: Event) -> Handled {
  let kind = event.kind();
  let request = match &event {
    Event::Fetch { request } => Some(request.clone()),
    _ => None,
  };
  // Reports carry the absolute URL the agent actually fetched
  let url = request.as_ref().map_or_else(String::new, |request| {
    agent
      .config()
      .resolve(&request.url)
      .map_or_else(|_| request.url.clone(), |url| url.to_string())
  });

  let report = match agent.dispatch(event).await {
    Ok(Outcome::Installed(cached)) => Report::success(kind, Detail::Installed { cached }),
    Ok(Outcome::Activated(deleted)) => Report::success(kind, Detail::Activated { deleted }),
    Ok(Outcome::Fetch(FetchOutcome::Respond(intercepted))) => {
      let report = Report::success(
        kind,
        Detail::Fetch(FetchReport::intercepted(&url, &intercepted.result)),
      );
      return Handled {
        report,
        cache_write: intercepted.cache_write,
      };
    }
    Ok(Outcome::Fetch(FetchOutcome::Passthrough)) => match request {
      Some(request) => passthrough(agent, &request).await,
      None => Report::failure(kind, "fetch outcome without a request"),
    },
    Ok(Outcome::Notified(notification)) => Report::success(
      kind,
      Detail::Notified {
        title: notification.title,
        body: notification.body,
      },
    ),
    Ok(Outcome::Clicked(opened)) => Report::success(kind, Detail::Clicked { opened }),
    Ok(Outcome::Synced(Some(report))) => Report::success(
      kind,
      Detail::Synced {
        delivered: report.delivered,
      },
    ),
    Ok(Outcome::Synced(None)) => Report::success(kind, Detail::Ignored { ignored: true }),
    Err(e) => Report::failure(kind, e),
  };

  report.into()
}

/// Events arriving before activation. Fetches go straight to the network;
/// the rest are delivered as usual.
async fn uncontrolled<S: CacheStorage + 'static>(agent: &Agent<S>, event: Event) -> Handled {
  match event {
    Event::Fetch { request } => {
      debug!(url = %request.url, "agent not active, fetching without interception");
      passthrough(agent, &request).await.into()
    }
    other => dispatch(agent, other).await,
  }
}

/// Default platform handling: a plain network fetch, no cache involved.
async fn passthrough<S: CacheStorage + 'static>(agent: &Agent<S>, request: &Request) -> Report {
  let request = match agent.config().resolve(&request.url) {
    Ok(url) => Request {
      url: url.to_string(),
      ..request.clone()
    },
    Err(e) => return Report::failure("fetch", e),
  };

  match agent.network().fetch(&request).await {
    Ok(response) => Report::success(
      "fetch",
      Detail::Fetch(FetchReport::new(&request.url, Served::Passthrough, &response)),
    ),
    Err(e) => Report::failure("fetch", e),
  }
}
