//! Push notifications and notification clicks.

use color_eyre::Result;
use serde::Serialize;
use tracing::info;

use super::Agent;
use crate::cache::CacheStorage;
use crate::config::{NotificationActionConfig, NotificationConfig};

/// A notification ready for the platform's notification surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationActionConfig>,
}

impl Notification {
  /// Fill the configured template. The payload is used verbatim as the body;
  /// without one the template's default body is used.
  pub fn from_template(template: &NotificationConfig, payload: Option<&str>) -> Self {
    Self {
      title: template.title.clone(),
      body: payload.unwrap_or(&template.default_body).to_string(),
      icon: template.icon.clone(),
      badge: template.badge.clone(),
      vibrate: template.vibrate.clone(),
      tag: template.tag.clone(),
      require_interaction: template.require_interaction,
      actions: template.actions.clone(),
    }
  }
}

const VIEW_ACTION: &str = "view";

impl<S: CacheStorage + 'static> Agent<S> {
  pub async fn handle_push(&self, payload: Option<String>) -> Result<Notification> {
    info!(has_payload = payload.is_some(), "push notification received");

    let notification = Notification::from_template(&self.config.notification, payload.as_deref());
    self.platform.show_notification(&notification)?;

    Ok(notification)
  }

  /// Close the clicked notification; the "view" action also opens the
  /// application root. Returns the opened URL.
  pub async fn handle_notification_click(
    &self,
    tag: &str,
    action: Option<&str>,
  ) -> Result<Option<String>> {
    self.platform.close_notification(tag);

    if action != Some(VIEW_ACTION) {
      return Ok(None);
    }

    let url = self.config.resolve(&self.config.notification.open_url)?;
    self.platform.open_window(url.as_str())?;
    info!(url = %url, "opened client window");

    Ok(Some(url.to_string()))
  }
}
