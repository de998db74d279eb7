//! Webhook notification of the run outcome.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::config::NotifySettings;

pub const DEFAULT_CLUSTER_NAME: &str = "default";

const USERNAME: &str = "kube-dump";
const ICON_URL: &str = "https://raw.githubusercontent.com/kubernetes/community/master/icons/png/resources/labeled/ns-128.png";
const SUCCESS_COLOR: &str = "#36a64f";
const FAILURE_COLOR: &str = "#dc3545";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
	#[error("building HTTP client")]
	Client(#[source] reqwest::Error),

	#[error("sending notification")]
	Send(#[source] reqwest::Error),

	#[error("webhook answered {status}: {body}")]
	Status {
		status: reqwest::StatusCode,
		body: String,
	},
}

/// Final state reported to the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Success,
	Failed,
}

impl Outcome {
	pub fn from_success(success: bool) -> Self {
		if success {
			Self::Success
		} else {
			Self::Failed
		}
	}

	fn word(self) -> &'static str {
		match self {
			Self::Success => "success",
			Self::Failed => "failed",
		}
	}

	fn color(self) -> &'static str {
		match self {
			Self::Success => SUCCESS_COLOR,
			Self::Failed => FAILURE_COLOR,
		}
	}
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Payload {
	pub channel: String,
	pub username: &'static str,
	pub icon_url: &'static str,
	pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Attachment {
	pub color: &'static str,
	pub text: String,
}

pub fn payload(channel: &str, cluster_name: &str, outcome: Outcome) -> Payload {
	Payload {
		channel: channel.to_string(),
		username: USERNAME,
		icon_url: ICON_URL,
		attachments: vec![Attachment {
			color: outcome.color(),
			text: format!(
				"kube-dump backup of cluster {cluster_name} is {}",
				outcome.word()
			),
		}],
	}
}

/// Posts one message per run to a chat webhook.
#[derive(Debug, Clone)]
pub struct Notifier {
	client: reqwest::Client,
	url: String,
	channel: String,
	cluster_name: String,
}

impl Notifier {
	/// `None` unless both the webhook URL and the channel are set.
	pub fn from_settings(settings: &NotifySettings) -> Result<Option<Self>, NotifyError> {
		let (Some(url), Some(channel)) = (
			settings.webhook_url.as_deref().filter(|s| !s.is_empty()),
			settings.channel.as_deref().filter(|s| !s.is_empty()),
		) else {
			return Ok(None);
		};

		let client = reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(NotifyError::Client)?;
		let cluster_name = settings
			.cluster_name
			.as_deref()
			.filter(|s| !s.is_empty())
			.unwrap_or(DEFAULT_CLUSTER_NAME);

		Ok(Some(Self {
			client,
			url: url.to_string(),
			channel: channel.to_string(),
			cluster_name: cluster_name.to_string(),
		}))
	}

	#[instrument(skip(self))]
	pub async fn send(&self, outcome: Outcome) -> Result<(), NotifyError> {
		let body = payload(&self.channel, &self.cluster_name, outcome);
		let response = self
			.client
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(NotifyError::Send)?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(NotifyError::Status { status, body });
		}
		tracing::info!(outcome = outcome.word(), "notification sent");
		Ok(())
	}
}

/// Send the outcome if notifications are configured. Never fails the run.
pub async fn notify(settings: &NotifySettings, outcome: Outcome) {
	let notifier = match Notifier::from_settings(settings) {
		Ok(Some(notifier)) => notifier,
		Ok(None) => return,
		Err(e) => {
			tracing::warn!(error = %e, "cannot set up notifications");
			return;
		}
	};
	if let Err(e) = notifier.send(outcome).await {
		tracing::warn!(error = %e, "notification failed");
	}
}
