//! Webhook delivery against a local HTTP server.

use assert_matches::assert_matches;
use kube_dump::{
	config::NotifySettings,
	notify::{self, payload, NotifyError, Notifier, Outcome},
};
use wiremock::{
	matchers::{body_json, header, method, path},
	Mock, MockServer, ResponseTemplate,
};

fn settings(server: &MockServer, channel: &str) -> NotifySettings {
	NotifySettings {
		cluster_name: Some("prod".to_string()),
		webhook_url: Some(format!("{}/services/hook", server.uri())),
		channel: Some(channel.to_string()),
	}
}

#[tokio::test]
async fn test_posts_json_payload() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/services/hook"))
		.and(header("content-type", "application/json"))
		.and(body_json(payload("#ops", "prod", Outcome::Success)))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.expect(1)
		.mount(&server)
		.await;

	let notifier = Notifier::from_settings(&settings(&server, "#ops"))
		.unwrap()
		.expect("notifier should be configured");
	notifier.send(Outcome::Success).await.unwrap();
}

#[tokio::test]
async fn test_error_status_is_reported() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
		.expect(1)
		.mount(&server)
		.await;

	let notifier = Notifier::from_settings(&settings(&server, "#ops"))
		.unwrap()
		.unwrap();
	let result = notifier.send(Outcome::Failed).await;
	assert_matches!(
		result,
		Err(NotifyError::Status { status, body }) if status == 404 && body == "no_service"
	);
}

#[tokio::test]
async fn test_delivery_failure_is_swallowed() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(500))
		.expect(1)
		.mount(&server)
		.await;

	notify::notify(&settings(&server, "#ops"), Outcome::Failed).await;
}

#[tokio::test]
async fn test_empty_channel_sends_nothing() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	notify::notify(&settings(&server, ""), Outcome::Success).await;
}
