use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::NotifyError;

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Serialize)]
struct PushNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    notification: PushNotification<'a>,
}

/// Firebase Cloud Messaging sender using a server key.
pub struct FcmPushClient {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmPushClient {
    pub fn new(
        endpoint: impl Into<String>,
        server_key: String,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Push(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            server_key,
        })
    }

    pub async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        let message = PushMessage {
            to: token,
            notification: PushNotification { title, body },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Push(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Push(format!("FCM returned {status}: {body}")));
        }

        info!(title, "push notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_notification_with_server_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fcm/send"))
            .and(header("Authorization", "key=secret"))
            .and(body_partial_json(serde_json::json!({
                "to": "device-token",
                "notification": { "title": "Power Limit Exceeded" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = FcmPushClient::new(
            format!("{}/fcm/send", server.uri()),
            "secret".into(),
            Duration::from_secs(2),
        )
        .unwrap();
        client
            .send("device-token", "Power Limit Exceeded", "650 W is above your 500 W limit")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_push_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let client =
            FcmPushClient::new(server.uri(), "wrong".into(), Duration::from_secs(2)).unwrap();
        let err = client.send("t", "title", "body").await.unwrap_err();
        assert!(matches!(err, NotifyError::Push(msg) if msg.contains("401")));
    }
}
