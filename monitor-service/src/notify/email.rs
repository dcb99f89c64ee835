use std::time::Duration;

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use super::NotifyError;

/// SMTP submission over STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: String,
        password: String,
        from: &str,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let from: Mailbox = from.parse().map_err(|e| {
            NotifyError::InvalidMessage(format!("invalid sender address '{from}': {e}"))
        })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Email(format!("invalid smtp relay '{host}': {e}")))?
            .port(port)
            .credentials(Credentials::new(username, password))
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport, from })
    }

    pub async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotifyError> {
        let to: Mailbox = recipient.parse().map_err(|e| {
            NotifyError::InvalidMessage(format!("invalid recipient '{recipient}': {e}"))
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotifyError::InvalidMessage(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Email(e.to_string()))?;

        info!(recipient, subject, "email sent");
        Ok(())
    }
}
