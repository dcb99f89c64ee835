//! Best-effort user notifications.

pub mod email;
pub mod push;
pub mod report;

pub use email::SmtpMailer;
pub use push::FcmPushClient;

use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("email delivery failed: {0}")]
    Email(String),
    #[error("push delivery failed: {0}")]
    Push(String),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotifyError>;

    async fn send_push(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Routes each channel to its configured transport. A channel without a
/// transport is skipped.
#[derive(Default)]
pub struct Dispatcher {
    email: Option<SmtpMailer>,
    push: Option<FcmPushClient>,
}

impl Dispatcher {
    pub fn new(email: Option<SmtpMailer>, push: Option<FcmPushClient>) -> Self {
        Self { email, push }
    }
}

#[async_trait::async_trait]
impl Notifier for Dispatcher {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotifyError> {
        match &self.email {
            Some(mailer) => mailer.send(recipient, subject, html_body).await,
            None => {
                debug!(recipient, "email transport not configured, skipping");
                Ok(())
            }
        }
    }

    async fn send_push(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        match &self.push {
            Some(client) => client.send(token, title, body).await,
            None => {
                debug!("push transport not configured, skipping");
                Ok(())
            }
        }
    }
}
