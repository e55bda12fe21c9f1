//! Notification port and adapters.
//!
//! The workflow hands fully-prepared messages to a [`Notifier`]; adapters
//! only transport them. Production delivers through an SMTP relay via
//! `lettre`, built from explicit configuration and injected at wiring time.
//! Tests use the in-memory mock with per-address failure injection.

use async_trait::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, Address, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A prepared notification addressed to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Recipient display name.
    pub to_name: String,

    /// Recipient address.
    pub to_email: String,

    /// Prepared subject line.
    pub subject: String,

    /// Prepared plain-text body.
    pub body: String,
}

/// Aggregated result of a notification fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationOutcome {
    /// Number of notifications attempted.
    pub total: usize,

    /// Number accepted by the transport.
    pub succeeded: usize,

    /// Number the transport rejected or failed to send.
    pub failed: usize,
}

/// Errors surfaced by notification adapters.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// Recipient or sender address failed parsing.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Transport-level send failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Outbound notification transport.
///
/// Implementations carry prepared subject and body untouched. Fan-out
/// callers treat failures as data and never abort the surrounding
/// operation because one recipient could not be reached.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Sends one prepared notification.
    ///
    /// # Errors
    ///
    /// Returns error if the recipient address is unusable or the transport
    /// rejects the message.
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotifyError>;
}

/// SMTP relay configuration for the production notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host name.
    pub host: String,

    /// Relay port.
    pub port: u16,

    /// Login user.
    pub username: String,

    /// Login password.
    pub password: String,

    /// Sender mailbox, e.g. `"Presenza <noreply@example.org>"`.
    pub from: String,
}

/// Notifier delivering through an SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Builds the notifier from explicit configuration.
    ///
    /// Construction only validates the configuration; no connection is made
    /// until the first send.
    ///
    /// # Errors
    ///
    /// Returns error if the relay host or sender mailbox is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidAddress(e.to_string()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .build();

        Ok(Self { transport, from })
    }
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier").field("from", &self.from).finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        let address = request
            .to_email
            .parse::<Address>()
            .map_err(|e| NotifyError::InvalidAddress(e.to_string()))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(Some(request.to_name.clone()), address))
            .subject(request.subject.clone())
            .body(request.body.clone())
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        self.transport.send(message).await.map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(())
    }
}

/// Notifier that accepts every message without sending anything.
///
/// Used for deployments running without an SMTP relay and for wiring where
/// dispatch is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        tracing::debug!(to = %request.to_email, subject = %request.subject, "notification discarded");
        Ok(())
    }
}

pub mod mock {
    //! In-memory notifier for tests.
    //!
    //! Records accepted notifications for verification and fails the
    //! addresses a test marks as unreachable.

    use std::{collections::HashSet, sync::Arc};

    use async_trait::async_trait;
    use tokio::sync::RwLock;

    use super::{NotificationRequest, Notifier, NotifyError};

    /// Mock transport with per-address failure injection.
    #[derive(Debug, Default)]
    pub struct MockNotifier {
        sent: Arc<RwLock<Vec<NotificationRequest>>>,
        failing: Arc<RwLock<HashSet<String>>>,
        fail_all: Arc<RwLock<bool>>,
    }

    impl MockNotifier {
        /// Creates a mock that accepts everything.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes sends to `email` fail from now on.
        pub async fn fail_for(&self, email: impl Into<String>) {
            self.failing.write().await.insert(email.into());
        }

        /// Makes every send fail from now on.
        pub async fn fail_all(&self) {
            *self.fail_all.write().await = true;
        }

        /// Notifications accepted so far, in send order.
        pub async fn sent(&self) -> Vec<NotificationRequest> {
            self.sent.read().await.clone()
        }

        /// Number of notifications accepted so far.
        pub async fn sent_count(&self) -> usize {
            self.sent.read().await.len()
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
            let rejected =
                *self.fail_all.read().await || self.failing.read().await.contains(&request.to_email);
            if rejected {
                return Err(NotifyError::Transport(format!(
                    "injected failure for {}",
                    request.to_email
                )));
            }
            self.sent.write().await.push(request.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MockNotifier, *};

    fn notification(email: &str) -> NotificationRequest {
        NotificationRequest {
            to_name: "Ada Lovelace".to_string(),
            to_email: email.to_string(),
            subject: "Attendance signature needed".to_string(),
            body: "Please sign.".to_string(),
        }
    }

    #[tokio::test]
    async fn mock_records_accepted_sends() {
        let notifier = MockNotifier::new();
        notifier.send(&notification("ada@example.org")).await.unwrap();
        notifier.send(&notification("grace@example.org")).await.unwrap();

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to_email, "ada@example.org");
    }

    #[tokio::test]
    async fn mock_fails_only_marked_addresses() {
        let notifier = MockNotifier::new();
        notifier.fail_for("down@example.org").await;

        assert!(notifier.send(&notification("down@example.org")).await.is_err());
        assert!(notifier.send(&notification("up@example.org")).await.is_ok());
        assert_eq!(notifier.sent_count().await, 1);
    }

    #[test]
    fn smtp_notifier_rejects_invalid_sender() {
        let config = SmtpConfig {
            host: "smtp.example.org".to_string(),
            port: 587,
            username: "mailer".to_string(),
            password: "secret".to_string(),
            from: "not an address".to_string(),
        };
        assert!(matches!(SmtpNotifier::new(&config), Err(NotifyError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn smtp_notifier_builds_without_connecting() {
        let config = SmtpConfig {
            host: "smtp.example.org".to_string(),
            port: 587,
            username: "mailer".to_string(),
            password: "secret".to_string(),
            from: "Presenza <noreply@example.org>".to_string(),
        };
        let notifier = SmtpNotifier::new(&config).unwrap();
        assert!(format!("{notifier:?}").contains("SmtpNotifier"));
    }
}
