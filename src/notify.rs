//! Outbound notifications, e.g. telling a client their booking was decided.
//!
//! Delivery sits behind [`Notifier`]. The server ships with
//! [`OutboxNotifier`], which records messages in memory and logs them; a
//! mail relay plugs in through the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Notification has no subject")]
    EmptySubject,

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// One plain-text message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub text: String,
}

/// Outcome of a booking review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingDecision {
    Approved,
    Rejected,
}

impl BookingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingDecision::Approved => "Approved",
            BookingDecision::Rejected => "Rejected",
        }
    }
}

impl Notification {
    /// Message sent to a client when the studio approves or rejects a booking
    pub fn booking_decision(
        to: &str,
        name: &str,
        event_type: &str,
        event_date: &str,
        decision: BookingDecision,
    ) -> Self {
        let status = decision.as_str();
        Self {
            to: to.to_string(),
            subject: format!("Booking {}: {} on {}", status, event_type, event_date),
            text: format!(
                "Dear {},\n\nYour booking for {} on {} has been {}.\n\nBest regards,\nBhavani Digitals Team",
                name,
                event_type,
                event_date,
                status.to_lowercase()
            ),
        }
    }

    /// Reject messages no delivery backend could accept
    pub fn validate(&self) -> Result<(), NotifyError> {
        let to = self.to.trim();
        let well_formed = to
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !well_formed || to.contains(char::is_whitespace) {
            return Err(NotifyError::InvalidRecipient(self.to.clone()));
        }
        if self.subject.trim().is_empty() {
            return Err(NotifyError::EmptySubject);
        }
        Ok(())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Keeps every accepted notification in memory
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    sent: RwLock<Vec<Notification>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        notification.validate()?;
        info!(to = %notification.to, subject = %notification.subject, "Notification queued");
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}
