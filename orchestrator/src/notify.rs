//! Outbound notification seam
//!
//! Delivery through email/SMS providers lives outside the orchestrator. Tools
//! and the guardrail engine hand a [`Notification`] to a [`Notifier`] and
//! treat delivery failure as a reportable result, never a run failure.

use async_trait::async_trait;
use serde::Serialize;
use shared_types::{Channel, RecipientKind};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedNotifier = Arc<dyn Notifier>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub organization_id: String,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
    pub channel: Channel,
    /// Email address or phone number; `None` for portal delivery
    pub address: Option<String>,
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no {channel} address for {recipient_id}")]
    MissingAddress { recipient_id: String, channel: String },
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            org_id = %notification.organization_id,
            recipient_id = %notification.recipient_id,
            channel = notification.channel.as_str(),
            subject = notification.subject.as_deref().unwrap_or(""),
            "Notification queued"
        );
        Ok(())
    }
}

/// Keeps every notification in memory. Optionally fails for one recipient.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail_for: Option<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(recipient_id: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: Some(recipient_id.into()),
        }
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, recipient_id: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.fail_for.as_deref() == Some(notification.recipient_id.as_str()) {
            return Err(NotifyError::Delivery(format!(
                "recipient {} rejected",
                notification.recipient_id
            )));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Address for `channel` given a recipient's contact fields.
pub fn resolve_address(
    recipient_id: &str,
    channel: Channel,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<Option<String>, NotifyError> {
    let address = match channel {
        Channel::Email => email,
        Channel::Sms => phone,
        Channel::Portal => return Ok(None),
    };
    address
        .filter(|a| !a.trim().is_empty())
        .map(|a| Some(a.to_string()))
        .ok_or_else(|| NotifyError::MissingAddress {
            recipient_id: recipient_id.to_string(),
            channel: channel.as_str().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(recipient: &str) -> Notification {
        Notification {
            organization_id: "org-1".to_string(),
            recipient_kind: RecipientKind::Vendor,
            recipient_id: recipient.to_string(),
            channel: Channel::Email,
            address: Some("ops@example.com".to_string()),
            subject: None,
            body: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_messages() {
        let notifier = RecordingNotifier::new();
        notifier.send(&notification("v-1")).await.unwrap();
        notifier.send(&notification("v-2")).await.unwrap();
        assert_eq!(notifier.sent().await.len(), 2);
        assert_eq!(notifier.sent_to("v-2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_recording_notifier_failure() {
        let notifier = RecordingNotifier::failing_for("v-1");
        let err = notifier.send(&notification("v-1")).await.unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
        assert!(notifier.sent().await.is_empty());
    }

    #[test]
    fn test_resolve_address_by_channel() {
        assert_eq!(
            resolve_address("t-1", Channel::Sms, None, Some("+15550100")).unwrap(),
            Some("+15550100".to_string())
        );
        assert_eq!(resolve_address("t-1", Channel::Portal, None, None).unwrap(), None);
        assert!(matches!(
            resolve_address("t-1", Channel::Email, Some(" "), None),
            Err(NotifyError::MissingAddress { .. })
        ));
    }
}
