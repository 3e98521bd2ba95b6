use crate::error::BankOpsError;
use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    LoanApproved,
    LoanRejected,
    LoanDisbursed,
    LoanPaymentRecorded,
    LoanClosed,
    AccountActivated,
    AccountSuspended,
    AccountClosed,
    AccountRejected,
}

impl NotificationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoanApproved => "loan_approved",
            Self::LoanRejected => "loan_rejected",
            Self::LoanDisbursed => "loan_disbursed",
            Self::LoanPaymentRecorded => "loan_payment_recorded",
            Self::LoanClosed => "loan_closed",
            Self::AccountActivated => "account_activated",
            Self::AccountSuspended => "account_suspended",
            Self::AccountClosed => "account_closed",
            Self::AccountRejected => "account_rejected",
        }
    }
}

/// Outbound `notifyUser(userId, event, payload)`.
///
/// Called only after a transition has committed. A delivery failure is
/// reported to the caller's log and never undoes the transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &UserId,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), BankOpsError>;
}

/// Emits each notification as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), BankOpsError> {
        info!(user_id = %user_id, event = event.as_str(), %payload, "user notification");
        Ok(())
    }
}

/// Notification held in an [`OutboxNotifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub user_id: UserId,
    pub event: NotificationEvent,
    pub payload: Value,
    pub queued_at: DateTime<Utc>,
}

/// Keeps notifications in memory for a delivery worker, or a test, to drain.
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    outbox: Mutex<Vec<OutboundNotification>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<OutboundNotification> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<OutboundNotification> {
        self.outbox
            .lock()
            .map(|mut outbox| std::mem::take(&mut *outbox))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), BankOpsError> {
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| BankOpsError::Storage("notification outbox lock poisoned".to_string()))?;
        outbox.push(OutboundNotification {
            user_id: user_id.clone(),
            event,
            payload,
            queued_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbox_collects_and_drains() {
        let outbox = OutboxNotifier::new();
        outbox
            .notify(
                &UserId::new("user-1"),
                NotificationEvent::LoanApproved,
                serde_json::json!({"loan_id": "loan-1"}),
            )
            .await
            .unwrap();

        assert_eq!(outbox.pending().len(), 1);
        let drained = outbox.drain();
        assert_eq!(drained[0].event, NotificationEvent::LoanApproved);
        assert!(outbox.pending().is_empty());
    }

    #[tokio::test]
    async fn tracing_notifier_never_fails() {
        let notifier = TracingNotifier;
        assert!(notifier
            .notify(
                &UserId::new("user-1"),
                NotificationEvent::AccountActivated,
                Value::Null,
            )
            .await
            .is_ok());
    }
}
