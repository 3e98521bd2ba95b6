//! Audit and notification fan-out shared by the lifecycle engines.

use crate::error::BankOpsError;
use crate::ledger::{AuditEntryKind, AuditRecord, AuditSink};
use crate::notify::{NotificationEvent, Notifier};
use crate::types::UserId;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Actor recorded for actions that carry no operator credential.
pub const SYSTEM_ACTOR: &str = "bankops";

/// Notification emitted once a transition has committed.
pub(crate) struct Notice<'a> {
    pub user_id: &'a UserId,
    pub event: NotificationEvent,
    pub payload: Value,
}

/// Runs after the datastore has accepted (or refused) a transition.
///
/// Nothing here can fail the action: audit and notification errors are logged
/// and dropped.
#[derive(Clone)]
pub(crate) struct SideEffects {
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl SideEffects {
    pub fn new(audit: Arc<dyn AuditSink>, notifier: Arc<dyn Notifier>) -> Self {
        Self { audit, notifier }
    }

    pub async fn committed<B: Serialize, A: Serialize>(
        &self,
        actor_id: &str,
        action: &str,
        subject_id: &str,
        before: &B,
        after: &A,
        notice: Option<Notice<'_>>,
    ) {
        match AuditRecord::new(actor_id, action, subject_id).with_states(before, after) {
            Ok(record) => {
                if let Err(err) = self.audit.record(AuditEntryKind::Transition, record).await {
                    warn!(subject_id, action, error = %err, "audit append failed after commit");
                }
            }
            Err(err) => warn!(subject_id, action, error = %err, "audit state encoding failed"),
        }

        if let Some(notice) = notice {
            if let Err(err) = self
                .notifier
                .notify(notice.user_id, notice.event, notice.payload)
                .await
            {
                warn!(
                    subject_id,
                    event = notice.event.as_str(),
                    error = %err,
                    "user notification failed after commit"
                );
            }
        }
    }

    pub async fn refused(
        &self,
        actor_id: &str,
        action: &str,
        subject_id: &str,
        err: &BankOpsError,
    ) {
        warn!(subject_id, action, kind = err.kind().as_str(), error = %err, "action refused");

        let mut record = AuditRecord::new(actor_id, action, subject_id);
        record.after = serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        });
        if let Err(audit_err) = self.audit.record(AuditEntryKind::Refusal, record).await {
            warn!(subject_id, action, error = %audit_err, "audit append failed for refusal");
        }
    }
}
