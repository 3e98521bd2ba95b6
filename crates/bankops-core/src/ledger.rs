use crate::error::BankOpsError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Audit entry types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryKind {
    /// A committed state transition.
    Transition,
    /// An attempted action that failed a precondition.
    Refusal,
}

impl AuditEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transition => "transition",
            Self::Refusal => "refusal",
        }
    }
}

/// Who did what, with the row before and after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor_id: String,
    pub action: String,
    pub subject_id: String,
    pub before: Value,
    pub after: Value,
}

impl AuditRecord {
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            subject_id: subject_id.into(),
            before: Value::Null,
            after: Value::Null,
        }
    }

    pub fn with_states<B: Serialize, A: Serialize>(
        mut self,
        before: &B,
        after: &A,
    ) -> Result<Self, BankOpsError> {
        self.before =
            serde_json::to_value(before).map_err(|e| BankOpsError::Serialization(e.to_string()))?;
        self.after =
            serde_json::to_value(after).map_err(|e| BankOpsError::Serialization(e.to_string()))?;
        Ok(self)
    }
}

/// Hash-chained audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub index: u64,
    pub kind: AuditEntryKind,
    pub timestamp: DateTime<Utc>,
    pub record: AuditRecord,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only audit log with hash-chain proofs.
///
/// No in-place mutation is exposed: every transition, and every refusal, adds
/// a new entry chained to the previous one.
#[derive(Debug, Default, Clone)]
pub struct AppendOnlyLedger {
    entries: Vec<AuditEntry>,
}

impl AppendOnlyLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn entries_for(&self, subject_id: &str) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.record.subject_id == subject_id)
            .cloned()
            .collect()
    }

    pub fn append(
        &mut self,
        kind: AuditEntryKind,
        record: AuditRecord,
    ) -> Result<AuditEntry, BankOpsError> {
        let index = self.entries.len() as u64;
        let timestamp = Utc::now();
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let entry_hash =
            compute_entry_hash(index, kind, timestamp, &record, previous_hash.as_deref())?;

        let entry = AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            index,
            kind,
            timestamp,
            record,
            previous_hash,
            entry_hash,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.index != position as u64 || entry.previous_hash != previous_hash {
                return false;
            }
            let expected = compute_entry_hash(
                entry.index,
                entry.kind,
                entry.timestamp,
                &entry.record,
                previous_hash.as_deref(),
            );
            match expected {
                Ok(hash) if hash == entry.entry_hash => {}
                _ => return false,
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }
}

fn compute_entry_hash(
    index: u64,
    kind: AuditEntryKind,
    timestamp: DateTime<Utc>,
    record: &AuditRecord,
    previous_hash: Option<&str>,
) -> Result<String, BankOpsError> {
    let material = serde_json::json!({
        "index": index,
        "kind": kind,
        "timestamp": timestamp,
        "record": record,
        "previous_hash": previous_hash,
    });

    let bytes = serde_json::to_vec(&material)
        .map_err(|e| BankOpsError::Serialization(format!("failed to encode audit entry: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Outbound `auditLog(actorId, action, beforeState, afterState)`.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        kind: AuditEntryKind,
        record: AuditRecord,
    ) -> Result<AuditEntry, BankOpsError>;
}

/// Audit sink backed by an in-process [`AppendOnlyLedger`].
///
/// The chain lives only as long as the process and grows with every entry,
/// whatever the storage backend. It starts empty on every restart.
#[derive(Debug, Default)]
pub struct LedgerAuditSink {
    ledger: Mutex<AppendOnlyLedger>,
}

impl LedgerAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.ledger.lock().await.entries().to_vec()
    }

    pub async fn entries_for(&self, subject_id: &str) -> Vec<AuditEntry> {
        self.ledger.lock().await.entries_for(subject_id)
    }

    pub async fn verify_chain(&self) -> bool {
        self.ledger.lock().await.verify_chain()
    }
}

#[async_trait]
impl AuditSink for LedgerAuditSink {
    async fn record(
        &self,
        kind: AuditEntryKind,
        record: AuditRecord,
    ) -> Result<AuditEntry, BankOpsError> {
        self.ledger.lock().await.append(kind, record)
    }
}
