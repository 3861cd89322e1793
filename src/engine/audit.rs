// src/engine/audit.rs

use serde_json::json;

use crate::state::{AuditAction, AuditEntry, Task};
use crate::store::{StoreGateway, StoreResult, StoreTransaction};
use crate::types::TenantId;

/// Writes audit entries for one tenant.
///
/// Prefer [`AuditRecorder::record`] inside the transaction that performs the
/// state change so the entry commits (or rolls back) with it.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    tenant: TenantId,
}

impl AuditRecorder {
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub async fn record(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &str,
        action: AuditAction,
        payload: serde_json::Value,
    ) -> StoreResult<()> {
        tx.append_audit(AuditEntry::new(self.tenant.as_str(), actor, action, payload))
            .await
    }

    /// `task_status_changed` for a row that was just transitioned.
    pub async fn status_changed(
        &self,
        tx: &mut dyn StoreTransaction,
        actor: &str,
        task: &Task,
    ) -> StoreResult<()> {
        let payload = json!({
            "coordination_id": task.id,
            "workflow_id": task.workflow_id,
            "worker_id": task.worker_id,
            "status": task.status,
            "result": task.result,
            "error": task.error,
        });
        self.record(tx, actor, AuditAction::TaskStatusChanged, payload)
            .await
    }

    /// Record in a transaction of its own.
    pub async fn record_now(
        &self,
        store: &dyn StoreGateway,
        actor: &str,
        action: AuditAction,
        payload: serde_json::Value,
    ) -> StoreResult<()> {
        let mut tx = store.begin().await?;
        self.record(tx.as_mut(), actor, action, payload).await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AuditQuery, InMemoryStore};
    use crate::types::COORDINATOR_ACTOR;

    #[tokio::test]
    async fn record_now_commits_a_single_entry() {
        let store = InMemoryStore::new();
        let recorder = AuditRecorder::new("acme");

        recorder
            .record_now(
                &store,
                COORDINATOR_ACTOR,
                AuditAction::OperatorIntervention,
                json!({"reason": "manual"}),
            )
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let rows = tx
            .query_audit(&AuditQuery::for_tenant("acme").by_actor(COORDINATOR_ACTOR))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, AuditAction::OperatorIntervention);
        assert_eq!(rows[0].payload["reason"], "manual");
    }

    #[tokio::test]
    async fn entries_roll_back_with_their_transaction() {
        let store = InMemoryStore::new();
        let recorder = AuditRecorder::new("acme");

        let mut tx = store.begin().await.unwrap();
        recorder
            .record(tx.as_mut(), "w", AuditAction::WorkerStarted, json!({}))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        drop(tx);

        assert!(store.all_audit().await.is_empty());
    }
}
