use tracing::info;
use uuid::Uuid;

/// Audit trail collaborator. Fire and forget: implementations swallow their
/// own failures.
pub trait AuditLog: Send + Sync {
    fn record(
        &self,
        actor_id: Option<Uuid>,
        action: &str,
        entity_type: &str,
        entity_id: Uuid,
        details: serde_json::Value,
    );
}

pub struct LogAudit;

impl AuditLog for LogAudit {
    fn record(
        &self,
        actor_id: Option<Uuid>,
        action: &str,
        entity_type: &str,
        entity_id: Uuid,
        details: serde_json::Value,
    ) {
        info!(
            target: "audit",
            actor_id = ?actor_id,
            action,
            entity_type,
            entity_id = %entity_id,
            %details,
            "audit record"
        );
    }
}
