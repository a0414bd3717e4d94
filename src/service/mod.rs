mod requests;
mod workers;

pub use requests::{CreateRequestParams, EstimateParams, PartyRole};
pub use workers::RegisterWorkerParams;

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::TimeoutPolicy;
use crate::geo::RoutePlanner;
use crate::models::request::RequestKind;
use crate::notify::Notifier;
use crate::state::AppState;
use crate::wallet::PaymentLedger;

/// The operation surface the transport layer wraps. Holds the store plus
/// the collaborator boundaries; every mutating operation goes through the
/// claim primitives on [`AppState`].
pub struct DispatchService {
    pub state: Arc<AppState>,
    pub(crate) planner: Arc<dyn RoutePlanner>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) ledger: Arc<dyn PaymentLedger>,
    pub(crate) audit: Arc<dyn AuditLog>,
    pub(crate) timeouts: TimeoutPolicy,
}

impl DispatchService {
    pub fn new(
        state: Arc<AppState>,
        planner: Arc<dyn RoutePlanner>,
        notifier: Arc<dyn Notifier>,
        ledger: Arc<dyn PaymentLedger>,
        audit: Arc<dyn AuditLog>,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            state,
            planner,
            notifier,
            ledger,
            audit,
            timeouts,
        }
    }

    pub(crate) fn record_outcome(&self, operation: &'static str, outcome: &'static str) {
        self.state
            .metrics
            .transitions_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Best-effort push to one user; failures are logged by the notifier
    /// call site and never reach the caller.
    pub(crate) fn notify_quietly(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) {
        if let Err(err) = self.notifier.notify(user_id, title, body, metadata) {
            tracing::warn!(user_id = %user_id, error = %err, "notification failed");
        }
    }
}

pub(crate) fn request_code(kind: RequestKind) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", kind.code_prefix(), id[..8].to_uppercase())
}
