use tracing::info;
use uuid::Uuid;

use crate::error::DispatchError;

/// Push/SMS delivery collaborator. Best effort: call sites log failures and
/// carry on, a notification error never fails the triggering operation.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> Result<(), DispatchError>;
}

/// Default transport: structured log lines, for environments without a
/// real push provider wired in.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> Result<(), DispatchError> {
        info!(user_id = %user_id, title, body, %metadata, "push notification");
        Ok(())
    }
}
