use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::state::AppState;

/// Cached response for one guarded mutating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub token: String,
    pub user_id: Uuid,
    pub endpoint: &'static str,
    pub response: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

fn response_ttl() -> Duration {
    Duration::hours(24)
}

/// Runs `op` at most once per token: a fresh cached response is returned
/// verbatim, otherwise the operation executes and its successful response
/// is stored for 24 hours. A missing token is synthesized from
/// (caller, endpoint, timestamp), which degrades to no replay protection.
pub async fn guarded<T, F, Fut>(
    state: &AppState,
    token: Option<&str>,
    user_id: Uuid,
    endpoint: &'static str,
    op: F,
) -> Result<T, DispatchError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let token = match token {
        Some(token) => token.to_string(),
        None => {
            debug!(endpoint, user_id = %user_id, "missing idempotency token, synthesizing one");
            format!(
                "{user_id}:{endpoint}:{}",
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            )
        }
    };

    if let Some(record) = state.idempotency.get(&token) {
        if record.expires_at > Utc::now() {
            let cached = record.response.clone();
            drop(record);
            return serde_json::from_value(cached)
                .map_err(|err| DispatchError::Internal(format!("corrupt cached response: {err}")));
        }
        drop(record);
        state.idempotency.remove(&token);
    }

    let result = op().await?;

    let response = serde_json::to_value(&result)
        .map_err(|err| DispatchError::Internal(format!("failed to cache response: {err}")))?;
    state.idempotency.insert(
        token.clone(),
        IdempotencyRecord {
            token,
            user_id,
            endpoint,
            response,
            expires_at: Utc::now() + response_ttl(),
        },
    );

    Ok(result)
}

/// Drops expired records; driven by the sweeper.
pub fn purge_expired(state: &AppState) -> usize {
    let now = Utc::now();
    let before = state.idempotency.len();
    state.idempotency.retain(|_, record| record.expires_at > now);
    before - state.idempotency.len()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{guarded, purge_expired};
    use crate::error::DispatchError;
    use crate::state::AppState;

    #[tokio::test]
    async fn replay_returns_cached_response_without_reexecuting() {
        let state = AppState::new(16);
        let user = Uuid::new_v4();

        let first: u32 = guarded(&state, Some("tok-1"), user, "accept", || async { Ok(1) })
            .await
            .unwrap();
        let second: u32 = guarded(&state, Some("tok-1"), user, "accept", || async {
            Err(DispatchError::Internal("must not run".to_string()))
        })
        .await
        .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn failed_operations_are_not_cached() {
        let state = AppState::new(16);
        let user = Uuid::new_v4();

        let first: Result<u32, _> = guarded(&state, Some("tok-2"), user, "accept", || async {
            Err(DispatchError::AlreadyAccepted)
        })
        .await;
        assert!(first.is_err());

        let second: u32 = guarded(&state, Some("tok-2"), user, "accept", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn missing_token_runs_every_time() {
        let state = AppState::new(16);
        let user = Uuid::new_v4();

        let first: u32 = guarded(&state, None, user, "cancel", || async { Ok(1) })
            .await
            .unwrap();
        let second: u32 = guarded(&state, None, user, "cancel", || async { Ok(2) })
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_records() {
        let state = AppState::new(16);
        let user = Uuid::new_v4();

        let _: u32 = guarded(&state, Some("fresh"), user, "rate", || async { Ok(1) })
            .await
            .unwrap();
        let _: u32 = guarded(&state, Some("stale"), user, "rate", || async { Ok(2) })
            .await
            .unwrap();
        state.idempotency.get_mut("stale").unwrap().expires_at = Utc::now() - Duration::hours(1);

        assert_eq!(purge_expired(&state), 1);
        assert!(state.idempotency.contains_key("fresh"));
        assert!(!state.idempotency.contains_key("stale"));
    }
}
