//! Bounded retry for the offline batch tools.
//!
//! Interactive operations never retry. The batch migration wraps each store call in a
//! [`RetryPolicy`]: rate-limit (429) and server (5xx) responses and transport failures are
//! retried, every other error is returned at once.

use crate::{ConsoleError, ConsoleResult};
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff grows by this much per attempt.
    pub step: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            step: Duration::from_secs(2),
            cap: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the next attempt. A positive `Retry-After` wins over the backoff.
    pub fn delay(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.step.saturating_mul(attempt).min(self.cap),
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// # Errors
    ///
    /// The first non-retryable error, or the last retryable one once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> ConsoleResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConsoleResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !is_retryable(&err) || attempt >= attempts {
                return Err(err);
            }
            let wait = self.delay(attempt, retry_after(&err));
            tracing::warn!(what, attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// 429, 5xx and transport failures are worth another attempt.
pub fn is_retryable(err: &ConsoleError) -> bool {
    match err {
        ConsoleError::Request { status, .. } => *status == 429 || *status >= 500,
        ConsoleError::Transport(_) => true,
        _ => false,
    }
}

fn retry_after(err: &ConsoleError) -> Option<u64> {
    match err {
        ConsoleError::Request { retry_after, .. } => *retry_after,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::rest::tests::{serve, settings};
    use crate::store::rest::{HttpClient, RestStore};
    use crate::store::{EntityStore, Patch};
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::put;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 7,
            step: Duration::from_millis(1),
            cap: Duration::from_millis(5),
        }
    }

    fn request_error(status: u16) -> ConsoleError {
        ConsoleError::Request {
            status,
            message: format!("HTTP {status}"),
            body: Value::Null,
            retry_after: None,
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1, None), Duration::from_secs(2));
        assert_eq!(policy.delay(3, None), Duration::from_secs(6));
        assert_eq!(policy.delay(7, None), Duration::from_secs(15));
        assert_eq!(policy.delay(1, Some(9)), Duration::from_secs(9));
        assert_eq!(policy.delay(2, Some(0)), Duration::from_secs(4));
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&request_error(429)));
        assert!(is_retryable(&request_error(503)));
        assert!(!is_retryable(&request_error(400)));
        assert!(!is_retryable(&ConsoleError::NotFound {
            entity: "Vitamin".into(),
            id: "x".into()
        }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ConsoleResult<()> = fast()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(request_error(422)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: ConsoleResult<()> = fast()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(request_error(500)) }
            })
            .await;
        assert_eq!(result.unwrap_err().status(), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    async fn flaky_update(State(calls): State<Arc<AtomicU32>>) -> impl IntoResponse {
        match calls.fetch_add(1, Ordering::SeqCst) {
            0 => (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", "0")],
                Json(json!({ "message": "slow down" })),
            )
                .into_response(),
            1 => (StatusCode::BAD_GATEWAY, "upstream").into_response(),
            _ => Json(json!({ "id": "v1", "labTestDeficiencyDetails": "x" })).into_response(),
        }
    }

    #[tokio::test]
    async fn rest_update_recovers_from_throttling() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = serve(
            Router::new()
                .route("/api/apps/app_1/entities/Vitamin/v1", put(flaky_update))
                .with_state(calls.clone()),
        )
        .await;
        let store = RestStore::new(HttpClient::new(settings(base)).unwrap());

        let doc = fast()
            .run("update", || {
                store.update("Vitamin", "v1", Patch::new().set("labTestDeficiencyDetails", "x"))
            })
            .await
            .unwrap();
        assert_eq!(doc["id"], "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
