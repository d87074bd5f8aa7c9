//! Bounded retry with exponential backoff for model calls.
//!
//! Transient failures ([`LlmError::is_retryable`]) are retried up to
//! `max_attempts` times with a doubling delay and ±25% jitter. Once retries
//! are exhausted (or on a permanent error) one attempt is made against the
//! alternate model, if configured.

use std::{future::Future, time::Duration};

use rand::Rng;

use verity_core::{
    error::LlmError,
    ports::{EventSink, LlmPort},
    types::{AgentEvent, LlmRequest, LlmResponse, LlmStream, TurnPolicy},
};

const MAX_RETRY_DELAY_MS: u64 = 30_000;
const MIN_RETRY_DELAY_MS: u64 = 50;

/// Attempt budget and backoff shape for one model call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts against the primary model, first attempt included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub fallback_model: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 500, fallback_model: None }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_turn_policy(policy: &TurnPolicy, fallback_model: Option<String>) -> Self {
        Self {
            max_attempts: policy.llm_max_attempts.max(1),
            base_delay_ms: policy.llm_retry_base_ms,
            fallback_model,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay_ms.saturating_mul(1u64 << exp).min(MAX_RETRY_DELAY_MS);
        Duration::from_millis(apply_jitter(base))
    }

    /// Run `call` with retries. `call` receives the model name to use.
    pub async fn run<T, F, Fut>(
        &self,
        model: &str,
        events: &dyn EventSink,
        mut call: F,
    ) -> Result<T, LlmError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 1;
        let err = loop {
            match call(model.to_string()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "model call failed, retrying");
                    events.emit(AgentEvent::LlmCallRetried { attempt, error: err.to_string() });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => break err,
            }
        };

        match self.fallback_model.as_deref() {
            Some(fallback) if fallback != model => {
                tracing::warn!(%err, model, fallback, "switching to alternate model");
                events.emit(AgentEvent::LlmCallStarted { model: fallback.to_string() });
                call(fallback.to_string()).await
            }
            _ => Err(err),
        }
    }
}

/// `LlmPort::complete` under a [`RetryPolicy`].
pub async fn complete_with_retry(
    llm: &dyn LlmPort,
    req: LlmRequest,
    retry: &RetryPolicy,
    events: &dyn EventSink,
) -> Result<LlmResponse, LlmError> {
    let model = req.model.clone();
    retry
        .run(&model, events, |model| {
            let req = LlmRequest { model, ..req.clone() };
            async move { llm.complete(req).await }
        })
        .await
}

/// Opens a stream under a [`RetryPolicy`]. Failures after the first chunk
/// are not retried.
pub async fn stream_with_retry(
    llm: &dyn LlmPort,
    req: LlmRequest,
    retry: &RetryPolicy,
    events: &dyn EventSink,
) -> Result<LlmStream, LlmError> {
    let model = req.model.clone();
    retry
        .run(&model, events, |model| {
            let req = LlmRequest { model, ..req.clone() };
            async move { llm.complete_stream(req).await }
        })
        .await
}

fn apply_jitter(base_ms: u64) -> u64 {
    let range = (base_ms / 4) as i64;
    if range == 0 {
        return base_ms.max(MIN_RETRY_DELAY_MS);
    }
    let offset = rand::thread_rng().gen_range(-range..=range);
    (base_ms as i64 + offset).max(MIN_RETRY_DELAY_MS as i64) as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test_support::CollectingSink;

    #[test]
    fn backoff_doubles_and_stays_within_jitter() {
        let policy = RetryPolicy { base_delay_ms: 1_000, ..RetryPolicy::default() };
        for (attempt, base) in [(1, 1_000u64), (2, 2_000), (3, 4_000)] {
            let ms = policy.backoff(attempt).as_millis() as u64;
            assert!(ms >= base * 3 / 4 && ms <= base * 5 / 4, "attempt {attempt}: {ms}");
        }
        assert!(policy.backoff(30).as_millis() as u64 <= MAX_RETRY_DELAY_MS * 5 / 4);
    }

    #[test]
    fn jitter_spreads_delays_within_a_quarter() {
        let delays: std::collections::HashSet<u64> = (0..64).map(|_| apply_jitter(4_000)).collect();
        assert!(delays.iter().all(|ms| (3_000..=5_000).contains(ms)));
        assert!(delays.len() > 1, "jitter produced a single value: {delays:?}");
        assert_eq!(apply_jitter(2), MIN_RETRY_DELAY_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let policy = RetryPolicy { max_attempts: 3, base_delay_ms: 100, fallback_model: None };
        let sink = CollectingSink::default();
        let calls = Mutex::new(0u32);

        let result = policy
            .run("primary", &sink, |_model| {
                let mut n = calls.lock().unwrap();
                *n += 1;
                let attempt = *n;
                async move {
                    if attempt < 3 { Err(LlmError::transient("503")) } else { Ok(attempt) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(sink.count(|e| matches!(e, AgentEvent::LlmCallRetried { .. })), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let sink = CollectingSink::default();
        let calls = Mutex::new(0u32);

        let result: Result<(), _> = policy
            .run("primary", &sink, |_model| {
                *calls.lock().unwrap() += 1;
                async { Err(LlmError::permanent("bad key")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_switch_to_fallback_model() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            fallback_model: Some("backup".into()),
        };
        let sink = CollectingSink::default();
        let models = Mutex::new(Vec::new());

        let result = policy
            .run("primary", &sink, |model| {
                models.lock().unwrap().push(model.clone());
                async move {
                    if model == "backup" { Ok("ok") } else { Err(LlmError::RateLimited) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(*models.lock().unwrap(), vec!["primary", "primary", "backup"]);
    }
}
