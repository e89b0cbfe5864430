//! Timeout, cancellation and retry around one logical call.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::ClientError;
use crate::retry::{
    AttemptOutcome, JitterSource, ResponseMetadata, RetryDecision, RetryPolicy, StaticResponse,
    ThreadRngJitter,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Deadline for each attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Per-call overrides of [`ExecutorConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOverrides {
    pub timeout: Option<Duration>,
    /// Lowers the retry budget for this call. Never raises it above the
    /// configured maximum.
    pub max_retries: Option<u32>,
}

impl CallOverrides {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Retry bookkeeping for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub max_retries: u32,
    pub retries_remaining: u32,
    pub attempts: u32,
}

impl AttemptState {
    fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retries_remaining: max_retries,
            attempts: 0,
        }
    }

    /// Zero-based ordinal of the next retry, used for backoff.
    fn retry_number(&self) -> u32 {
        self.max_retries - self.retries_remaining
    }
}

/// Runs attempts under a per-attempt deadline and retries them per
/// [`RetryPolicy`].
#[derive(Clone)]
pub struct RequestExecutor {
    config: ExecutorConfig,
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl RequestExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            policy: RetryPolicy::default(),
            jitter: Arc::new(ThreadRngJitter),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn effective_timeout(&self, overrides: &CallOverrides) -> Duration {
        overrides.timeout.unwrap_or(self.config.timeout)
    }

    fn effective_max_retries(&self, overrides: &CallOverrides) -> u32 {
        overrides
            .max_retries
            .map_or(self.config.max_retries, |n| n.min(self.config.max_retries))
    }

    /// Runs `attempt` until the policy stops or the retry budget runs out.
    ///
    /// Each attempt receives a child of `cancel` that fires when the attempt
    /// is abandoned. Responses, transport failures and upstream errors go to
    /// the policy; an upstream error is judged by its status (or the status of
    /// its code). Timeouts, cancellation and malformed payloads end the call
    /// as is. When the budget is exhausted the last response or error is
    /// returned for the caller to classify.
    pub async fn execute<R, F, Fut>(
        &self,
        overrides: &CallOverrides,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<R, ClientError>
    where
        R: ResponseMetadata,
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<R, ClientError>>,
    {
        let call_id = Uuid::new_v4();
        let timeout = self.effective_timeout(overrides);
        let mut state = AttemptState::new(self.effective_max_retries(overrides));

        loop {
            state.attempts += 1;
            let result = run_attempt(timeout, cancel, &mut attempt).await;

            let decision = match &result {
                Ok(response) => self.policy.decide(&AttemptOutcome::Response(response)),
                Err(ClientError::Transport { .. }) => self.policy.decide(&AttemptOutcome::Transport),
                Err(err) if err.is_retryable_kind() => match upstream_status(err) {
                    Some(status) => self
                        .policy
                        .decide(&AttemptOutcome::Response(&StaticResponse::new(status))),
                    None => RetryDecision::Stop,
                },
                Err(err) => {
                    debug!(%call_id, attempts = state.attempts, error = %err, "call aborted");
                    return result;
                }
            };
            let RetryDecision::RetryAfter(suggested) = decision else {
                return result;
            };
            if state.retries_remaining == 0 {
                warn!(
                    %call_id,
                    attempts = state.attempts,
                    outcome = %describe(&result),
                    "retries exhausted"
                );
                return result;
            }

            let wait = if suggested.is_zero() {
                self.policy.backoff(state.retry_number(), self.jitter.as_ref())
            } else {
                suggested
            };
            debug!(
                %call_id,
                attempt = state.attempts,
                retries_remaining = state.retries_remaining,
                wait_ms = wait.as_millis() as u64,
                outcome = %describe(&result),
                "retrying request"
            );
            drop(result);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(%call_id, "call cancelled during retry wait");
                    return Err(ClientError::Cancelled);
                }
                () = tokio::time::sleep(wait) => {}
            }
            state.retries_remaining -= 1;
        }
    }

    /// Runs a single attempt with the call's deadline and cancellation, no
    /// retry.
    pub async fn run_with_deadline<T, F, Fut>(
        &self,
        overrides: &CallOverrides,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T, ClientError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        run_attempt(self.effective_timeout(overrides), cancel, attempt).await
    }
}

async fn run_attempt<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    attempt: F,
) -> Result<T, ClientError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    if cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    let token = cancel.child_token();
    let fut = attempt(token.clone());
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ClientError::Cancelled),
        result = fut => result,
        () = tokio::time::sleep(timeout) => Err(ClientError::Timeout { configured: timeout }),
    };
    if result.is_err() {
        token.cancel();
    }
    result
}

fn upstream_status(err: &ClientError) -> Option<u16> {
    match err {
        ClientError::Upstream {
            status: Some(status),
            ..
        } => Some(*status),
        ClientError::Upstream { code, .. } => code.status(),
        _ => None,
    }
}

fn describe<R: ResponseMetadata>(result: &Result<R, ClientError>) -> String {
    match result {
        Ok(response) => format!("status {}", response.status()),
        Err(err) => err.to_string(),
    }
}
