//! Idempotent, retrying delivery of approved replies
//!
//! Posting a reply is the one irreversible action in the system. The
//! delivery client wraps it behind an idempotency pre-check (has our
//! identity already replied on this item?) and a bounded exponential
//! backoff that treats rate limits as expected steady-state behavior.

use crate::clients::forum::{ForumClient, PlatformError};
use crate::config::DeliveryConfig;
use crate::types::{ExternalItemId, ReplyId};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound of the random jitter added to every backoff sleep
const JITTER_MAX: Duration = Duration::from_millis(500);

/// Sleep seam so tests can record backoff durations instead of waiting
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_secs_f64(config.base_backoff_seconds),
            cap: Duration::from_secs_f64(config.max_backoff_seconds),
        }
    }

    /// Sleep duration before retrying the given zero-based attempt.
    ///
    /// `min(cap, base * 2^attempt) + jitter(0, 0.5s)`, with any
    /// server-provided wait hint applied as a floor.
    pub fn delay_for(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        let exponential = self.base.mul_f64(2f64.powi(attempt.min(31) as i32));
        let mut delay = exponential.min(self.cap);

        if let Some(hint) = server_hint {
            delay = delay.max(hint);
        }

        let jitter = rand::thread_rng().gen_range(Duration::ZERO..JITTER_MAX);
        delay + jitter
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Outcome of one delivery attempt, after retries
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// A new public reply was posted
    Sent { reply_id: ReplyId },
    /// Our identity already has a reply on the item; nothing was posted
    AlreadySent,
    /// Fatal error or retries exhausted; no partial state was left behind
    Failed { error: String },
}

pub struct DeliveryClient {
    forum: Arc<dyn ForumClient>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
}

impl DeliveryClient {
    pub fn new(forum: Arc<dyn ForumClient>, config: &DeliveryConfig) -> Self {
        Self::with_sleeper(forum, config, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        forum: Arc<dyn ForumClient>,
        config: &DeliveryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            forum,
            sleeper,
            policy: BackoffPolicy::from_config(config),
        }
    }

    /// Reply to `item_id` with `text`, idempotently.
    ///
    /// Safe to call more than once for the same item (for example after a
    /// crash mid-retry): if the authenticated identity already has a reply
    /// on the item, nothing is posted and `AlreadySent` is returned.
    pub async fn deliver(&self, item_id: &ExternalItemId, text: &str) -> DeliveryOutcome {
        // Idempotency pre-check. The read calls share the backoff policy
        // since they may be rate-limited too.
        let identity = {
            let forum = Arc::clone(&self.forum);
            match self
                .run_with_retry("resolve identity", move || {
                    let forum = Arc::clone(&forum);
                    async move { forum.current_identity().await }
                })
                .await
            {
                Ok(identity) => identity,
                Err(error) => return DeliveryOutcome::Failed { error },
            }
        };

        let replies = {
            let forum = Arc::clone(&self.forum);
            let item = item_id.clone();
            match self
                .run_with_retry("list replies", move || {
                    let forum = Arc::clone(&forum);
                    let item = item.clone();
                    async move { forum.list_replies(&item).await }
                })
                .await
            {
                Ok(replies) => replies,
                Err(error) => return DeliveryOutcome::Failed { error },
            }
        };

        if replies.iter().any(|r| r.author == identity.username) {
            log::info!(
                "Item {} already has a reply from {}, skipping post",
                item_id,
                identity.username
            );
            return DeliveryOutcome::AlreadySent;
        }

        let forum = Arc::clone(&self.forum);
        let item = item_id.clone();
        let text = text.to_string();
        match self
            .run_with_retry("post reply", move || {
                let forum = Arc::clone(&forum);
                let item = item.clone();
                let text = text.clone();
                async move { forum.post_reply(&item, &text).await }
            })
            .await
        {
            Ok(reply_id) => DeliveryOutcome::Sent { reply_id },
            Err(error) => DeliveryOutcome::Failed { error },
        }
    }

    /// Run a platform call with bounded retry on retryable errors.
    ///
    /// Fatal errors return immediately. The loop blocks the calling task
    /// for the backoff sleeps; there is no cancellation, an operation runs
    /// to success, fatal failure, or exhaustion.
    async fn run_with_retry<T, F, Fut>(
        &self,
        what: &str,
        operation: F,
    ) -> std::result::Result<T, String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, PlatformError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => {
                    log::warn!("{} failed fatally: {}", what, error);
                    return Err(format!("{} failed: {}", what, error));
                }
                Err(error) => {
                    if attempt >= self.policy.max_retries {
                        log::warn!(
                            "{} failed after {} retries: {}",
                            what,
                            self.policy.max_retries,
                            error
                        );
                        return Err(format!(
                            "{} failed after {} retries: {}",
                            what, self.policy.max_retries, error
                        ));
                    }

                    let delay = self.policy.delay_for(attempt, error.retry_after_hint());
                    log::debug!(
                        "{} attempt {} failed ({}), retrying in {:.2}s",
                        what,
                        attempt + 1,
                        error,
                        delay.as_secs_f64()
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
