//! Platform client seam
//!
//! The delivery pipeline talks to the forum through this trait so tests
//! can run against an in-memory double instead of a real network client.

use crate::types::{ExternalItemId, ForumIdentity, ForumItem, ForumReply, ReplyId};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Closed classification of platform failures.
///
/// The delivery client pattern-matches on this instead of catching broad
/// error hierarchies: rate limits and transient errors are retried, fatal
/// errors are not, and unknown errors are treated as transient.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("fatal platform error: {0}")]
    Fatal(String),

    #[error("unknown platform error: {0}")]
    Unknown(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {:.1}s)", d.as_secs_f64()),
        None => String::new(),
    }
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// Server-provided wait hint, used as a floor for the backoff sleep
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Read and write operations the delivery pipeline needs from the forum.
///
/// `list_replies` and `current_identity` exist so the "already answered"
/// check is an explicit capability rather than a scan hidden inside the
/// posting call.
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Fetch a forum item by id
    async fn get_item(&self, item_id: &ExternalItemId) -> PlatformResult<ForumItem>;

    /// List existing top-level replies on an item
    async fn list_replies(&self, item_id: &ExternalItemId) -> PlatformResult<Vec<ForumReply>>;

    /// Resolve the identity the client is authenticated as
    async fn current_identity(&self) -> PlatformResult<ForumIdentity>;

    /// Post a public reply. The one irreversible action in the system.
    async fn post_reply(&self, item_id: &ExternalItemId, text: &str) -> PlatformResult<ReplyId>;
}
