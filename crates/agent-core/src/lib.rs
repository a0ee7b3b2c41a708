//! Agent Core Library
//!
//! Request lifecycle and delivery core for the community reply agent:
//! every candidate reply is tracked from draft through human decision to
//! the irreversible act of posting it, with idempotent delivery, bounded
//! retry, a global dry-run switch, and an append-only audit trail.

pub mod audit;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod sanitize;
pub mod store;
pub mod types;

// Re-export main types for easy access
pub use config::{AgentConfig, DeliveryConfig, ForumConfig};
pub use error::{AgentError, Result};

pub use audit::AuditLog;
pub use clients::{ForumClient, PlatformError, RedditClient};
pub use coordinator::{ApprovalCoordinator, Decision, DecisionOutcome};
pub use delivery::{BackoffPolicy, DeliveryClient, DeliveryOutcome, Sleeper, TokioSleeper};
pub use sanitize::markdown_to_plain_text;
pub use store::RequestStore;
pub use types::{
    ActorId, AuditAction, AuditEvent, DraftedReply, ExternalItemId, ForumIdentity, ForumItem,
    ForumReply, IntakeItem, IntakeRecord, ModerationOutcome, NewRequest, ReplyId, Request,
    RequestFilter, RequestId, RequestStatus,
};
