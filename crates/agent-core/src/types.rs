//! Strongly typed domain model for the request lifecycle
//! No string-based state management - everything is strongly typed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strongly typed RequestId
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, String> {
        // Validate UUID format
        uuid::Uuid::parse_str(s)
            .map(|_| Self(s.to_string()))
            .map_err(|e| format!("Invalid RequestId format: {}", e))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of the forum item (post) a request answers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalItemId(String);

impl ExternalItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a reply as assigned by the forum platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyId(String);

impl ReplyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who performed an audited action (a reviewer, or the agent itself)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Actor used for actions the agent takes on its own
    pub fn agent() -> Self {
        Self("agent".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Error,
}

impl RequestStatus {
    /// Get directory name for file storage
    pub fn directory_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }

    pub fn all() -> [RequestStatus; 4] {
        [Self::Pending, Self::Approved, Self::Rejected, Self::Error]
    }

    /// Legal transitions of the request state machine.
    ///
    /// Pending -> Approved | Rejected (human decision)
    /// Approved -> Error (delivery failed irrecoverably)
    /// Error -> Approved (manual retry)
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Error)
                | (Self::Error, Self::Approved)
        )
    }

    pub fn parse(s: &str) -> Option<RequestStatus> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.directory_name())
    }
}

/// One candidate reply awaiting or having received a human decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub external_item_id: ExternalItemId,
    pub channel: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub source_url: String,
    pub drafted_reply: String,
    pub agent_confidence: f64,
    pub moderation_score: f64,
    pub moderation_flags: Vec<String>,
    pub status: RequestStatus,
    pub final_reply: Option<String>,
    pub human_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn new(data: NewRequest) -> Self {
        let now = Utc::now();

        Self {
            id: RequestId::new(),
            external_item_id: data.item.external_item_id,
            channel: data.item.channel,
            title: data.item.title,
            body: data.item.body,
            author: data.item.author,
            source_url: data.item.source_url,
            drafted_reply: data.draft.text,
            agent_confidence: data.draft.confidence,
            moderation_score: data.moderation.safety_score,
            moderation_flags: data.moderation.flags,
            status: RequestStatus::Pending,
            final_reply: None,
            human_feedback: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Creation payload for a new request
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub item: IntakeItem,
    pub draft: DraftedReply,
    pub moderation: ModerationOutcome,
}

/// The forum question a draft was generated for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeItem {
    pub external_item_id: ExternalItemId,
    pub channel: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub source_url: String,
}

/// Output of the generation collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftedReply {
    pub text: String,
    /// Generation confidence in [0, 1]; low values are surfaced to reviewers, never rejected here
    pub confidence: f64,
}

/// Output of the content-safety collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationOutcome {
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default = "default_safety_score")]
    pub safety_score: f64,
}

fn default_safety_score() -> f64 {
    1.0
}

/// Serialized envelope the scheduler drops into the intake directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub item: IntakeItem,
    pub draft: DraftedReply,
    pub moderation: ModerationOutcome,
}

/// Filter for listing requests
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub channel: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

impl RequestFilter {
    pub fn with_status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, request: &Request) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if !request.channel.eq_ignore_ascii_case(channel) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if request.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if request.created_at > before {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if request.agent_confidence < min {
                return false;
            }
        }
        true
    }
}

/// A forum post as seen by the platform client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumItem {
    pub id: ExternalItemId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub url: String,
}

/// An existing reply on a forum item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumReply {
    pub id: ReplyId,
    pub author: String,
}

/// The authenticated identity the agent posts as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumIdentity {
    pub username: String,
}

/// Audited action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DraftGenerated,
    RequestApproved,
    RequestRejected,
    DeliveryFailed,
}

/// Immutable record of one action taken against a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub request_id: RequestId,
    pub actor: ActorId,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
