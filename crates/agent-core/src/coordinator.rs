//! Approval coordinator
//!
//! Accepts generated drafts into the request store and executes human
//! decisions. Approvals claim the request through the store's transition
//! guard before anything is posted, so two concurrent decisions on one
//! request can never both reach the forum.

use crate::audit::AuditLog;
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::error::{AgentError, Result};
use crate::sanitize::markdown_to_plain_text;
use crate::store::RequestStore;
use crate::types::{
    ActorId, AuditAction, DraftedReply, IntakeItem, ModerationOutcome, NewRequest, ReplyId,
    RequestId, RequestStatus,
};
use serde_json::json;
use std::sync::Arc;

/// A human reviewer's verdict on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Structured outcome of a decision; never a bare exception
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Rejected,
    Approved {
        /// Platform id of the posted reply; absent in dry run or when
        /// the reply already existed
        reply_id: Option<ReplyId>,
        /// The item already carried our reply; treated as success
        already_sent: bool,
        /// Dry run: recorded but never delivered
        simulated: bool,
    },
    /// Delivery failed; the request is parked in `error` for manual retry
    DeliveryFailed { error: String },
}

pub struct ApprovalCoordinator {
    store: Arc<RequestStore>,
    delivery: Arc<DeliveryClient>,
    audit: Arc<AuditLog>,
    dry_run: bool,
}

impl ApprovalCoordinator {
    /// The dry-run switch is injected here, never read from the
    /// environment, so both modes can coexist in one process.
    pub fn new(
        store: Arc<RequestStore>,
        delivery: Arc<DeliveryClient>,
        audit: Arc<AuditLog>,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            delivery,
            audit,
            dry_run,
        }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Queue a generated draft for human review.
    ///
    /// Duplicate intake is not an error: if a request already covers the
    /// item, its id is returned and nothing new is created or audited.
    pub fn intake(
        &self,
        item: IntakeItem,
        draft: DraftedReply,
        moderation: ModerationOutcome,
    ) -> Result<RequestId> {
        if let Some(existing) = self.store.find_by_external_item(&item.external_item_id)? {
            log::info!(
                "Intake for item {} already tracked as request {}",
                item.external_item_id,
                existing.id
            );
            return Ok(existing.id);
        }

        let payload = json!({
            "confidence": draft.confidence,
            "moderation_score": moderation.safety_score,
            "flags": moderation.flags,
        });

        let id = self.store.create(NewRequest {
            item,
            draft,
            moderation,
        })?;

        self.audit
            .append(AuditAction::DraftGenerated, &id, &ActorId::agent(), payload)?;

        log::info!("Request {} queued for approval", id);
        Ok(id)
    }

    /// Execute a human decision on a request.
    ///
    /// Rejection requires a pending request. Approval is accepted from
    /// `pending` or, for a manual retry after a delivery failure, from
    /// `error`. Any other state is a validation error.
    pub async fn decide(
        &self,
        request_id: &RequestId,
        decision: Decision,
        actor: &ActorId,
        human_feedback: Option<String>,
        edited_reply: Option<String>,
    ) -> Result<DecisionOutcome> {
        let request = self.store.get(request_id)?;

        match decision {
            Decision::Reject => {
                if request.status != RequestStatus::Pending {
                    return Err(AgentError::Validation(format!(
                        "Request {} is {}, not pending",
                        request_id, request.status
                    )));
                }

                let feedback = human_feedback.unwrap_or_else(|| "Rejected by reviewer".to_string());
                self.store.update_status(
                    request_id,
                    RequestStatus::Rejected,
                    None,
                    Some(feedback.clone()),
                )?;

                self.audit.append(
                    AuditAction::RequestRejected,
                    request_id,
                    actor,
                    json!({ "feedback": feedback }),
                )?;

                log::info!("Request {} rejected", request_id);
                Ok(DecisionOutcome::Rejected)
            }
            Decision::Approve => {
                if !matches!(request.status, RequestStatus::Pending | RequestStatus::Error) {
                    return Err(AgentError::Validation(format!(
                        "Request {} is {}, not pending",
                        request_id, request.status
                    )));
                }

                let edited = edited_reply
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .is_some();
                let source_text = edited_reply
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| request.drafted_reply.clone());
                let final_text = markdown_to_plain_text(&source_text);

                if final_text.is_empty() {
                    return Err(AgentError::Validation(format!(
                        "Request {} has no reply content to post",
                        request_id
                    )));
                }

                // Claim the request before delivering. The transition guard
                // serializes concurrent approvals: the loser fails here and
                // never reaches the forum.
                self.store.update_status(
                    request_id,
                    RequestStatus::Approved,
                    Some(final_text.clone()),
                    human_feedback.clone(),
                )?;

                if self.dry_run {
                    log::info!(
                        "DRY RUN: would post reply to item {} for request {}",
                        request.external_item_id,
                        request_id
                    );
                    self.audit.append(
                        AuditAction::RequestApproved,
                        request_id,
                        actor,
                        json!({
                            "simulated": true,
                            "already_sent": false,
                            "edited": edited,
                            "feedback": human_feedback,
                        }),
                    )?;
                    return Ok(DecisionOutcome::Approved {
                        reply_id: None,
                        already_sent: false,
                        simulated: true,
                    });
                }

                match self
                    .delivery
                    .deliver(&request.external_item_id, &final_text)
                    .await
                {
                    DeliveryOutcome::Sent { reply_id } => {
                        self.audit.append(
                            AuditAction::RequestApproved,
                            request_id,
                            actor,
                            json!({
                                "simulated": false,
                                "already_sent": false,
                                "reply_id": reply_id.as_str(),
                                "edited": edited,
                                "feedback": human_feedback,
                            }),
                        )?;
                        log::info!("Request {} approved and posted", request_id);
                        Ok(DecisionOutcome::Approved {
                            reply_id: Some(reply_id),
                            already_sent: false,
                            simulated: false,
                        })
                    }
                    DeliveryOutcome::AlreadySent => {
                        self.audit.append(
                            AuditAction::RequestApproved,
                            request_id,
                            actor,
                            json!({
                                "simulated": false,
                                "already_sent": true,
                                "edited": edited,
                                "feedback": human_feedback,
                            }),
                        )?;
                        log::info!(
                            "Request {} approved; item already had our reply",
                            request_id
                        );
                        Ok(DecisionOutcome::Approved {
                            reply_id: None,
                            already_sent: true,
                            simulated: false,
                        })
                    }
                    DeliveryOutcome::Failed { error } => {
                        // Park the request in error; an operator can retry
                        // with another approve decision
                        self.store.update_status(
                            request_id,
                            RequestStatus::Error,
                            None,
                            Some(format!("Delivery failed: {}", error)),
                        )?;
                        self.audit.append(
                            AuditAction::DeliveryFailed,
                            request_id,
                            actor,
                            json!({ "error": error }),
                        )?;
                        log::error!("Delivery failed for request {}: {}", request_id, error);
                        Ok(DecisionOutcome::DeliveryFailed { error })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::forum::{ForumClient, PlatformError, PlatformResult};
    use crate::config::DeliveryConfig;
    use crate::delivery::Sleeper;
    use crate::types::{ExternalItemId, ForumIdentity, ForumItem, ForumReply};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoopSleeper {
        count: Mutex<usize>,
    }

    #[async_trait]
    impl Sleeper for NoopSleeper {
        async fn sleep(&self, _duration: Duration) {
            *self.count.lock().unwrap() += 1;
        }
    }

    /// Forum double that counts every call and pops scripted post results
    struct CountingForum {
        identity: String,
        existing_authors: Vec<String>,
        post_script: Mutex<Vec<PlatformResult<ReplyId>>>,
        calls: Mutex<usize>,
    }

    impl CountingForum {
        fn new(post_script: Vec<PlatformResult<ReplyId>>) -> Self {
            Self {
                identity: "agent-bot".to_string(),
                existing_authors: Vec::new(),
                post_script: Mutex::new(post_script),
                calls: Mutex::new(0),
            }
        }

        fn total_calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ForumClient for CountingForum {
        async fn get_item(&self, item_id: &ExternalItemId) -> PlatformResult<ForumItem> {
            *self.calls.lock().unwrap() += 1;
            Ok(ForumItem {
                id: item_id.clone(),
                title: "title".to_string(),
                body: String::new(),
                author: "asker".to_string(),
                url: String::new(),
            })
        }

        async fn list_replies(&self, _item_id: &ExternalItemId) -> PlatformResult<Vec<ForumReply>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self
                .existing_authors
                .iter()
                .enumerate()
                .map(|(i, author)| ForumReply {
                    id: ReplyId::new(format!("r{}", i)),
                    author: author.clone(),
                })
                .collect())
        }

        async fn current_identity(&self) -> PlatformResult<ForumIdentity> {
            *self.calls.lock().unwrap() += 1;
            Ok(ForumIdentity {
                username: self.identity.clone(),
            })
        }

        async fn post_reply(
            &self,
            _item_id: &ExternalItemId,
            _text: &str,
        ) -> PlatformResult<ReplyId> {
            *self.calls.lock().unwrap() += 1;
            self.post_script.lock().unwrap().remove(0)
        }
    }

    fn coordinator(
        temp_dir: &TempDir,
        forum: Arc<CountingForum>,
        dry_run: bool,
    ) -> ApprovalCoordinator {
        let store = Arc::new(RequestStore::new(temp_dir.path()).unwrap());
        let audit = Arc::new(AuditLog::new(temp_dir.path()).unwrap());
        let config = DeliveryConfig {
            dry_run,
            max_retries: 5,
            base_backoff_seconds: 0.01,
            max_backoff_seconds: 0.1,
        };
        let delivery = Arc::new(DeliveryClient::with_sleeper(
            forum,
            &config,
            Arc::new(NoopSleeper {
                count: Mutex::new(0),
            }),
        ));
        ApprovalCoordinator::new(store, delivery, audit, dry_run)
    }

    fn sample_intake(item_id: &str) -> (IntakeItem, DraftedReply, ModerationOutcome) {
        (
            IntakeItem {
                external_item_id: ExternalItemId::new(item_id),
                channel: "learnpython".to_string(),
                title: "How do I parse JSON?".to_string(),
                body: "decode error".to_string(),
                author: "asker".to_string(),
                source_url: format!("https://example.com/{}", item_id),
            },
            DraftedReply {
                text: "draft text".to_string(),
                confidence: 0.8,
            },
            ModerationOutcome {
                is_flagged: false,
                flags: vec![],
                safety_score: 1.0,
            },
        )
    }

    #[tokio::test]
    async fn test_intake_dedups_and_audits() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum, true);

        let (item, draft, moderation) = sample_intake("abc123");
        let first = coordinator
            .intake(item.clone(), draft.clone(), moderation.clone())
            .unwrap();

        let request = coordinator.store().get(&first).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        // Same item again returns the same id, no second row, no second event
        let second = coordinator.intake(item, draft, moderation).unwrap();
        assert_eq!(first, second);

        let history = coordinator.audit().history(&first).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::DraftGenerated);
        assert_eq!(history[0].payload["confidence"], serde_json::json!(0.8));
    }

    #[tokio::test]
    async fn test_reject_leaves_final_reply_unset() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum.clone(), false);

        let (item, draft, moderation) = sample_intake("abc123");
        let id = coordinator.intake(item, draft, moderation).unwrap();

        let outcome = coordinator
            .decide(
                &id,
                Decision::Reject,
                &ActorId::new("reviewer-1"),
                Some("not relevant".to_string()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome, DecisionOutcome::Rejected);

        let request = coordinator.store().get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
        assert!(request.final_reply.is_none());
        assert_eq!(request.human_feedback.as_deref(), Some("not relevant"));

        let history = coordinator.audit().history(&id).unwrap();
        assert_eq!(history.last().unwrap().action, AuditAction::RequestRejected);
        assert_eq!(forum.total_calls(), 0, "Rejection makes no platform calls");
    }

    #[tokio::test]
    async fn test_dry_run_approve_makes_no_platform_calls() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum.clone(), true);

        let (item, draft, moderation) = sample_intake("abc123");
        let id = coordinator.intake(item, draft, moderation).unwrap();

        let outcome = coordinator
            .decide(&id, Decision::Approve, &ActorId::new("reviewer-1"), None, None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DecisionOutcome::Approved {
                reply_id: None,
                already_sent: false,
                simulated: true,
            }
        );

        let request = coordinator.store().get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.final_reply.as_deref(), Some("draft text"));
        assert_eq!(forum.total_calls(), 0, "Dry run must not touch the forum");

        let history = coordinator.audit().history(&id).unwrap();
        let approved = history.last().unwrap();
        assert_eq!(approved.action, AuditAction::RequestApproved);
        assert_eq!(approved.payload["simulated"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_live_approve_posts_and_records_reply_id() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![Ok(ReplyId::new("new-reply"))]));
        let coordinator = coordinator(&temp_dir, forum, false);

        let (item, draft, moderation) = sample_intake("abc123");
        let id = coordinator.intake(item, draft, moderation).unwrap();

        let outcome = coordinator
            .decide(
                &id,
                Decision::Approve,
                &ActorId::new("reviewer-1"),
                Some("ship it".to_string()),
                None,
            )
            .await
            .unwrap();

        match outcome {
            DecisionOutcome::Approved {
                reply_id,
                already_sent,
                simulated,
            } => {
                assert_eq!(reply_id, Some(ReplyId::new("new-reply")));
                assert!(!already_sent);
                assert!(!simulated);
            }
            other => panic!("Expected Approved, got {:?}", other),
        }

        let request = coordinator.store().get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.final_reply.as_deref(), Some("draft text"));
    }

    #[tokio::test]
    async fn test_approve_uses_edited_reply_and_sanitizes() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum, true);

        let (item, draft, moderation) = sample_intake("abc123");
        let id = coordinator.intake(item, draft, moderation).unwrap();

        coordinator
            .decide(
                &id,
                Decision::Approve,
                &ActorId::new("reviewer-1"),
                None,
                Some("**Edited** answer with [docs](https://example.com)".to_string()),
            )
            .await
            .unwrap();

        let request = coordinator.store().get(&id).unwrap();
        assert_eq!(
            request.final_reply.as_deref(),
            Some("Edited answer with docs (https://example.com)")
        );

        let history = coordinator.audit().history(&id).unwrap();
        assert_eq!(
            history.last().unwrap().payload["edited"],
            serde_json::json!(true)
        );
    }

    #[tokio::test]
    async fn test_delivery_failure_parks_request_then_retry_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![
            Err(PlatformError::Fatal("403 Forbidden".to_string())),
            Ok(ReplyId::new("retried-reply")),
        ]));
        let coordinator = coordinator(&temp_dir, forum, false);

        let (item, draft, moderation) = sample_intake("abc123");
        let id = coordinator.intake(item, draft, moderation).unwrap();

        let outcome = coordinator
            .decide(&id, Decision::Approve, &ActorId::new("reviewer-1"), None, None)
            .await
            .unwrap();

        match &outcome {
            DecisionOutcome::DeliveryFailed { error } => assert!(error.contains("403 Forbidden")),
            other => panic!("Expected DeliveryFailed, got {:?}", other),
        }

        let request = coordinator.store().get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Error);
        assert!(request
            .human_feedback
            .as_deref()
            .unwrap()
            .contains("403 Forbidden"));
        // final_reply stays set while the request sits in error
        assert_eq!(request.final_reply.as_deref(), Some("draft text"));

        // Manual retry: approve again from error
        let retry = coordinator
            .decide(&id, Decision::Approve, &ActorId::new("reviewer-1"), None, None)
            .await
            .unwrap();
        assert!(matches!(retry, DecisionOutcome::Approved { .. }));
        assert_eq!(
            coordinator.store().get(&id).unwrap().status,
            RequestStatus::Approved
        );

        let history = coordinator.audit().history(&id).unwrap();
        let actions: Vec<_> = history.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::DraftGenerated,
                AuditAction::DeliveryFailed,
                AuditAction::RequestApproved,
            ]
        );
    }

    #[tokio::test]
    async fn test_decide_on_settled_request_fails() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum, true);

        let (item, draft, moderation) = sample_intake("abc123");
        let id = coordinator.intake(item, draft, moderation).unwrap();

        coordinator
            .decide(
                &id,
                Decision::Reject,
                &ActorId::new("reviewer-1"),
                Some("no".to_string()),
                None,
            )
            .await
            .unwrap();

        for decision in [Decision::Approve, Decision::Reject] {
            let result = coordinator
                .decide(&id, decision, &ActorId::new("reviewer-2"), None, None)
                .await;
            assert!(matches!(result, Err(AgentError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_decide_on_unknown_request_fails() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum, true);

        let result = coordinator
            .decide(
                &RequestId::new(),
                Decision::Approve,
                &ActorId::new("reviewer-1"),
                None,
                None,
            )
            .await;

        assert!(matches!(result, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_approve_with_empty_content_fails() {
        let temp_dir = TempDir::new().unwrap();
        let forum = Arc::new(CountingForum::new(vec![]));
        let coordinator = coordinator(&temp_dir, forum, true);

        let (item, mut draft, moderation) = sample_intake("abc123");
        draft.text = "".to_string();
        let id = coordinator.intake(item, draft, moderation).unwrap();

        let result = coordinator
            .decide(&id, Decision::Approve, &ActorId::new("reviewer-1"), None, None)
            .await;

        assert!(matches!(result, Err(AgentError::Validation(_))));
        // Still pending, the reviewer can edit and approve later
        assert_eq!(
            coordinator.store().get(&id).unwrap().status,
            RequestStatus::Pending
        );
    }
}
