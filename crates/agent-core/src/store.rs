//! Persistent request store with one JSON document per request
//!
//! Requests live under one directory per status (pending/, approved/,
//! rejected/, error/). A status transition moves the file between
//! directories with an atomic rename; the rename doubles as the
//! transition guard, so of two concurrent decisions on the same request
//! exactly one can claim it.

use crate::error::{AgentError, Result};
use crate::types::{
    ExternalItemId, NewRequest, Request, RequestFilter, RequestId, RequestStatus,
};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct RequestStore {
    root_path: PathBuf,
}

impl RequestStore {
    /// Create a store rooted at the given path, creating the status directories
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        for status in RequestStatus::all() {
            fs::create_dir_all(root_path.join(status.directory_name()))?;
        }

        Ok(Self { root_path })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Path for a request in a specific status
    fn request_path(&self, status: RequestStatus, id: &RequestId) -> PathBuf {
        self.root_path
            .join(status.directory_name())
            .join(format!("request_{}.json", id))
    }

    /// Find a request in any status directory
    fn find_request_path(&self, id: &RequestId) -> Option<(PathBuf, RequestStatus)> {
        for status in RequestStatus::all() {
            let path = self.request_path(status, id);
            if path.exists() {
                return Some((path, status));
            }
        }
        None
    }

    fn write_request(&self, path: &Path, request: &Request) -> Result<()> {
        let json = serde_json::to_string_pretty(request)
            .map_err(|e| AgentError::Serialization(format!("Failed to serialize request: {}", e)))?;

        fs::write(path, json)?;
        Ok(())
    }

    fn read_request(&self, path: &Path) -> Result<Request> {
        let json = fs::read_to_string(path)?;

        serde_json::from_str(&json)
            .map_err(|e| AgentError::Deserialization(format!("Failed to deserialize request: {}", e)))
    }

    /// Create a new pending request.
    ///
    /// At most one live request may exist per external item: if one is
    /// already present, its id is returned and nothing is written.
    pub fn create(&self, data: NewRequest) -> Result<RequestId> {
        if let Some(existing) = self.find_by_external_item(&data.item.external_item_id)? {
            log::info!(
                "Request {} already covers item {}, skipping create",
                existing.id,
                data.item.external_item_id
            );
            return Ok(existing.id);
        }

        let request = Request::new(data);
        let id = request.id.clone();
        let path = self.request_path(RequestStatus::Pending, &id);

        self.write_request(&path, &request)?;

        log::info!(
            "Created request {} for item {}",
            id,
            request.external_item_id
        );
        Ok(id)
    }

    /// Get a request by id, in whatever status it currently has
    pub fn get(&self, id: &RequestId) -> Result<Request> {
        let (path, _) = self
            .find_request_path(id)
            .ok_or_else(|| AgentError::NotFound(format!("Request {}", id)))?;

        self.read_request(&path)
    }

    /// Transition a request to a new status, updating decision fields.
    ///
    /// Fails with `InvalidTransition` if the transition is illegal from the
    /// request's current status, or if a concurrent update claimed the
    /// request first. `updated_at` is bumped; `final_reply` and
    /// `human_feedback` are only overwritten when provided.
    pub fn update_status(
        &self,
        id: &RequestId,
        next: RequestStatus,
        final_reply: Option<String>,
        human_feedback: Option<String>,
    ) -> Result<Request> {
        let (path, current) = self
            .find_request_path(id)
            .ok_or_else(|| AgentError::NotFound(format!("Request {}", id)))?;

        if !current.can_transition_to(next) {
            log::warn!(
                "Refused illegal transition {} -> {} for request {}",
                current,
                next,
                id
            );
            return Err(AgentError::InvalidTransition(format!(
                "{} -> {} for request {}",
                current, next, id
            )));
        }

        // Claim the request first. The rename is atomic: if a concurrent
        // update moved the file already, the source is gone and we lose.
        let new_path = self.request_path(next, id);
        fs::rename(&path, &new_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                log::warn!(
                    "Lost transition race for request {} ({} -> {})",
                    id,
                    current,
                    next
                );
                AgentError::InvalidTransition(format!(
                    "request {} was concurrently transitioned out of {}",
                    id, current
                ))
            } else {
                AgentError::Io(e)
            }
        })?;

        let mut request = self.read_request(&new_path)?;
        request.status = next;
        if let Some(reply) = final_reply {
            request.final_reply = Some(reply);
        }
        if let Some(feedback) = human_feedback {
            request.human_feedback = Some(feedback);
        }
        request.updated_at = Utc::now();

        self.write_request(&new_path, &request)?;

        log::info!("Request {} transitioned {} -> {}", id, current, next);
        Ok(request)
    }

    /// List requests in one status directory, unordered
    fn read_status_dir(&self, status: RequestStatus) -> Result<Vec<Request>> {
        let dir = self.root_path.join(status.directory_name());

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut requests = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;

            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                match self.read_request(&path) {
                    Ok(request) => requests.push(request),
                    Err(e) => log::warn!("Skipping unreadable request file {:?}: {}", path, e),
                }
            }
        }

        Ok(requests)
    }

    /// List requests matching a filter, newest first
    pub fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>> {
        let statuses: Vec<RequestStatus> = match filter.status {
            Some(status) => vec![status],
            None => RequestStatus::all().to_vec(),
        };

        let mut requests = Vec::new();
        for status in statuses {
            requests.extend(self.read_status_dir(status)?);
        }

        requests.retain(|r| filter.matches(r));
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            requests.truncate(limit);
        }

        Ok(requests)
    }

    /// Find the request covering an external item, if any
    pub fn find_by_external_item(&self, item_id: &ExternalItemId) -> Result<Option<Request>> {
        for status in RequestStatus::all() {
            for request in self.read_status_dir(status)? {
                if &request.external_item_id == item_id {
                    return Ok(Some(request));
                }
            }
        }

        Ok(None)
    }

    pub fn exists_for_external_item(&self, item_id: &ExternalItemId) -> Result<bool> {
        Ok(self.find_by_external_item(item_id)?.is_some())
    }

    /// Request counts per status, for operator overviews
    pub fn status_counts(&self) -> Result<HashMap<RequestStatus, usize>> {
        let mut counts = HashMap::new();

        for status in RequestStatus::all() {
            counts.insert(status, self.read_status_dir(status)?.len());
        }

        Ok(counts)
    }
}
