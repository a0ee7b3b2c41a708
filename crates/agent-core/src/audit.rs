//! Append-only audit trail
//!
//! Every action taken against a request lands in a JSON-lines file under
//! the data root. Events are only ever appended, never rewritten.

use crate::error::{AgentError, Result};
use crate::types::{ActorId, AuditAction, AuditEvent, RequestId};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct AuditLog {
    log_path: PathBuf,
    // Serializes appends so concurrent writers cannot interleave lines
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Open (or create) the audit log under the given data root
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let dir = root_path.as_ref().join("audit");
        fs::create_dir_all(&dir)?;

        Ok(Self {
            log_path: dir.join("events.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    /// Append one event. Insert-only; there is no update or delete.
    pub fn append(
        &self,
        action: AuditAction,
        request_id: &RequestId,
        actor: &ActorId,
        payload: serde_json::Value,
    ) -> Result<AuditEvent> {
        let event = AuditEvent {
            action,
            request_id: request_id.clone(),
            actor: actor.clone(),
            payload,
            timestamp: Utc::now(),
        };

        let line = serde_json::to_string(&event)
            .map_err(|e| AgentError::Serialization(format!("Failed to serialize audit event: {}", e)))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AgentError::Workflow("Audit log lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", line)?;

        log::debug!("Audit: {:?} for request {}", event.action, request_id);
        Ok(event)
    }

    fn read_all(&self) -> Result<Vec<AuditEvent>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)?;
        let mut events = Vec::new();

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!("Skipping unreadable audit line: {}", e),
            }
        }

        Ok(events)
    }

    /// Ordered history for one request
    pub fn history(&self, request_id: &RequestId) -> Result<Vec<AuditEvent>> {
        let mut events = self.read_all()?;
        events.retain(|e| &e.request_id == request_id);
        Ok(events)
    }

    /// Full trail across all requests, in append order
    pub fn all(&self) -> Result<Vec<AuditEvent>> {
        self.read_all()
    }
}
