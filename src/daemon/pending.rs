//! Breakpoint intents held until an engine exists to install them on.
//!
//! Entries are created by client tools before (or between) sessions and
//! replayed against every session as it attaches. Ids carry a `pending_`
//! prefix so the tool layer can route removal and updates without a lookup.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::dbgp::{BreakpointType, Session};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBreakpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BreakpointType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMapping {
    pub pending_id: String,
    pub session_id: String,
    pub engine_breakpoint_id: String,
}

#[derive(Default)]
pub struct PendingBreakpoints {
    entries: RwLock<Vec<PendingBreakpoint>>,
    /// Applied mappings keyed by session id; dropped when the session ends.
    applied: RwLock<HashMap<String, Vec<AppliedMapping>>>,
    next_seq: AtomicU64,
}

impl PendingBreakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending_id(id: &str) -> bool {
        id.starts_with("pending_")
    }

    fn next_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("pending_{}", seq)
    }

    pub fn add_line(
        &self,
        filename: &str,
        lineno: u32,
        condition: Option<String>,
    ) -> PendingBreakpoint {
        let entry = PendingBreakpoint {
            id: self.next_id(),
            kind: if condition.is_some() {
                BreakpointType::Conditional
            } else {
                BreakpointType::Line
            },
            filename: Some(filename.to_string()),
            lineno: Some(lineno),
            condition,
            exception: None,
            function: None,
            enabled: true,
            created_at: Utc::now(),
        };
        self.entries.write().unwrap().push(entry.clone());
        entry
    }

    pub fn add_exception(&self, exception: &str) -> PendingBreakpoint {
        let entry = PendingBreakpoint {
            id: self.next_id(),
            kind: BreakpointType::Exception,
            filename: None,
            lineno: None,
            condition: None,
            exception: Some(exception.to_string()),
            function: None,
            enabled: true,
            created_at: Utc::now(),
        };
        self.entries.write().unwrap().push(entry.clone());
        entry
    }

    pub fn add_call(&self, function: &str) -> PendingBreakpoint {
        let entry = PendingBreakpoint {
            id: self.next_id(),
            kind: BreakpointType::Call,
            filename: None,
            lineno: None,
            condition: None,
            exception: None,
            function: Some(function.to_string()),
            enabled: true,
            created_at: Utc::now(),
        };
        self.entries.write().unwrap().push(entry.clone());
        entry
    }

    pub fn get(&self, id: &str) -> Option<PendingBreakpoint> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn list(&self) -> Vec<PendingBreakpoint> {
        self.entries.read().unwrap().clone()
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() < before;
        drop(entries);
        if removed {
            let mut applied = self.applied.write().unwrap();
            for mappings in applied.values_mut() {
                mappings.retain(|m| m.pending_id != id);
            }
        }
        removed
    }

    /// Pending entries accept only enable/disable until they are applied;
    /// hit counts and conditions belong to engine-side updates.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Replay every enabled entry on a newly attached session, in insertion
    /// order. One failed install is logged and does not stop the rest. Each
    /// entry produces at most one mapping per session.
    pub async fn apply_to_session(&self, session: &Session) -> Vec<AppliedMapping> {
        let snapshot: Vec<PendingBreakpoint> = self.entries.read().unwrap().clone();
        let mut new_mappings = Vec::new();

        for entry in snapshot {
            if !entry.enabled || self.is_applied(&entry.id, session.id()) {
                continue;
            }
            let result = match entry.kind {
                BreakpointType::Line | BreakpointType::Conditional => {
                    session
                        .set_line_breakpoint(
                            entry.filename.as_deref().unwrap_or_default(),
                            entry.lineno.unwrap_or(0),
                            entry.condition.as_deref(),
                            None,
                            None,
                            false,
                        )
                        .await
                }
                BreakpointType::Exception => {
                    session
                        .set_exception_breakpoint(entry.exception.as_deref().unwrap_or("*"))
                        .await
                }
                BreakpointType::Call => {
                    session
                        .set_call_breakpoint(entry.function.as_deref().unwrap_or_default())
                        .await
                }
                other => {
                    tracing::warn!(pending = %entry.id, "unsupported pending breakpoint type {:?}", other);
                    continue;
                }
            };

            match result {
                Ok(set) => {
                    let mapping = AppliedMapping {
                        pending_id: entry.id.clone(),
                        session_id: session.id().to_string(),
                        engine_breakpoint_id: set.id,
                    };
                    self.applied
                        .write()
                        .unwrap()
                        .entry(session.id().to_string())
                        .or_default()
                        .push(mapping.clone());
                    new_mappings.push(mapping);
                }
                Err(e) => {
                    tracing::warn!(
                        pending = %entry.id,
                        session = %session.id(),
                        "failed to apply pending breakpoint: {}",
                        e
                    );
                }
            }
        }

        new_mappings
    }

    fn is_applied(&self, pending_id: &str, session_id: &str) -> bool {
        self.applied
            .read()
            .unwrap()
            .get(session_id)
            .map(|ms| ms.iter().any(|m| m.pending_id == pending_id))
            .unwrap_or(false)
    }

    pub fn mappings_for_session(&self, session_id: &str) -> Vec<AppliedMapping> {
        self.applied
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Called when a session ends: its mappings go away, the entries stay
    /// for the next session.
    pub fn drop_session(&self, session_id: &str) {
        self.applied.write().unwrap().remove(session_id);
    }
}
