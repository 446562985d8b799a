use crate::{CallId, Extension, PartyId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Connecting,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Direction-specific attributes of a call session.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum CallKind {
    /// Extension-to-extension call between two connected parties
    Internal {
        from_party: PartyId,
        from_extension: Extension,
        to_party: PartyId,
        to_extension: Extension,
    },
    /// Call entering from the public network via the vendor transport
    External {
        vendor_call_id: String,
        from_number: String,
        to_party: PartyId,
        to_extension: Extension,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct CallSession {
    pub call_id: CallId,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub kind: CallKind,
}

impl CallSession {
    pub fn vendor_call_id(&self) -> Option<&str> {
        match &self.kind {
            CallKind::External { vendor_call_id, .. } => Some(vendor_call_id),
            CallKind::Internal { .. } => None,
        }
    }

    /// True if `party` is either side of an internal call, or the
    /// destination of an externally-originated call.
    pub fn involves_party(&self, party: &str) -> bool {
        match &self.kind {
            CallKind::Internal {
                from_party,
                to_party,
                ..
            } => from_party == party || to_party == party,
            CallKind::External { to_party, .. } => to_party == party,
        }
    }
}

/// Attributes of an inbound externally-originated call at creation time.
pub struct ExternalCallParams {
    pub call_id: CallId,
    pub vendor_call_id: String,
    pub from_number: String,
    pub to_party: PartyId,
    pub to_extension: Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateCallError {
    DuplicateCallId,
    DuplicateVendorCallId,
}

impl std::fmt::Display for CreateCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateCallError::DuplicateCallId => write!(f, "Call id already registered"),
            CreateCallError::DuplicateVendorCallId => {
                write!(f, "Vendor call id already mapped to another call")
            }
        }
    }
}

impl std::error::Error for CreateCallError {}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<CallId, CallSession>,
    call_by_vendor_id: HashMap<String, CallId>,
}

/// Authoritative in-memory record of every active call. Each operation is
/// an atomic check-and-set under a single mutex, which keeps per-call-id
/// transitions linearizable across concurrent signaling handlers. Sessions
/// are removed, never archived, once a terminal state is reached.
pub struct CallSessionRegistry {
    inner: Mutex<RegistryState>,
}

impl CallSessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState::default()),
        }
    }

    pub fn create_internal_call(
        &self,
        call_id: &str,
        from_party: &str,
        from_extension: &str,
        to_party: &str,
        to_extension: &str,
    ) -> Result<CallSession, CreateCallError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.sessions.contains_key(call_id) {
            return Err(CreateCallError::DuplicateCallId);
        }
        let session = CallSession {
            call_id: call_id.to_string(),
            state: CallState::Ringing,
            created_at: Utc::now(),
            answered_at: None,
            kind: CallKind::Internal {
                from_party: from_party.to_string(),
                from_extension: from_extension.to_string(),
                to_party: to_party.to_string(),
                to_extension: to_extension.to_string(),
            },
        };
        guard.sessions.insert(call_id.to_string(), session.clone());
        info!(
            "internal call {} created: {} ({}) -> {} ({})",
            call_id, from_party, from_extension, to_party, to_extension
        );
        Ok(session)
    }

    pub fn create_external_call(
        &self,
        params: ExternalCallParams,
    ) -> Result<CallSession, CreateCallError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.sessions.contains_key(&params.call_id) {
            return Err(CreateCallError::DuplicateCallId);
        }
        if let Some(existing) = guard.call_by_vendor_id.get(&params.vendor_call_id) {
            if *existing != params.call_id {
                return Err(CreateCallError::DuplicateVendorCallId);
            }
        }
        let session = CallSession {
            call_id: params.call_id.clone(),
            state: CallState::Ringing,
            created_at: Utc::now(),
            answered_at: None,
            kind: CallKind::External {
                vendor_call_id: params.vendor_call_id.clone(),
                from_number: params.from_number,
                to_party: params.to_party,
                to_extension: params.to_extension,
            },
        };
        guard
            .call_by_vendor_id
            .insert(params.vendor_call_id, params.call_id.clone());
        guard.sessions.insert(params.call_id.clone(), session.clone());
        info!("external call {} created", params.call_id);
        Ok(session)
    }

    pub fn get_by_id(&self, call_id: &str) -> Option<CallSession> {
        self.inner.lock().unwrap().sessions.get(call_id).cloned()
    }

    pub fn get_by_vendor_id(&self, vendor_call_id: &str) -> Option<CallSession> {
        let guard = self.inner.lock().unwrap();
        let call_id = guard.call_by_vendor_id.get(vendor_call_id)?;
        guard.sessions.get(call_id).cloned()
    }

    /// Set the state of an active call. Unknown call ids are a logged
    /// no-op: signaling transports redeliver and race, so a late event for
    /// an already-terminated call must never crash the handler. A terminal
    /// state removes the session and its vendor-id index entry atomically.
    pub fn update_state(&self, call_id: &str, new_state: CallState) -> Option<CallSession> {
        let mut guard = self.inner.lock().unwrap();
        let session = match guard.sessions.get_mut(call_id) {
            Some(session) => session,
            None => {
                debug!(
                    "state update to {} for unknown call {}, ignoring",
                    new_state, call_id
                );
                return None;
            }
        };
        session.state = new_state;
        if new_state == CallState::Connected && session.answered_at.is_none() {
            session.answered_at = Some(Utc::now());
        }
        if new_state.is_terminal() {
            let session = guard.sessions.remove(call_id).unwrap();
            if let Some(vendor_call_id) = session.vendor_call_id() {
                guard.call_by_vendor_id.remove(vendor_call_id);
            }
            info!("call {} reached {}, removed", call_id, new_state);
            return Some(session);
        }
        debug!("call {} -> {}", call_id, new_state);
        guard.sessions.get(call_id).cloned()
    }

    /// Remove and return the session. Idempotent: a second call for the
    /// same id returns `None` without error.
    pub fn end(&self, call_id: &str) -> Option<CallSession> {
        let mut guard = self.inner.lock().unwrap();
        let mut session = guard.sessions.remove(call_id)?;
        if let Some(vendor_call_id) = session.vendor_call_id() {
            guard.call_by_vendor_id.remove(vendor_call_id);
        }
        if !session.state.is_terminal() {
            session.state = CallState::Ended;
        }
        info!("call {} ended, removed", call_id);
        Some(session)
    }

    pub fn is_party_in_call(&self, party: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .any(|session| session.involves_party(party))
    }

    /// Linear scan over active sessions. Active-call cardinality per
    /// process is bounded by line capacity, so this stays cheap.
    pub fn find_active_session_for_party(&self, party: &str) -> Option<CallSession> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .find(|session| session.involves_party(party))
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn list_active(&self) -> Vec<CallSession> {
        let mut sessions: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }
}

impl Default for CallSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
