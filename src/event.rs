use crate::{CallId, Extension, PartyId};
use serde::{Deserialize, Serialize};

/// SignalingEvent represents the typed events delivered by the signaling
/// and presence transports to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingEvent {
    /// Externally-originated call arriving from the vendor transport
    InboundCall {
        phone_number_id: String,
        caller_number: String,
        vendor_call_id: String,
    },
    /// Destination answered the call
    Answered { call_id: CallId },
    /// Destination rejected the call
    Rejected { call_id: CallId },
    /// Vendor status callback for an externally-originated call
    StatusChanged { call_id: CallId, status: String },
    /// Either side hung up, or the vendor reported completion
    Completed { call_id: CallId },
    /// Party connected to the realtime transport with an extension
    PartyConnected {
        party: PartyId,
        extension: Extension,
    },
    /// Party disconnected from the realtime transport
    PartyDisconnected { party: PartyId },
}

/// Type alias for the event sender
pub type EventSender = tokio::sync::mpsc::UnboundedSender<SignalingEvent>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<SignalingEvent>;
