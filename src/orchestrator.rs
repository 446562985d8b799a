use crate::callrecord::{CallRecord, CallRecordSender, HangupReason};
use crate::directory::ExtensionDirectory;
use crate::event::{EventReceiver, SignalingEvent};
use crate::registry::{CallSession, CallSessionRegistry, CallState, ExternalCallParams};
use crate::routing::{matcher, RouteResult};
use crate::store::{RuleStore, SubscriberStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Leg operations requested from the vendor signaling layer once a
/// routing or termination decision is reached.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn bridge(&self, extension: &str, vendor_call_id: &str) -> Result<()>;
    async fn terminate(&self, vendor_call_id: &str) -> Result<()>;
}

/// Composition point between the routing evaluator, the session registry,
/// the extension directory and the signaling transport. Consumes typed
/// signaling events and drives the session state machine; all registry
/// mutation stays synchronous, external lookups are awaited before the
/// registry is touched.
pub struct CallOrchestrator {
    registry: Arc<CallSessionRegistry>,
    directory: Arc<ExtensionDirectory>,
    rules: Arc<dyn RuleStore>,
    subscribers: Arc<dyn SubscriberStore>,
    transport: Arc<dyn SignalingTransport>,
    callrecord_sender: Option<CallRecordSender>,
    cancel_token: CancellationToken,
}

impl CallOrchestrator {
    pub fn new(
        registry: Arc<CallSessionRegistry>,
        directory: Arc<ExtensionDirectory>,
        rules: Arc<dyn RuleStore>,
        subscribers: Arc<dyn SubscriberStore>,
        transport: Arc<dyn SignalingTransport>,
    ) -> Self {
        Self {
            registry,
            directory,
            rules,
            subscribers,
            transport,
            callrecord_sender: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_callrecord_sender(mut self, sender: CallRecordSender) -> Self {
        self.callrecord_sender = Some(sender);
        self
    }

    pub fn registry(&self) -> &Arc<CallSessionRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ExtensionDirectory> {
        &self.directory
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Routing decision for an inbound call, evaluated against the current
    /// rule set at the current time. Called by the inbound-call handler
    /// before bridging.
    pub async fn evaluate_routing(
        &self,
        phone_number_id: &str,
        caller_number: &str,
    ) -> Result<RouteResult> {
        matcher::evaluate(
            self.rules.as_ref(),
            self.subscribers.as_ref(),
            phone_number_id,
            caller_number,
            Utc::now(),
        )
        .await
    }

    /// Route an externally-originated call and, on a decision, create the
    /// session and ask the transport to bridge the leg. Returns `None`
    /// when no route exists; the caller decides what to play back.
    pub async fn handle_inbound_call(
        &self,
        phone_number_id: &str,
        caller_number: &str,
        vendor_call_id: &str,
    ) -> Result<Option<CallSession>> {
        let decision = match self.evaluate_routing(phone_number_id, caller_number).await? {
            RouteResult::Deliver(decision) => decision,
            RouteResult::NoRoute => {
                info!(
                    "no route for inbound call {} -> {}, rejecting",
                    caller_number, phone_number_id
                );
                return Ok(None);
            }
        };

        let call_id = Uuid::new_v4().to_string();
        let session = self.registry.create_external_call(ExternalCallParams {
            call_id: call_id.clone(),
            vendor_call_id: vendor_call_id.to_string(),
            from_number: caller_number.to_string(),
            to_party: decision.party.clone(),
            to_extension: decision.extension.clone(),
        })?;

        if let Err(e) = self
            .transport
            .bridge(&decision.extension, vendor_call_id)
            .await
        {
            warn!("bridge failed for call {}: {}", call_id, e);
            if let Some(session) = self.registry.update_state(&call_id, CallState::Failed) {
                self.emit_record(&session, HangupReason::Failed);
            }
            return Err(e);
        }

        Ok(Some(session))
    }

    /// Ring `to_extension` on behalf of `from_party`. Returns `None` when
    /// the extension is not registered or its party is already in a call.
    pub async fn dial_internal(
        &self,
        from_party: &str,
        to_extension: &str,
    ) -> Result<Option<CallSession>> {
        let to_party = match self.directory.lookup_party_by_extension(to_extension) {
            Some(party) => party,
            None => {
                info!("extension {} not registered", to_extension);
                return Ok(None);
            }
        };
        if self.registry.is_party_in_call(&to_party) {
            info!("{} is busy, refusing to ring {}", to_party, to_extension);
            return Ok(None);
        }

        let from_extension = self
            .directory
            .lookup_extension_by_party(from_party)
            .unwrap_or_default();
        let call_id = Uuid::new_v4().to_string();
        let session = self.registry.create_internal_call(
            &call_id,
            from_party,
            &from_extension,
            &to_party,
            to_extension,
        )?;
        Ok(Some(session))
    }

    /// Terminate a call on behalf of either party. Idempotent: a call
    /// already gone is a no-op.
    pub async fn hangup(&self, call_id: &str, reason: HangupReason) {
        if let Some(session) = self.registry.end(call_id) {
            self.finish_external_leg(&session).await;
            self.emit_record(&session, reason);
        }
    }

    /// React to one signaling event. The reaction is a pure function of
    /// (current session state, event); late or duplicated events for gone
    /// calls degrade to logged no-ops inside the registry.
    pub async fn handle_event(&self, event: SignalingEvent) -> Result<()> {
        match event {
            SignalingEvent::InboundCall {
                phone_number_id,
                caller_number,
                vendor_call_id,
            } => {
                self.handle_inbound_call(&phone_number_id, &caller_number, &vendor_call_id)
                    .await?;
            }
            SignalingEvent::Answered { call_id } => {
                self.registry.update_state(&call_id, CallState::Connected);
            }
            SignalingEvent::Rejected { call_id } => {
                if let Some(session) = self.registry.update_state(&call_id, CallState::Failed) {
                    self.finish_external_leg(&session).await;
                    self.emit_record(&session, HangupReason::Rejected);
                }
            }
            SignalingEvent::StatusChanged { call_id, status } => {
                self.handle_status_change(&call_id, &status).await;
            }
            SignalingEvent::Completed { call_id } => {
                if let Some(session) = self.registry.end(&call_id) {
                    let reason = if session.answered_at.is_some() {
                        HangupReason::ByCaller
                    } else {
                        HangupReason::NoAnswer
                    };
                    self.emit_record(&session, reason);
                }
            }
            SignalingEvent::PartyConnected { party, extension } => {
                self.directory.register(&party, &extension);
            }
            SignalingEvent::PartyDisconnected { party } => {
                self.directory.unregister(&party);
                // A dropped connection abandons any call the party was on.
                while let Some(session) = self.registry.find_active_session_for_party(&party) {
                    if self.registry.end(&session.call_id).is_some() {
                        self.finish_external_leg(&session).await;
                        self.emit_record(&session, HangupReason::BySystem);
                    }
                }
            }
        }
        Ok(())
    }

    /// Map a vendor status callback onto the state machine.
    async fn handle_status_change(&self, call_id: &str, status: &str) {
        match status {
            "ringing" | "queued" | "initiated" => {
                debug!("call {} vendor status {}", call_id, status);
            }
            "connecting" => {
                self.registry.update_state(call_id, CallState::Connecting);
            }
            "in-progress" | "answered" => {
                self.registry.update_state(call_id, CallState::Connected);
            }
            "completed" => {
                if let Some(session) = self.registry.end(call_id) {
                    self.emit_record(&session, HangupReason::ByCallee);
                }
            }
            "busy" | "no-answer" => {
                if let Some(session) = self.registry.update_state(call_id, CallState::Failed) {
                    self.finish_external_leg(&session).await;
                    self.emit_record(&session, HangupReason::NoAnswer);
                }
            }
            "failed" | "canceled" => {
                if let Some(session) = self.registry.update_state(call_id, CallState::Failed) {
                    self.finish_external_leg(&session).await;
                    self.emit_record(&session, HangupReason::Failed);
                }
            }
            other => {
                warn!("unhandled vendor status '{}' for call {}", other, call_id);
            }
        }
    }

    /// Ask the transport to drop the vendor leg of an external session.
    /// Terminate failures are logged, not propagated: the session is
    /// already gone from the registry.
    async fn finish_external_leg(&self, session: &CallSession) {
        if let Some(vendor_call_id) = session.vendor_call_id() {
            if let Err(e) = self.transport.terminate(vendor_call_id).await {
                warn!(
                    "terminate failed for vendor call {}: {}",
                    vendor_call_id, e
                );
            }
        }
    }

    fn emit_record(&self, session: &CallSession, reason: HangupReason) {
        if let Some(sender) = &self.callrecord_sender {
            let record = CallRecord::from_session(session, reason);
            if let Err(e) = sender.send(record) {
                warn!("failed to emit call record for {}: {}", session.call_id, e);
            }
        }
    }

    /// Drain the signaling event queue until cancelled or the senders are
    /// gone. Events are applied in arrival order, which keeps per-call
    /// transitions ordered on top of the registry's own atomicity.
    pub async fn serve(&self, mut events: EventReceiver) {
        loop {
            select! {
                _ = self.cancel_token.cancelled() => {
                    info!("orchestrator stopped");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_event(event).await {
                                warn!("failed to handle signaling event: {}", e);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}
