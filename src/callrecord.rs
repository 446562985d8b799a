use crate::registry::{CallKind, CallSession};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub type CallRecordSender = tokio::sync::mpsc::UnboundedSender<CallRecord>;
pub type CallRecordReceiver = tokio::sync::mpsc::UnboundedReceiver<CallRecord>;

pub type FnSaveCallRecord = Arc<
    Box<dyn Fn(CallRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Internal,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupReason {
    ByCaller,
    ByCallee,
    BySystem,
    NoAnswer,
    Rejected,
    Failed,
}

/// Terminal record of a finished call, surfaced to the out-of-scope
/// call-history persistence path just before the session is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub direction: CallDirection,
    pub caller: String,
    pub callee: String,
    pub start_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub hangup_reason: HangupReason,
    #[serde(default)]
    pub extras: HashMap<String, serde_json::Value>,
}

impl CallRecord {
    pub fn from_session(session: &CallSession, hangup_reason: HangupReason) -> Self {
        let (direction, caller, callee) = match &session.kind {
            CallKind::Internal {
                from_party,
                to_party,
                ..
            } => (
                CallDirection::Internal,
                from_party.clone(),
                to_party.clone(),
            ),
            CallKind::External {
                from_number,
                to_party,
                ..
            } => (CallDirection::Inbound, from_number.clone(), to_party.clone()),
        };
        Self {
            call_id: session.call_id.clone(),
            direction,
            caller,
            callee,
            start_time: session.created_at,
            answer_time: session.answered_at,
            end_time: Utc::now(),
            hangup_reason,
            extras: HashMap::new(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// Drains terminal call records off the channel and hands each one to the
/// configured saver. The default saver only logs; durable persistence is
/// the embedding layer's job.
pub struct CallRecordManager {
    pub sender: CallRecordSender,
    cancel_token: CancellationToken,
    receiver: CallRecordReceiver,
    saver_fn: FnSaveCallRecord,
}

impl CallRecordManager {
    pub fn new(cancel_token: CancellationToken) -> Self {
        let saver: FnSaveCallRecord =
            Arc::new(Box::new(|record| Box::pin(log_call_record(record))));
        Self::with_saver(cancel_token, saver)
    }

    pub fn with_saver(cancel_token: CancellationToken, saver_fn: FnSaveCallRecord) -> Self {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            sender,
            cancel_token,
            receiver,
            saver_fn,
        }
    }

    pub fn sender(&self) -> CallRecordSender {
        self.sender.clone()
    }

    pub async fn serve(&mut self) {
        loop {
            select! {
                _ = self.cancel_token.cancelled() => {
                    break;
                }
                record = self.receiver.recv() => {
                    match record {
                        Some(record) => {
                            if let Err(e) = (self.saver_fn)(record).await {
                                error!("failed to save call record: {}", e);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

async fn log_call_record(record: CallRecord) -> Result<()> {
    info!(
        call_id = %record.call_id,
        caller = %record.caller,
        callee = %record.callee,
        duration_ms = record.duration_ms(),
        reason = ?record.hangup_reason,
        "call record"
    );
    Ok(())
}
