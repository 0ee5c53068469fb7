//! Presentation contract: how item state changes reach the user surface.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::store::{ItemFailure, ItemId};
use crate::verdict::AnalysisResult;

/// Receives item state changes from the orchestrator.
///
/// Calls are made from the item's run task and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait Presentation: Send + Sync {
    /// Latest human-readable status of an analyzing item.
    fn on_progress(&self, id: ItemId, message: &str);

    /// Round `step` of `total` is about to start.
    fn on_round_advance(&self, id: ItemId, step: u32, total: u32);

    /// Accumulated streamed text of the running round.
    fn on_partial(&self, id: ItemId, text: &str);

    fn on_complete(&self, id: ItemId, result: &AnalysisResult);

    fn on_error(&self, id: ItemId, failure: &ItemFailure);
}

/// Presentation callback as a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PresentationEvent {
    Progress {
        id: ItemId,
        message: String,
    },
    RoundAdvance {
        id: ItemId,
        step: u32,
        total: u32,
    },
    Partial {
        id: ItemId,
        text: String,
    },
    Completed {
        id: ItemId,
        result: AnalysisResult,
    },
    Failed {
        id: ItemId,
        failure: ItemFailure,
    },
}

impl PresentationEvent {
    /// JSON-RPC notification method for this event.
    pub fn method(&self) -> &'static str {
        match self {
            PresentationEvent::Progress { .. } => "analysis/progress",
            PresentationEvent::RoundAdvance { .. } => "analysis/round",
            PresentationEvent::Partial { .. } => "analysis/partial",
            PresentationEvent::Completed { .. } => "analysis/completed",
            PresentationEvent::Failed { .. } => "analysis/failed",
        }
    }

    pub fn id(&self) -> ItemId {
        match self {
            PresentationEvent::Progress { id, .. }
            | PresentationEvent::RoundAdvance { id, .. }
            | PresentationEvent::Partial { id, .. }
            | PresentationEvent::Completed { id, .. }
            | PresentationEvent::Failed { id, .. } => *id,
        }
    }

    /// Whether the event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PresentationEvent::Completed { .. } | PresentationEvent::Failed { .. }
        )
    }

    /// Notification params.
    pub fn params(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Forwards every callback as a [`PresentationEvent`] on an unbounded
/// channel. Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelPresentation {
    tx: UnboundedSender<PresentationEvent>,
}

impl ChannelPresentation {
    pub fn new() -> (Self, UnboundedReceiver<PresentationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: PresentationEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(method = e.0.method(), "Presentation receiver gone, dropping event");
        }
    }
}

impl Presentation for ChannelPresentation {
    fn on_progress(&self, id: ItemId, message: &str) {
        self.send(PresentationEvent::Progress {
            id,
            message: message.to_string(),
        });
    }

    fn on_round_advance(&self, id: ItemId, step: u32, total: u32) {
        self.send(PresentationEvent::RoundAdvance { id, step, total });
    }

    fn on_partial(&self, id: ItemId, text: &str) {
        self.send(PresentationEvent::Partial {
            id,
            text: text.to_string(),
        });
    }

    fn on_complete(&self, id: ItemId, result: &AnalysisResult) {
        self.send(PresentationEvent::Completed {
            id,
            result: result.clone(),
        });
    }

    fn on_error(&self, id: ItemId, failure: &ItemFailure) {
        self.send(PresentationEvent::Failed {
            id,
            failure: failure.clone(),
        });
    }
}
