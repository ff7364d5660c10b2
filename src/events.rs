//! Lifecycle events emitted on every step boundary.
//!
//! Events are an ordered observation channel for logging and UI
//! layers: emission order matches execution order exactly. Delivery is
//! best-effort — a dropped receiver is warned about once and never
//! aborts or stalls the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::approval::ApprovalRequest;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecEvent {
    PlanStarted {
        run_id: String,
        goal: String,
        steps: usize,
    },
    StepStarted {
        index: usize,
        kind: &'static str,
    },
    StepCompleted {
        index: usize,
        summary: String,
    },
    StepFailed {
        index: usize,
        error: String,
    },
    ApprovalRequested {
        request: ApprovalRequest,
    },
    PlanCompleted {
        run_id: String,
        steps_run: usize,
        duration_ms: u64,
    },
}

/// Best-effort sender for [`ExecEvent`]s.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ExecEvent>>,
    warned: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ExecEvent>) -> Self {
        Self {
            tx: Some(tx),
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A sink with no observers.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emits an event. Failure to deliver is logged once per sink and
    /// otherwise ignored.
    pub fn emit(&self, event: ExecEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() && !self.warned.swap(true, Ordering::Relaxed) {
                warn!("Event receiver dropped, further events will be discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        sink.emit(ExecEvent::StepStarted {
            index: 0,
            kind: "use_tool",
        });
        sink.emit(ExecEvent::StepCompleted {
            index: 0,
            summary: "ok".to_string(),
        });

        match rx.recv().await.unwrap() {
            ExecEvent::StepStarted { index, kind } => {
                assert_eq!(index, 0);
                assert_eq!(kind, "use_tool");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ExecEvent::StepCompleted { index, .. } => assert_eq!(index, 0),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_to_dropped_receiver_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(tx);
        // first emit flips the warn-once flag, second is silent
        sink.emit(ExecEvent::StepStarted {
            index: 0,
            kind: "summarize",
        });
        sink.emit(ExecEvent::StepFailed {
            index: 0,
            error: "boom".to_string(),
        });
        assert!(sink.warned.load(Ordering::Relaxed));
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = ExecEvent::PlanStarted {
            run_id: "r1".to_string(),
            goal: "demo".to_string(),
            steps: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "plan_started");
        assert_eq!(value["steps"], 3);
    }
}
