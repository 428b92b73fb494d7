//! Trace event vocabulary (§3, §4.10).
//!
//! `axon-core` defines the event shapes; `axon-runtime::tracer` accumulates
//! them into a span tree and serialises it to JSON.

use crate::identity::{SpanId, StepId, TraceId};
use crate::identity::Timestamp;
use crate::model_client::ConfidenceSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the 14 trace event kinds (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TraceEventKind {
    FlowStart { flow: String },
    FlowEnd { status: ExecutionStatus },
    StepStart { step: StepId, step_kind: String },
    StepEnd { step: StepId, status: ExecutionStatus },
    AnchorCheck { anchor: String },
    AnchorPass { anchor: String },
    AnchorBreach { anchor: String, reason: String },
    ToolCallStart { tool: String },
    ToolCallEnd { tool: String, ok: bool },
    ValidationPass { step: StepId },
    ValidationFail { step: StepId, reason: String },
    RefineAttempt { step: StepId, attempt: u32 },
    Retry { step: StepId, attempt: u32, delay_ms: u64 },
    FatalError { message: String, code: &'static str },
    Cancelled,
}

/// Terminal status recorded on flow/step end events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Cancelled,
}

/// A single append-only trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub step_id: Option<StepId>,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: TraceEventKind,
}

/// Per-step summary record embedded in the finalised trace (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: StepId,
    pub input_types: Vec<String>,
    pub output_type: String,
    pub confidence: f64,
    pub confidence_source: ConfidenceSource,
    pub anchors_checked: Vec<String>,
    pub anchor_violations: Vec<String>,
    pub tokens_used: u32,
    pub reasoning_trace: Value,
    pub status: ExecutionStatus,
}

/// The finalised, JSON-serialisable trace for one execution (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: TraceId,
    pub program: String,
    pub persona: String,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub steps: Vec<StepRecord>,
    pub events: Vec<TraceEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn trace_event_serialises_with_tagged_payload() {
        let event = TraceEvent {
            trace_id: TraceId::new(Uuid::nil()),
            span_id: SpanId::new(Uuid::nil()),
            parent_span_id: None,
            step_id: None,
            timestamp: chrono::Utc::now(),
            payload: TraceEventKind::FlowStart {
                flow: "F".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "FlowStart");
        assert_eq!(json["flow"], "F");
    }

    #[test]
    fn trace_round_trips_through_json() {
        let trace = Trace {
            trace_id: TraceId::now_v7(),
            program: "P".to_string(),
            persona: "Persona".to_string(),
            started_at: chrono::Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            events: Vec::new(),
        };
        let json = serde_json::to_string(&trace).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trace_id, trace.trace_id);
    }
}
