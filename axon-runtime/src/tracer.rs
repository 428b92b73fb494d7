//! Tracer (§4.10).
//!
//! Appends events to an in-memory span tree and serialises it to JSON on
//! request. Event *shapes* live in `axon_core::trace_event`; event
//! *accumulation* lives here, in the orchestration layer, using the same
//! `chrono::Utc::now()` timestamp convention for span ordering.

use axon_core::identity::{EntityIdType, SpanId, StepId, TraceId};
use axon_core::trace_event::{ExecutionStatus, StepRecord, Trace, TraceEvent, TraceEventKind};

/// Accumulates trace events for one execution and finalises them into a
/// `Trace` (§6.3). Parent-span ids are threaded explicitly by the caller
/// (the executor), which is the only component that knows the nesting
/// (flow → step → retry attempt → tool call).
pub struct Tracer {
    trace_id: TraceId,
    program: String,
    persona: String,
    started_at: axon_core::identity::Timestamp,
    events: Vec<TraceEvent>,
    steps: Vec<StepRecord>,
}

impl Tracer {
    pub fn new(program: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            trace_id: TraceId::now_v7(),
            program: program.into(),
            persona: persona.into(),
            started_at: chrono::Utc::now(),
            events: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Records a raw event at a given span, with its parent span id for
    /// nesting and its step id when one applies. Events accumulate in
    /// call order, which is monotonic-timestamp order within a span
    /// because the executor only ever calls this from the single thread
    /// walking the DAG (§5's ordering guarantee).
    pub fn record(&mut self, span_id: SpanId, parent_span_id: Option<SpanId>, step_id: Option<StepId>, payload: TraceEventKind) {
        self.events.push(TraceEvent {
            trace_id: self.trace_id,
            span_id,
            parent_span_id,
            step_id,
            timestamp: chrono::Utc::now(),
            payload,
        });
    }

    pub fn record_step(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Finalise the trace. `status` is the flow's terminal outcome.
    pub fn finish(self, status: ExecutionStatus) -> Trace {
        let mut events = self.events;
        events.push(TraceEvent {
            trace_id: self.trace_id,
            span_id: SpanId::now_v7(),
            parent_span_id: None,
            step_id: None,
            timestamp: chrono::Utc::now(),
            payload: TraceEventKind::FlowEnd { status },
        });
        Trace {
            trace_id: self.trace_id,
            program: self.program,
            persona: self.persona,
            started_at: self.started_at,
            completed_at: Some(chrono::Utc::now()),
            steps: self.steps,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_trace_has_a_terminal_flow_end_event() {
        let mut tracer = Tracer::new("F", "P");
        tracer.record(SpanId::now_v7(), None, None, TraceEventKind::FlowStart { flow: "F".into() });
        let trace = tracer.finish(ExecutionStatus::Success);
        assert!(matches!(
            trace.events.last().unwrap().payload,
            TraceEventKind::FlowEnd { status: ExecutionStatus::Success }
        ));
        assert!(trace.completed_at.is_some());
    }

    #[test]
    fn trace_serialises_to_json() {
        let tracer = Tracer::new("F", "P");
        let trace = tracer.finish(ExecutionStatus::Success);
        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.contains("\"program\":\"F\""));
    }
}
