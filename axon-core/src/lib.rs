//! Shared identity, error, config and model-client vocabulary for AXON.
//!
//! This crate carries the concerns every other AXON crate leans on:
//! type-safe entity ids, the aggregated error taxonomy, ambient runtime
//! configuration, the abstract model-client and tool traits, confidence
//! defaulting, and the trace-event vocabulary. It holds no lexer, parser,
//! type checker, IR generator, or executor logic — those live in
//! `axon-dsl` and `axon-runtime`.

pub mod config;
pub mod error;
pub mod identity;
pub mod model_client;
pub mod tool;
pub mod trace_event;

pub use config::{BackoffPolicy, EffortLevel, RuntimeConfig};
pub use error::{AxonError, AxonResult, ConfigError, IrError, LexError, ParseError, Position, TypeError, ValidationReason};
pub use identity::{EntityIdType, FlowId, ProgramId, SpanId, StepId, Timestamp, TraceId, AXON_ID_NAMESPACE};
pub use model_client::{
    ConfidenceSource, ModelClient, ModelClientError, ModelRequest, ModelResponse, PreviousAttempt,
    StubModelClient, TokenUsage, resolve_confidence,
};
pub use tool::{StubTool, Tool, ToolError, ToolMode, ToolResult};
pub use trace_event::{ExecutionStatus, StepRecord, Trace, TraceEvent, TraceEventKind};
