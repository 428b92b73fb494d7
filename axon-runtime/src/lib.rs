//! AXON runtime — executes a compiled `ProgramIr` against a model backend,
//! tool registry and memory store.
//!
//! ```text
//! ProgramIr
//!     ↓
//! Executor::run (DAG walk)
//!     ↓  per step: dispatch → anchor gate → validate → refine/retry → commit
//! RunOutcome (value + trace)
//! ```
//!
//! The pieces below are the collaborators the executor orchestrates:
//! `RuntimeContext` (committed step outputs, persona/context/anchors in
//! scope), `validator` (epistemic structural compatibility), `retry`
//! (the refine state machine), `anchor` (pre/post-execution gates),
//! `tool_registry` (config-hash-keyed dispatch) and `memory`
//! (remember/recall backend). `Tracer` accumulates everything into a
//! `Trace` for the run.

pub mod anchor;
pub mod context;
pub mod executor;
pub mod memory;
pub mod retry;
pub mod tool_registry;
pub mod tracer;
pub mod validator;

pub use anchor::{parse_on_violation, post_execution_check, pre_execution_allows, AnchorBreach, ViolationAction};
pub use context::{RuntimeContext, StepOutput};
pub use executor::{CancellationToken, Executor, NeverCancelled, RunOutcome};
pub use memory::{InMemoryStore, MemoryError, MemoryStore};
pub use retry::{BackoffSpec, ExhaustionSpec, FailureContext, RefineMachine, RefineSpec, RefineState};
pub use tool_registry::{ToolDispatchError, ToolRegistry};
pub use tracer::Tracer;
pub use validator::{is_assignable, validate_structure};
