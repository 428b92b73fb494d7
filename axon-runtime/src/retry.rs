//! The `refine` primitive (§4.7).
//!
//! Shaped like a `BackoffStrategy`/`RetryPolicy`/`AgentAction::can_retry()`
//! state machine, reusing `axon_core::config::BackoffPolicy::delay_for_attempt`
//! for the actual delay arithmetic rather than re-deriving it — `axon-core`
//! already carries that logic for the executor's ambient defaults, and
//! a `refine` block's own backoff is the same three-variant policy.
//!
//! Modeled as an explicit per-step state machine rather than nested
//! error-handling control flow (§9's design note), so the trace events
//! and cancellation points fall out of the transitions instead of being
//! threaded through by hand.

use axon_core::config::BackoffPolicy;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Backoff as it appears in the IR's `refine.backoff` JSON (see
/// `axon_dsl::ir::refine_json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSpec {
    None,
    Linear { increment_ms: u64 },
    Exponential { base_ms: u64 },
}

impl BackoffSpec {
    pub fn to_policy(&self) -> BackoffPolicy {
        match self {
            BackoffSpec::None => BackoffPolicy::None,
            BackoffSpec::Linear { increment_ms } => BackoffPolicy::Linear {
                increment_ms: *increment_ms,
            },
            BackoffSpec::Exponential { base_ms } => BackoffPolicy::Exponential { base_ms: *base_ms },
        }
    }
}

/// `on_exhaustion` as it appears in the IR's `refine.on_exhaustion` JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExhaustionSpec {
    Raise { error: String },
    Escalate,
    Fallback { value: Value },
}

/// A step's `refine { ... }` block, deserialised from the IR config blob.
#[derive(Debug, Clone, Deserialize)]
pub struct RefineSpec {
    pub max_attempts: u32,
    pub backoff: BackoffSpec,
    pub pass_failure_context: bool,
    pub on_exhaustion: ExhaustionSpec,
}

/// §4.7's state machine: `Fresh -> Attempting -> (Passed | Failed) ->
/// Refining(n) -> ... -> Exhausted`.
#[derive(Debug, Clone, PartialEq)]
pub enum RefineState {
    Fresh,
    Attempting { attempt: u32 },
    Passed,
    Failed { attempt: u32, reason: String },
    Refining { attempt: u32 },
    Exhausted { attempts: u32 },
}

/// The prior rejected output plus the reason it was rejected (§4.7's
/// "previous_attempt + why_rejected" block), carried into the next
/// attempt only when `pass_failure_context` is set.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub previous_output: Value,
    pub why_rejected: String,
}

pub struct RefineMachine {
    state: RefineState,
}

impl RefineMachine {
    pub fn new() -> Self {
        Self {
            state: RefineState::Fresh,
        }
    }

    pub fn state(&self) -> &RefineState {
        &self.state
    }

    /// Enter `Attempting` for the next attempt number and return it
    /// (1-indexed).
    pub fn begin_attempt(&mut self) -> u32 {
        let attempt = match &self.state {
            RefineState::Fresh => 1,
            RefineState::Refining { attempt } => *attempt,
            other => unreachable!("begin_attempt called from {other:?}"),
        };
        self.state = RefineState::Attempting { attempt };
        attempt
    }

    pub fn record_pass(&mut self) {
        self.state = RefineState::Passed;
    }

    /// Records a failed attempt and, given the step's `refine` spec (if
    /// any), decides whether to schedule a retry. Returns the delay to
    /// wait before the next attempt, or `None` if the step is exhausted
    /// (either because there's no `refine` block, or `max_attempts` has
    /// been reached).
    pub fn record_failure(&mut self, reason: String, spec: Option<&RefineSpec>) -> Option<Duration> {
        let attempt = match self.state {
            RefineState::Attempting { attempt } => attempt,
            _ => 1,
        };
        self.state = RefineState::Failed {
            attempt,
            reason,
        };

        match spec {
            Some(spec) if attempt < spec.max_attempts => {
                let next = attempt + 1;
                self.state = RefineState::Refining { attempt: next };
                Some(spec.backoff.to_policy().delay_for_attempt(next))
            }
            _ => {
                self.state = RefineState::Exhausted { attempts: attempt };
                None
            }
        }
    }
}

impl Default for RefineMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_machine_begins_at_attempt_one() {
        let mut machine = RefineMachine::new();
        assert_eq!(machine.begin_attempt(), 1);
        assert!(matches!(machine.state(), RefineState::Attempting { attempt: 1 }));
    }

    #[test]
    fn pass_transitions_to_passed() {
        let mut machine = RefineMachine::new();
        machine.begin_attempt();
        machine.record_pass();
        assert_eq!(machine.state(), &RefineState::Passed);
    }

    #[test]
    fn failure_without_refine_spec_exhausts_immediately() {
        let mut machine = RefineMachine::new();
        machine.begin_attempt();
        let delay = machine.record_failure("bad output".to_string(), None);
        assert!(delay.is_none());
        assert_eq!(machine.state(), &RefineState::Exhausted { attempts: 1 });
    }

    #[test]
    fn failure_within_max_attempts_schedules_a_refinement() {
        let spec = RefineSpec {
            max_attempts: 2,
            backoff: BackoffSpec::None,
            pass_failure_context: true,
            on_exhaustion: ExhaustionSpec::Escalate,
        };
        let mut machine = RefineMachine::new();
        machine.begin_attempt();
        let delay = machine.record_failure("bad".to_string(), Some(&spec));
        assert_eq!(delay, Some(Duration::from_millis(0)));
        assert!(matches!(machine.state(), RefineState::Refining { attempt: 2 }));

        assert_eq!(machine.begin_attempt(), 2);
        let delay = machine.record_failure("still bad".to_string(), Some(&spec));
        assert!(delay.is_none());
        assert_eq!(machine.state(), &RefineState::Exhausted { attempts: 2 });
    }

    #[test]
    fn linear_backoff_scales_with_attempt_number() {
        let spec = RefineSpec {
            max_attempts: 3,
            backoff: BackoffSpec::Linear { increment_ms: 100 },
            pass_failure_context: false,
            on_exhaustion: ExhaustionSpec::Escalate,
        };
        let mut machine = RefineMachine::new();
        machine.begin_attempt();
        let delay = machine.record_failure("bad".to_string(), Some(&spec));
        assert_eq!(delay, Some(Duration::from_millis(200)));
    }

    #[test]
    fn refine_json_shapes_deserialise() {
        let json = serde_json::json!({
            "max_attempts": 2,
            "backoff": { "kind": "linear", "increment_ms": 200 },
            "pass_failure_context": true,
            "on_exhaustion": { "kind": "fallback", "value": "safe" },
        });
        let spec: RefineSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.max_attempts, 2);
        assert!(matches!(spec.backoff, BackoffSpec::Linear { increment_ms: 200 }));
        assert!(matches!(spec.on_exhaustion, ExhaustionSpec::Fallback { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever `max_attempts` a refine spec declares, a machine that
        /// fails every attempt always ends `Exhausted` with exactly
        /// `max_attempts` recorded, never more and never fewer.
        #[test]
        fn prop_repeated_failure_exhausts_at_exactly_max_attempts(max_attempts in 1u32..10) {
            let spec = RefineSpec {
                max_attempts,
                backoff: BackoffSpec::None,
                pass_failure_context: false,
                on_exhaustion: ExhaustionSpec::Escalate,
            };
            let mut machine = RefineMachine::new();
            let mut last_delay = Some(Duration::from_millis(0));
            while last_delay.is_some() {
                machine.begin_attempt();
                last_delay = machine.record_failure("bad".to_string(), Some(&spec));
            }
            prop_assert_eq!(machine.state(), &RefineState::Exhausted { attempts: max_attempts });
        }
    }
}
