// Copyright (c) 2025 - Cowboy AI, Inc.
//! Finite State Machine Abstractions
//!
//! Generic state machine types used to model lifecycles during evaluation.
//! Transitions are pure: a new state is computed from the current state and
//! an input, and nothing else changes.
//!
//! # Machines
//!
//! - [`node_lifecycle`]: one node's progress through an apply
//!   (`Planned → Applying → Applied | Failed`, or `Skipped`)
//! - [`deployment`]: a rolling service deployment guarded by a circuit
//!   breaker (`Pending → RollingOut → Steady | RolledBack`)
//!
//! Both are Mealy machines:
//!
//! ```text
//! (State, Input) → (State, Output)
//! ```
//!
//! # Example
//!
//! ```rust
//! use webhook_topology::state_machine::StateMachine;
//! use webhook_topology::state_machine::node_lifecycle::{NodeEvent, NodePhase};
//!
//! let (phase, _) = NodePhase::Planned.transition(&NodeEvent::Start).unwrap();
//! assert_eq!(phase, NodePhase::Applying);
//! ```

pub mod deployment;
pub mod node_lifecycle;

/// Result of a state transition
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Transition failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The new state broke an invariant
    #[error("Postcondition violated: {0}")]
    PostconditionViolated(String),

    #[error("State {0} is terminal")]
    Terminal(String),
}

/// A Mealy machine over typed inputs and outputs
pub trait StateMachine: Sized + Clone {
    type Input;
    type Output;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)>;

    fn can_transition(&self, input: &Self::Input) -> bool {
        self.transition(input).is_ok()
    }

    /// Inputs accepted in the current state
    fn valid_inputs(&self) -> Vec<Self::Input>
    where
        Self::Input: Clone,
    {
        Vec::new()
    }
}

/// States with invariants checked after every transition
pub trait StateInvariant {
    fn check_invariants(&self) -> Result<(), String>;
}

/// One recorded step
#[derive(Debug, Clone)]
pub struct TransitionRecord<S, I> {
    pub from: S,
    pub to: S,
    pub input: I,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// A machine plus the steps it has taken
#[derive(Debug, Clone)]
pub struct TrackedMachine<M: StateMachine> {
    state: M,
    history: Vec<TransitionRecord<M, M::Input>>,
}

impl<M: StateMachine> TrackedMachine<M> {
    pub fn new(initial: M) -> Self {
        Self {
            state: initial,
            history: Vec::new(),
        }
    }

    /// Take one step and record it
    pub fn step(&mut self, input: M::Input, at: chrono::DateTime<chrono::Utc>) -> TransitionResult<M::Output> {
        let (next, output) = self.state.transition(&input)?;
        let from = std::mem::replace(&mut self.state, next.clone());
        self.history.push(TransitionRecord {
            from,
            to: next,
            input,
            at,
        });
        Ok(output)
    }

    /// Take one step unless the resulting state breaks an invariant
    ///
    /// A refused step leaves the state and history unchanged.
    pub fn step_checked(&mut self, input: M::Input, at: chrono::DateTime<chrono::Utc>) -> TransitionResult<M::Output>
    where
        M: StateInvariant,
    {
        let (next, _) = self.state.transition(&input)?;
        next.check_invariants().map_err(TransitionError::PostconditionViolated)?;
        self.step(input, at)
    }

    pub fn history(&self) -> &[TransitionRecord<M, M::Input>] {
        &self.history
    }

    pub fn state(&self) -> &M {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::node_lifecycle::{NodeEvent, NodePhase};
    use super::*;
    use chrono::Utc;

    /// Counter that must stay below three
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Bounded(u8);

    impl StateMachine for Bounded {
        type Input = ();
        type Output = ();

        fn transition(&self, _: &()) -> TransitionResult<(Self, ())> {
            Ok((Bounded(self.0 + 1), ()))
        }
    }

    impl StateInvariant for Bounded {
        fn check_invariants(&self) -> Result<(), String> {
            if self.0 >= 3 {
                return Err(format!("counter reached {}", self.0));
            }
            Ok(())
        }
    }

    #[test]
    fn test_steps_are_recorded() {
        let mut machine = TrackedMachine::new(NodePhase::Planned);
        machine.step(NodeEvent::Start, Utc::now()).unwrap();
        machine.step(NodeEvent::Succeed, Utc::now()).unwrap();

        assert_eq!(*machine.state(), NodePhase::Applied);
        assert_eq!(machine.history().len(), 2);
        assert_eq!(machine.history()[0].from, NodePhase::Planned);
        assert_eq!(machine.history()[1].to, NodePhase::Applied);
    }

    #[test]
    fn test_checked_step_refuses_invariant_break() {
        let mut machine = TrackedMachine::new(Bounded(1));
        machine.step_checked((), Utc::now()).unwrap();

        let result = machine.step_checked((), Utc::now());
        assert!(matches!(result, Err(TransitionError::PostconditionViolated(_))));
        assert_eq!(*machine.state(), Bounded(2));
        assert_eq!(machine.history().len(), 1);
    }
}
