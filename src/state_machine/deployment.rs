// Copyright (c) 2025 - Cowboy AI, Inc.
//! Rolling Deployment with Circuit Breaker
//!
//! A service deployment replaces running tasks with tasks of a new revision.
//! The orchestrator keeps every previously healthy task serving until the
//! new revision reaches the desired count (minimum healthy 100%, maximum
//! 200%), so a failed rollout never drops capacity.
//!
//! # States
//!
//! - Pending: deployment registered, no task launched
//! - RollingOut: new tasks launching
//! - Steady: new revision fully healthy (terminal)
//! - RolledBack: failed launches reached the threshold (terminal)
//!
//! # Failure threshold
//!
//! ```text
//! threshold(desired) = clamp(ceil(desired / 2), 3, 200)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StateInvariant, StateMachine, TransitionError, TransitionResult};

pub const MIN_FAILURE_THRESHOLD: u32 = 3;
pub const MAX_FAILURE_THRESHOLD: u32 = 200;

/// Failed task launches that trip the breaker
pub fn failure_threshold(desired: u32) -> u32 {
    desired
        .div_ceil(2)
        .clamp(MIN_FAILURE_THRESHOLD, MAX_FAILURE_THRESHOLD)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    Pending,
    RollingOut,
    Steady,
    RolledBack,
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::RollingOut => "rolling_out",
            Self::Steady => "steady",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Deployment input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    Start,
    TaskHealthy,
    TaskFailed,
}

/// Emitted when a deployment reaches a terminal phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Completed { running: u32 },
    RolledBack { failures: u32, serving: u32 },
}

/// One deployment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub phase: DeploymentPhase,
    pub desired: u32,
    /// Healthy tasks of the previous revision
    pub previous: u32,
    /// Healthy tasks of the new revision
    pub healthy: u32,
    pub failures: u32,
}

impl Deployment {
    pub fn new(previous: u32, desired: u32) -> Self {
        Self {
            phase: DeploymentPhase::Pending,
            desired,
            previous,
            healthy: 0,
            failures: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        failure_threshold(self.desired)
    }

    /// Tasks currently serving traffic
    pub fn serving(&self) -> u32 {
        match self.phase {
            DeploymentPhase::Steady => self.healthy,
            DeploymentPhase::RolledBack => self.previous,
            DeploymentPhase::Pending | DeploymentPhase::RollingOut => self.previous + self.healthy,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, DeploymentPhase::Steady | DeploymentPhase::RolledBack)
    }

    /// Feed a sequence of events, stopping at the first terminal phase
    pub fn run(
        mut self,
        events: impl IntoIterator<Item = DeploymentEvent>,
    ) -> TransitionResult<(Self, Option<DeploymentOutcome>)> {
        for event in events {
            let (next, outcome) = self.transition(&event)?;
            self = next;
            if outcome.is_some() {
                return Ok((self, outcome));
            }
        }
        Ok((self, None))
    }
}

impl StateMachine for Deployment {
    type Input = DeploymentEvent;
    type Output = Option<DeploymentOutcome>;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use DeploymentEvent::*;
        use DeploymentPhase::*;

        let mut next = self.clone();
        match (self.phase, input) {
            (Pending, Start) if self.desired == 0 => {
                next.phase = Steady;
                Ok((next, Some(DeploymentOutcome::Completed { running: 0 })))
            }
            (Pending, Start) => {
                next.phase = RollingOut;
                Ok((next, None))
            }
            (RollingOut, TaskHealthy) => {
                next.healthy += 1;
                if next.healthy >= next.desired {
                    next.phase = Steady;
                    let running = next.healthy;
                    return Ok((next, Some(DeploymentOutcome::Completed { running })));
                }
                Ok((next, None))
            }
            (RollingOut, TaskFailed) => {
                next.failures += 1;
                if next.failures >= next.threshold() {
                    next.phase = RolledBack;
                    let outcome = DeploymentOutcome::RolledBack {
                        failures: next.failures,
                        serving: next.previous,
                    };
                    return Ok((next, Some(outcome)));
                }
                Ok((next, None))
            }
            (Steady, _) | (RolledBack, _) => Err(TransitionError::Terminal(self.phase.to_string())),
            (phase, event) => Err(TransitionError::InvalidTransition {
                from: phase.to_string(),
                to: format!("{:?}", event),
            }),
        }
    }

    fn valid_inputs(&self) -> Vec<Self::Input> {
        match self.phase {
            DeploymentPhase::Pending => vec![DeploymentEvent::Start],
            DeploymentPhase::RollingOut => vec![DeploymentEvent::TaskHealthy, DeploymentEvent::TaskFailed],
            DeploymentPhase::Steady | DeploymentPhase::RolledBack => Vec::new(),
        }
    }
}

impl StateInvariant for Deployment {
    fn check_invariants(&self) -> Result<(), String> {
        if !self.is_terminal() && self.serving() < self.previous {
            return Err(format!(
                "serving {} tasks, below the {} previously healthy",
                self.serving(),
                self.previous
            ));
        }
        if self.healthy > self.desired {
            return Err(format!("{} healthy tasks exceed desired {}", self.healthy, self.desired));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1 => 3 ; "floor applies to one task")]
    #[test_case(6 => 3 ; "half of six")]
    #[test_case(9 => 5 ; "rounds up")]
    #[test_case(1000 => 200 ; "ceiling applies")]
    fn test_threshold(desired: u32) -> u32 {
        failure_threshold(desired)
    }

    #[test]
    fn test_successful_rollout() {
        let (deployment, outcome) = Deployment::new(2, 2)
            .run([
                DeploymentEvent::Start,
                DeploymentEvent::TaskFailed,
                DeploymentEvent::TaskHealthy,
                DeploymentEvent::TaskHealthy,
            ])
            .unwrap();

        assert_eq!(deployment.phase, DeploymentPhase::Steady);
        assert_eq!(outcome, Some(DeploymentOutcome::Completed { running: 2 }));
        assert_eq!(deployment.serving(), 2);
    }

    #[test]
    fn test_breaker_rolls_back_and_keeps_previous_tasks() {
        let mut events = vec![DeploymentEvent::Start];
        events.extend(std::iter::repeat(DeploymentEvent::TaskFailed).take(3));

        let (deployment, outcome) = Deployment::new(1, 1).run(events).unwrap();
        assert_eq!(deployment.phase, DeploymentPhase::RolledBack);
        assert_eq!(
            outcome,
            Some(DeploymentOutcome::RolledBack {
                failures: 3,
                serving: 1
            })
        );
        assert_eq!(deployment.serving(), 1);
    }

    #[test]
    fn test_rolled_back_is_terminal() {
        let (deployment, _) = Deployment::new(1, 1)
            .run([
                DeploymentEvent::Start,
                DeploymentEvent::TaskFailed,
                DeploymentEvent::TaskFailed,
                DeploymentEvent::TaskFailed,
            ])
            .unwrap();

        assert!(matches!(
            deployment.transition(&DeploymentEvent::TaskHealthy),
            Err(TransitionError::Terminal(_))
        ));
    }

    #[test]
    fn test_events_before_start_rejected() {
        let deployment = Deployment::new(0, 3);
        assert!(!deployment.can_transition(&DeploymentEvent::TaskHealthy));
        assert_eq!(deployment.valid_inputs(), vec![DeploymentEvent::Start]);
    }
}
