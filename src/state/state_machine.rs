use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Lifecycle phases of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Lobby: players join and leave, the host may start a session.
    Waiting,
    /// A session is running and questions are being delivered.
    Active,
    /// The last question closed; results are being published before the room returns to waiting.
    Finished,
}

/// Indicates why a session reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every question of the session has been closed.
    QuestionsExhausted,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// The host starts a session from the lobby.
    StartGame,
    /// The session is over.
    Finish(FinishReason),
    /// Results are out; reopen the lobby for another session.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: RoomPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoomEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: RoomPhase,
        /// Current phase.
        actual: RoomPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Failure of an immediate (plan + apply) transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Planning was refused.
    Plan(PlanError),
    /// The plan could not be applied.
    Apply(ApplyError),
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: RoomPhase,
    /// Phase the state machine will transition to.
    pub to: RoomPhase,
    /// Event that triggered this transition.
    pub event: RoomEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// State machine driving one room through `Waiting -> Active -> Finished -> Waiting`.
///
/// Transitions needing asynchronous work in between (fetching questions before a session starts)
/// are split into `plan`, then `apply` or `abort`, so that concurrent attempts are refused while one
/// is in flight.
#[derive(Debug, Clone)]
pub struct RoomStateMachine {
    phase: RoomPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for RoomStateMachine {
    fn default() -> Self {
        Self {
            phase: RoomPhase::Waiting,
            version: 0,
            pending: None,
        }
    }
}

impl RoomStateMachine {
    /// Create a new state machine initialised in the waiting state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Whether a planned transition awaits apply/abort.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: RoomEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event.clone())
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RoomPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it, returning the state machine to its previous state.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Plan and apply in one step, for transitions with no work in between.
    pub fn transition(&mut self, event: RoomEvent) -> Result<RoomPhase, TransitionError> {
        let plan = self.plan(event).map_err(TransitionError::Plan)?;
        self.apply(plan.id).map_err(TransitionError::Apply)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (RoomPhase::Waiting, RoomEvent::StartGame) => RoomPhase::Active,
            (RoomPhase::Active, RoomEvent::Finish(..)) => RoomPhase::Finished,
            (RoomPhase::Finished, RoomEvent::Reset) => RoomPhase::Waiting,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut RoomStateMachine, event: RoomEvent) -> RoomPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_waiting() {
        let sm = RoomStateMachine::new();
        assert_eq!(sm.phase(), RoomPhase::Waiting);
        assert_eq!(sm.version, 0);
    }

    #[test]
    fn full_session_cycle_returns_to_waiting() {
        let mut sm = RoomStateMachine::new();

        assert_eq!(apply(&mut sm, RoomEvent::StartGame), RoomPhase::Active);
        assert_eq!(
            apply(&mut sm, RoomEvent::Finish(FinishReason::QuestionsExhausted)),
            RoomPhase::Finished
        );
        assert_eq!(apply(&mut sm, RoomEvent::Reset), RoomPhase::Waiting);
        assert_eq!(sm.version, 3);
        assert_eq!(apply(&mut sm, RoomEvent::StartGame), RoomPhase::Active);
    }

    #[test]
    fn starting_an_active_room_is_invalid() {
        let mut sm = RoomStateMachine::new();
        apply(&mut sm, RoomEvent::StartGame);

        let err = sm.plan(RoomEvent::StartGame).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, RoomPhase::Active);
                assert_eq!(invalid.event, RoomEvent::StartGame);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finishing_twice_is_refused() {
        let mut sm = RoomStateMachine::new();
        apply(&mut sm, RoomEvent::StartGame);
        sm.transition(RoomEvent::Finish(FinishReason::QuestionsExhausted))
            .unwrap();

        let err = sm
            .transition(RoomEvent::Finish(FinishReason::QuestionsExhausted))
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Plan(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn pending_plan_blocks_other_plans() {
        let mut sm = RoomStateMachine::new();
        let plan = sm.plan(RoomEvent::StartGame).unwrap();
        assert!(sm.has_pending());
        assert_eq!(
            sm.pending.as_ref().map(|plan| plan.to),
            Some(RoomPhase::Active)
        );
        assert_eq!(
            sm.plan(RoomEvent::StartGame).unwrap_err(),
            PlanError::AlreadyPending
        );

        sm.apply(plan.id).unwrap();
        assert!(!sm.has_pending());
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan_pending() {
        let mut sm = RoomStateMachine::new();
        let plan = sm.plan(RoomEvent::StartGame).unwrap();

        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert!(sm.has_pending());
        assert_eq!(sm.apply(plan.id).unwrap(), RoomPhase::Active);
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = RoomStateMachine::new();
        let plan = sm.plan(RoomEvent::StartGame).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), RoomPhase::Waiting);
        assert_eq!(sm.abort(plan.id).unwrap_err(), AbortError::NoPending);
    }
}
