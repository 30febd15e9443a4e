//! One room per group: roster, host, session progress and answer collection.
//!
//! Every operation is synchronous and returns the [`RoomEffect`]s it produced. The caller holds the
//! room lock while it runs the operation and dispatches the effects, which makes the room the
//! serialization point for everything happening in a group.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::LeaderboardDelta,
    dto::{
        common::{FinalScoreDto, PlayerSummary, QuestionView, RoomSnapshot},
        format_system_time,
        ws::{
            AdvanceReason, AnswerSubmittedEvent, ErrorCode, GameEndedEvent, GameStartedEvent,
            HostChangedEvent, PlayerJoinedEvent, PlayerLeftEvent, QuestionDeliveredEvent,
            QuestionEndedEvent, RoomJoinedEvent, ScoresUpdatedEvent, ServerMessage,
        },
    },
    state::{
        game::{
            AnswerRecord, ConnectionId, GroupId, JoiningPlayer, Player, Question, SessionId, UserId,
        },
        scoring,
        state_machine::{FinishReason, PlanError, PlanId, RoomEvent, RoomPhase, RoomStateMachine},
        timer::DeadlineKey,
    },
};

/// Limits applied to every room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Players admitted to the room.
    pub max_players: usize,
    /// Players required before the host may start.
    pub min_players_to_start: usize,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            max_players: 12,
            min_players_to_start: 1,
        }
    }
}

/// Side effect requested by a room operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEffect {
    /// Deliver to one connection.
    Send {
        /// Recipient connection.
        to: ConnectionId,
        /// Message to deliver.
        message: ServerMessage,
    },
    /// Deliver to a roster snapshot taken when the effect was produced.
    Broadcast {
        /// Recipient connections.
        recipients: Vec<ConnectionId>,
        /// Message to deliver.
        message: ServerMessage,
    },
    /// Arm the room deadline, replacing any pending one.
    ScheduleDeadline {
        /// Question the deadline closes.
        key: DeadlineKey,
        /// When it fires.
        at: Instant,
    },
    /// Disarm the room deadline.
    CancelDeadline,
    /// Hand a finished session to the leaderboard finalizer.
    Finalize(LeaderboardDelta),
}

/// Rule violations reported by room operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The roster is full.
    #[error("room is full ({max} players)")]
    CapacityExceeded {
        /// Configured capacity.
        max: usize,
    },
    /// The connection holds no seat in the room.
    #[error("connection is not part of this room")]
    NotInRoom,
    /// Only the host may do this.
    #[error("only the host can start the game")]
    NotHost,
    /// Too few players to start.
    #[error("at least {required} player(s) needed to start, {present} present")]
    NotEnoughPlayers {
        /// Configured minimum.
        required: usize,
        /// Players seated.
        present: usize,
    },
    /// A session is already running.
    #[error("a game is already running in this room")]
    GameAlreadyActive,
    /// Another start is being prepared.
    #[error("a game start is already in progress")]
    StartPending,
    /// The answer names a question other than the open one.
    #[error("answer targets question {got} while question {expected} is open")]
    StaleQuestion {
        /// Index of the open question.
        expected: usize,
        /// Index named by the answer.
        got: usize,
    },
    /// No question is open.
    #[error("no question is currently open")]
    NoActiveQuestion,
    /// The submitted choice is not offered.
    #[error("`{0}` is not one of the offered choices")]
    InvalidChoice(String),
    /// The question source produced nothing playable.
    #[error("no questions available for the session")]
    NoQuestions,
    /// The room is being torn down.
    #[error("room is closed")]
    Closed,
    /// The reserved start was no longer valid when questions arrived.
    #[error("game start was superseded")]
    StartAborted,
}

impl RoomError {
    /// Stable wire code for the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CapacityExceeded { .. } => ErrorCode::RoomCapacityExceeded,
            Self::NotInRoom | Self::Closed => ErrorCode::NotInRoom,
            Self::NotHost => ErrorCode::NotHost,
            Self::NotEnoughPlayers { .. } => ErrorCode::NotEnoughPlayers,
            Self::GameAlreadyActive => ErrorCode::GameAlreadyActive,
            Self::StartPending => ErrorCode::StartPending,
            Self::StaleQuestion { .. } => ErrorCode::StaleQuestion,
            Self::NoActiveQuestion => ErrorCode::NoActiveQuestion,
            Self::InvalidChoice(_) => ErrorCode::InvalidChoice,
            Self::NoQuestions => ErrorCode::ServiceUnavailable,
            Self::StartAborted => ErrorCode::Internal,
        }
    }
}

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// The user already had a seat; this connection took it over.
    pub rejoined: bool,
    /// Connection that held the seat before a rejoin.
    pub replaced_connection: Option<ConnectionId>,
    /// Effects to dispatch.
    pub effects: Vec<RoomEffect>,
}

/// Result of a successful leave.
#[derive(Debug)]
pub struct LeaveOutcome {
    /// Player who left.
    pub user_id: UserId,
    /// The roster is now empty and the room must be destroyed.
    pub emptied: bool,
    /// Effects to dispatch.
    pub effects: Vec<RoomEffect>,
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    questions: Vec<Question>,
    current_index: usize,
    delivered_at: Instant,
    deadline: Instant,
    answers: HashMap<(UserId, usize), AnswerRecord>,
}

impl Session {
    fn current_question(&self) -> &Question {
        &self.questions[self.current_index]
    }

    fn delivered_event(&self, now: Instant) -> QuestionDeliveredEvent {
        let remaining = self.deadline.saturating_duration_since(now);
        QuestionDeliveredEvent {
            session_id: self.id,
            question_index: self.current_index,
            question_count: self.questions.len(),
            question: QuestionView::from(self.current_question()),
            deadline: format_system_time(SystemTime::now() + remaining),
            remaining_ms: millis(remaining),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Live room of one group.
#[derive(Debug)]
pub struct Room {
    group_id: GroupId,
    policy: RoomPolicy,
    machine: RoomStateMachine,
    /// Roster in join order.
    players: IndexMap<UserId, Player>,
    session: Option<Session>,
    /// Answers of the last finished session, kept until the next one starts.
    finished_answers: HashMap<(UserId, usize), AnswerRecord>,
    closed: bool,
}

impl Room {
    /// Empty room in `Waiting`.
    pub fn new(group_id: impl Into<GroupId>, policy: RoomPolicy) -> Self {
        Self {
            group_id: group_id.into(),
            policy,
            machine: RoomStateMachine::new(),
            players: IndexMap::new(),
            session: None,
            finished_answers: HashMap::new(),
            closed: false,
        }
    }

    /// Group owning the room.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RoomPhase {
        self.machine.phase()
    }

    /// A closed room is about to leave the registry and accepts nothing.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse every further operation.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Whether no player is seated.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Number of seated players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Seat of `user_id`.
    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.get(user_id)
    }

    /// Seat bound to `connection_id`.
    pub fn player_by_connection(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.players
            .values()
            .find(|player| player.connection_id == connection_id)
    }

    /// Current host.
    pub fn host(&self) -> Option<&Player> {
        self.players.values().find(|player| player.is_host)
    }

    /// Connections of every member, in join order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.players.values().map(|p| p.connection_id).collect()
    }

    /// Identifier of the running session.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Index of the open question.
    pub fn current_question_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.current_index)
    }

    /// Recorded answer of `user_id` to question `question_index` of the running session.
    pub fn answer(&self, user_id: &str, question_index: usize) -> Option<&AnswerRecord> {
        self.session
            .as_ref()?
            .answers
            .get(&(user_id.to_string(), question_index))
    }

    /// Answer recorded in the running session, or in the last finished one while the room waits.
    fn recorded_answer(&self, key: &(UserId, usize)) -> Option<&AnswerRecord> {
        match &self.session {
            Some(session) => session.answers.get(key),
            None => self.finished_answers.get(key),
        }
    }

    /// Attach a player, or hand an existing seat over to a new connection.
    pub fn join(&mut self, joining: JoiningPlayer, now: Instant) -> Result<JoinOutcome, RoomError> {
        if self.closed {
            return Err(RoomError::Closed);
        }

        let connection_id = joining.connection_id;
        let user_id = joining.user_id.clone();

        let (rejoined, replaced_connection) = match self.players.get_mut(&user_id) {
            Some(existing) => {
                let previous = existing.connection_id;
                existing.connection_id = connection_id;
                existing.display_name = joining.display_name;
                (true, (previous != connection_id).then_some(previous))
            }
            None => {
                if self.players.len() >= self.policy.max_players {
                    return Err(RoomError::CapacityExceeded {
                        max: self.policy.max_players,
                    });
                }
                let is_host = self.players.is_empty();
                self.players
                    .insert(user_id.clone(), Player::new(joining, is_host, now));
                (false, None)
            }
        };

        let Some(player) = self.players.get(&user_id) else {
            return Err(RoomError::NotInRoom);
        };
        let summary = PlayerSummary::from(player);
        let is_host = player.is_host;
        info!(
            group_id = %self.group_id,
            %user_id,
            %connection_id,
            is_host,
            rejoined,
            "player joined room"
        );

        let mut effects = vec![RoomEffect::Send {
            to: connection_id,
            message: ServerMessage::RoomJoined(RoomJoinedEvent {
                user_id,
                is_host,
                rejoined,
                room: self.snapshot(now),
            }),
        }];

        let others: Vec<_> = self
            .connection_ids()
            .into_iter()
            .filter(|id| *id != connection_id)
            .collect();
        if !others.is_empty() {
            effects.push(RoomEffect::Broadcast {
                recipients: others,
                message: ServerMessage::PlayerJoined(PlayerJoinedEvent {
                    player: summary,
                    rejoined,
                    player_count: self.players.len(),
                }),
            });
        }

        if self.machine.phase() == RoomPhase::Active {
            if let Some(session) = &self.session {
                effects.push(RoomEffect::Send {
                    to: connection_id,
                    message: ServerMessage::QuestionDelivered(session.delivered_event(now)),
                });
            }
        }

        Ok(JoinOutcome {
            rejoined,
            replaced_connection,
            effects,
        })
    }

    /// Remove the player bound to `connection_id`, migrating host and re-checking the advance
    /// condition as needed.
    pub fn leave(&mut self, connection_id: ConnectionId, now: Instant) -> Result<LeaveOutcome, RoomError> {
        let Some(user_id) = self
            .player_by_connection(connection_id)
            .map(|p| p.user_id.clone())
        else {
            return Err(RoomError::NotInRoom);
        };
        let Some(player) = self.players.shift_remove(&user_id) else {
            return Err(RoomError::NotInRoom);
        };
        info!(group_id = %self.group_id, %user_id, %connection_id, "player left room");

        if self.players.is_empty() {
            self.closed = true;
            let mut effects = Vec::new();
            if let Some(session) = self.session.take() {
                info!(
                    group_id = %self.group_id,
                    session_id = %session.id,
                    "session abandoned by every player"
                );
                effects.push(RoomEffect::CancelDeadline);
            }
            return Ok(LeaveOutcome {
                user_id,
                emptied: true,
                effects,
            });
        }

        let mut effects = vec![RoomEffect::Broadcast {
            recipients: self.connection_ids(),
            message: ServerMessage::PlayerLeft(PlayerLeftEvent {
                user_id: user_id.clone(),
                display_name: player.display_name.clone(),
                player_count: self.players.len(),
            }),
        }];

        if player.is_host {
            if let Some(next) = self.players.values_mut().min_by_key(|p| p.joined_at) {
                next.is_host = true;
                info!(group_id = %self.group_id, user_id = %next.user_id, "host migrated");
                let message = ServerMessage::HostChanged(HostChangedEvent {
                    user_id: next.user_id.clone(),
                    display_name: next.display_name.clone(),
                });
                effects.push(RoomEffect::Broadcast {
                    recipients: self.connection_ids(),
                    message,
                });
            }
        }

        if self.machine.phase() == RoomPhase::Active && self.all_answered() {
            effects.extend(self.close_question(AdvanceReason::AllAnswered, now));
        }

        Ok(LeaveOutcome {
            user_id,
            emptied: false,
            effects,
        })
    }

    /// First half of starting a game: check the rules and reserve the `Waiting -> Active`
    /// transition while questions are fetched.
    pub fn plan_start(&mut self, connection_id: ConnectionId) -> Result<PlanId, RoomError> {
        if self.closed {
            return Err(RoomError::Closed);
        }
        let player = self
            .player_by_connection(connection_id)
            .ok_or(RoomError::NotInRoom)?;
        if !player.is_host {
            return Err(RoomError::NotHost);
        }
        if self.machine.phase() != RoomPhase::Waiting {
            return Err(RoomError::GameAlreadyActive);
        }
        if self.machine.has_pending() {
            return Err(RoomError::StartPending);
        }
        if self.players.len() < self.policy.min_players_to_start {
            return Err(RoomError::NotEnoughPlayers {
                required: self.policy.min_players_to_start,
                present: self.players.len(),
            });
        }

        let plan = self.machine.plan(RoomEvent::StartGame).map_err(|err| match err {
            PlanError::AlreadyPending => RoomError::StartPending,
            PlanError::InvalidTransition(_) => RoomError::GameAlreadyActive,
        })?;
        Ok(plan.id)
    }

    /// Release a start reservation made by [`Room::plan_start`].
    pub fn abort_start(&mut self, plan_id: PlanId) {
        if let Err(err) = self.machine.abort(plan_id) {
            debug!(group_id = %self.group_id, ?err, "start plan already gone");
        }
    }

    /// Second half of starting a game: apply the reserved transition and deliver question 0.
    pub fn begin_session(
        &mut self,
        plan_id: PlanId,
        questions: Vec<Question>,
        now: Instant,
    ) -> Result<Vec<RoomEffect>, RoomError> {
        if self.closed {
            return Err(RoomError::Closed);
        }
        if questions.is_empty() {
            self.abort_start(plan_id);
            return Err(RoomError::NoQuestions);
        }
        self.machine.apply(plan_id).map_err(|err| {
            warn!(group_id = %self.group_id, ?err, "failed to apply start plan");
            RoomError::StartAborted
        })?;

        let session_id = Uuid::new_v4();
        for player in self.players.values_mut() {
            player.score = 0;
            player.has_answered_current_question = false;
        }
        let question_count = questions.len();
        self.finished_answers.clear();
        self.session = Some(Session {
            id: session_id,
            questions,
            current_index: 0,
            delivered_at: now,
            deadline: now,
            answers: HashMap::new(),
        });
        info!(group_id = %self.group_id, %session_id, question_count, "session started");

        let mut effects = vec![RoomEffect::Broadcast {
            recipients: self.connection_ids(),
            message: ServerMessage::GameStarted(GameStartedEvent {
                session_id,
                question_count,
                players: self.player_summaries(),
            }),
        }];
        effects.extend(self.deliver_current_question(now));
        Ok(effects)
    }

    /// Record an answer from the player bound to `connection_id`.
    ///
    /// A second answer to the same question is acknowledged with `accepted: false` and scores
    /// nothing.
    pub fn submit_answer(
        &mut self,
        connection_id: ConnectionId,
        question_index: usize,
        choice: &str,
        now: Instant,
    ) -> Result<Vec<RoomEffect>, RoomError> {
        if self.closed {
            return Err(RoomError::Closed);
        }
        let user_id = self
            .player_by_connection(connection_id)
            .map(|p| p.user_id.clone())
            .ok_or(RoomError::NotInRoom)?;

        // The first answer may already have closed the question, or the whole session.
        let key = (user_id.clone(), question_index);
        if let Some(is_correct) = self.recorded_answer(&key).map(|record| record.is_correct) {
            debug!(group_id = %self.group_id, %user_id, question_index, "duplicate answer ignored");
            let total_score = self.players.get(&user_id).map_or(0, |p| p.score);
            return Ok(vec![RoomEffect::Send {
                to: connection_id,
                message: ServerMessage::AnswerSubmitted(AnswerSubmittedEvent {
                    question_index,
                    accepted: false,
                    is_correct,
                    points_awarded: 0,
                    total_score,
                }),
            }]);
        }

        if self.machine.phase() != RoomPhase::Active {
            return Err(RoomError::NoActiveQuestion);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(RoomError::NoActiveQuestion);
        };
        if question_index != session.current_index {
            return Err(RoomError::StaleQuestion {
                expected: session.current_index,
                got: question_index,
            });
        }

        let question = session.current_question();
        if !question.offers(choice) {
            return Err(RoomError::InvalidChoice(choice.to_string()));
        }
        let scored = scoring::score_answer(question, choice);
        let latency = now.saturating_duration_since(session.delivered_at);
        let record = AnswerRecord {
            session_id: session.id,
            user_id: user_id.clone(),
            question_index,
            submitted_choice: choice.to_string(),
            is_correct: scored.is_correct,
            points_awarded: scored.points_awarded,
            latency,
        };
        session.answers.insert(key, record);

        let total_score = match self.players.get_mut(&user_id) {
            Some(player) => {
                player.score = player.score.saturating_add(scored.points_awarded);
                player.has_answered_current_question = true;
                player.score
            }
            None => 0,
        };
        debug!(
            group_id = %self.group_id,
            %user_id,
            question_index,
            is_correct = scored.is_correct,
            latency_ms = millis(latency),
            "answer recorded"
        );

        let answered = self
            .players
            .values()
            .filter(|p| p.has_answered_current_question)
            .count();
        let mut effects = vec![
            RoomEffect::Send {
                to: connection_id,
                message: ServerMessage::AnswerSubmitted(AnswerSubmittedEvent {
                    question_index,
                    accepted: true,
                    is_correct: scored.is_correct,
                    points_awarded: scored.points_awarded,
                    total_score,
                }),
            },
            RoomEffect::Broadcast {
                recipients: self.connection_ids(),
                message: ServerMessage::ScoresUpdated(ScoresUpdatedEvent {
                    question_index,
                    answered,
                    players: self.player_summaries(),
                }),
            },
        ];

        if self.all_answered() {
            effects.extend(self.close_question(AdvanceReason::AllAnswered, now));
        }
        Ok(effects)
    }

    /// Deadline callback. A key not matching the open question is stale and ignored.
    pub fn deadline_elapsed(&mut self, key: DeadlineKey, now: Instant) -> Vec<RoomEffect> {
        if self.closed || self.machine.phase() != RoomPhase::Active {
            return Vec::new();
        }
        match &self.session {
            Some(session)
                if session.id == key.session_id && session.current_index == key.question_index => {}
            _ => {
                debug!(group_id = %self.group_id, ?key, "stale deadline ignored");
                return Vec::new();
            }
        }
        self.close_question(AdvanceReason::DeadlineElapsed, now)
    }

    /// Mark the room closed and hand back every bound connection.
    pub fn teardown(&mut self) -> Vec<ConnectionId> {
        self.closed = true;
        self.session = None;
        self.finished_answers.clear();
        let connections = self.connection_ids();
        self.players.clear();
        connections
    }

    /// Public view of the room, with the time left on the open question.
    pub fn snapshot(&self, now: Instant) -> RoomSnapshot {
        let session = self.session.as_ref();
        RoomSnapshot {
            group_id: self.group_id.clone(),
            phase: self.machine.phase().into(),
            host_user_id: self.host().map(|p| p.user_id.clone()),
            players: self.player_summaries(),
            session_id: session.map(|s| s.id),
            current_question_index: session.map(|s| s.current_index),
            question_count: session.map(|s| s.questions.len()),
            remaining_ms: session.map(|s| millis(s.deadline.saturating_duration_since(now))),
        }
    }

    fn player_summaries(&self) -> Vec<PlayerSummary> {
        self.players.values().map(PlayerSummary::from).collect()
    }

    fn all_answered(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .values()
                .all(|p| p.has_answered_current_question)
    }

    fn deliver_current_question(&mut self, now: Instant) -> Vec<RoomEffect> {
        let recipients = self.connection_ids();
        for player in self.players.values_mut() {
            player.has_answered_current_question = false;
        }
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.delivered_at = now;
        session.deadline = now + session.current_question().time_limit;
        let key = DeadlineKey {
            session_id: session.id,
            question_index: session.current_index,
        };
        debug!(group_id = %self.group_id, question_index = key.question_index, "question delivered");

        vec![
            RoomEffect::Broadcast {
                recipients,
                message: ServerMessage::QuestionDelivered(session.delivered_event(now)),
            },
            RoomEffect::ScheduleDeadline {
                key,
                at: session.deadline,
            },
        ]
    }

    fn close_question(&mut self, reason: AdvanceReason, now: Instant) -> Vec<RoomEffect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let question_index = session.current_index;
        let correct_choice = session.current_question().correct_choice.clone();
        let has_next = question_index + 1 < session.questions.len();
        if has_next {
            session.current_index += 1;
        }

        let mut effects = vec![
            RoomEffect::CancelDeadline,
            RoomEffect::Broadcast {
                recipients: self.connection_ids(),
                message: ServerMessage::QuestionEnded(QuestionEndedEvent {
                    question_index,
                    correct_choice,
                    reason,
                }),
            },
        ];
        if has_next {
            effects.extend(self.deliver_current_question(now));
        } else {
            effects.extend(self.finish_session());
        }
        effects
    }

    fn finish_session(&mut self) -> Vec<RoomEffect> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        if let Err(err) = self
            .machine
            .transition(RoomEvent::Finish(FinishReason::QuestionsExhausted))
        {
            warn!(group_id = %self.group_id, ?err, "unexpected finish transition failure");
        }

        let result = scoring::finalize_session(&self.group_id, session.id, self.players.values());
        info!(
            group_id = %self.group_id,
            session_id = %session.id,
            winners = ?result.winners(),
            "session finished"
        );
        let message = ServerMessage::GameEnded(GameEndedEvent {
            session_id: session.id,
            final_scores: result.final_scores.iter().map(FinalScoreDto::from).collect(),
            winners: result.winners(),
            leaderboard_delta: result.delta.clone(),
        });
        let effects = vec![
            RoomEffect::Broadcast {
                recipients: self.connection_ids(),
                message,
            },
            RoomEffect::Finalize(result.delta),
        ];

        for player in self.players.values_mut() {
            player.has_answered_current_question = false;
        }
        self.finished_answers = session.answers;
        if let Err(err) = self.machine.transition(RoomEvent::Reset) {
            warn!(group_id = %self.group_id, ?err, "unexpected reset transition failure");
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Difficulty;

    fn policy() -> RoomPolicy {
        RoomPolicy {
            max_players: 3,
            min_players_to_start: 1,
        }
    }

    fn joining(user: &str) -> JoiningPlayer {
        JoiningPlayer {
            connection_id: Uuid::new_v4(),
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
        }
    }

    fn question(id: &str, seconds: u64) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("prompt {id}"),
            choices: vec!["right".into(), "wrong".into()],
            correct_choice: "right".into(),
            category: "misc".into(),
            difficulty: Difficulty::Easy,
            time_limit: Duration::from_secs(seconds),
            point_value: 10,
        }
    }

    fn events(effects: &[RoomEffect]) -> Vec<&'static str> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                RoomEffect::Send { message, .. } | RoomEffect::Broadcast { message, .. } => {
                    Some(message.event_name())
                }
                _ => None,
            })
            .collect()
    }

    fn finalized(effects: &[RoomEffect]) -> Option<&LeaderboardDelta> {
        effects.iter().find_map(|effect| match effect {
            RoomEffect::Finalize(delta) => Some(delta),
            _ => None,
        })
    }

    fn scheduled(effects: &[RoomEffect]) -> Option<DeadlineKey> {
        effects.iter().find_map(|effect| match effect {
            RoomEffect::ScheduleDeadline { key, .. } => Some(*key),
            _ => None,
        })
    }

    /// Room with `users` joined (first is host) and a session over `questions` started.
    fn started_room(users: &[&str], questions: usize, now: Instant) -> (Room, Vec<ConnectionId>) {
        let mut room = Room::new("smiths", policy());
        let mut connections = Vec::new();
        for user in users {
            let joining = joining(user);
            connections.push(joining.connection_id);
            room.join(joining, now).unwrap();
        }
        let plan = room.plan_start(connections[0]).unwrap();
        let questions = (0..questions).map(|i| question(&format!("q{i}"), 10)).collect();
        room.begin_session(plan, questions, now).unwrap();
        (room, connections)
    }

    #[test]
    fn first_joiner_becomes_host_and_others_are_notified() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        let ann = joining("ann");
        let ann_conn = ann.connection_id;

        let outcome = room.join(ann, now).unwrap();
        assert_eq!(events(&outcome.effects), ["room-joined"]);
        assert!(room.player("ann").unwrap().is_host);

        let bob = joining("bob");
        let outcome = room.join(bob, now).unwrap();
        assert_eq!(events(&outcome.effects), ["room-joined", "player-joined"]);
        match &outcome.effects[1] {
            RoomEffect::Broadcast { recipients, .. } => assert_eq!(recipients, &vec![ann_conn]),
            other => panic!("unexpected effect: {other:?}"),
        }
        assert!(!room.player("bob").unwrap().is_host);
        assert_eq!(room.host().unwrap().user_id, "ann");
    }

    #[test]
    fn join_beyond_capacity_is_refused() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        for user in ["a", "b", "c"] {
            room.join(joining(user), now).unwrap();
        }
        let err = room.join(joining("d"), now).unwrap_err();
        assert_eq!(err, RoomError::CapacityExceeded { max: 3 });
        assert_eq!(err.code(), ErrorCode::RoomCapacityExceeded);
        assert_eq!(room.player_count(), 3);
    }

    #[test]
    fn rejoin_takes_over_the_seat() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        let first = joining("ann");
        let old_conn = first.connection_id;
        room.join(first, now).unwrap();

        let second = joining("ann");
        let new_conn = second.connection_id;
        let outcome = room.join(second, now).unwrap();

        assert!(outcome.rejoined);
        assert_eq!(outcome.replaced_connection, Some(old_conn));
        assert_eq!(room.player_count(), 1);
        assert_eq!(room.player("ann").unwrap().connection_id, new_conn);
        assert_eq!(room.leave(old_conn, now).unwrap_err(), RoomError::NotInRoom);
    }

    #[test]
    fn host_leaving_promotes_earliest_joiner() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        let ann = joining("ann");
        let ann_conn = ann.connection_id;
        room.join(ann, now).unwrap();
        room.join(joining("bob"), now).unwrap();
        room.join(joining("cid"), now).unwrap();

        let outcome = room.leave(ann_conn, now).unwrap();
        assert!(!outcome.emptied);
        assert_eq!(events(&outcome.effects), ["player-left", "host-changed"]);
        assert_eq!(room.host().unwrap().user_id, "bob");
        assert_eq!(room.players.values().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn rejoin_keeps_tenure_for_host_migration() {
        let start = Instant::now();
        let mut room = Room::new("smiths", policy());
        let ann = joining("ann");
        let ann_conn = ann.connection_id;
        room.join(ann, start).unwrap();
        room.join(joining("bob"), start + Duration::from_secs(1)).unwrap();
        room.join(joining("cid"), start + Duration::from_secs(2)).unwrap();
        room.join(joining("bob"), start + Duration::from_secs(3)).unwrap();

        room.leave(ann_conn, start + Duration::from_secs(4)).unwrap();
        let host = room.host().unwrap();
        assert_eq!(host.user_id, "bob");
        assert_eq!(host.joined_at, start + Duration::from_secs(1));
    }

    #[test]
    fn last_leave_during_session_abandons_it() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann"], 2, now);

        let outcome = room.leave(connections[0], now).unwrap();
        assert!(outcome.emptied);
        assert!(room.is_closed());
        assert_eq!(outcome.effects, vec![RoomEffect::CancelDeadline]);
        assert!(finalized(&outcome.effects).is_none());
    }

    #[test]
    fn start_rules_are_enforced() {
        let now = Instant::now();
        let mut room = Room::new(
            "smiths",
            RoomPolicy {
                max_players: 3,
                min_players_to_start: 2,
            },
        );
        let ann = joining("ann");
        let ann_conn = ann.connection_id;
        room.join(ann, now).unwrap();
        assert_eq!(
            room.plan_start(ann_conn).unwrap_err(),
            RoomError::NotEnoughPlayers {
                required: 2,
                present: 1
            }
        );

        let bob = joining("bob");
        let bob_conn = bob.connection_id;
        room.join(bob, now).unwrap();
        assert_eq!(room.plan_start(bob_conn).unwrap_err(), RoomError::NotHost);

        let plan = room.plan_start(ann_conn).unwrap();
        assert_eq!(room.plan_start(ann_conn).unwrap_err(), RoomError::StartPending);

        room.begin_session(plan, vec![question("q0", 10)], now).unwrap();
        assert_eq!(room.phase(), RoomPhase::Active);
        assert_eq!(
            room.plan_start(ann_conn).unwrap_err(),
            RoomError::GameAlreadyActive
        );
    }

    #[test]
    fn empty_question_list_releases_the_start() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        let ann = joining("ann");
        let ann_conn = ann.connection_id;
        room.join(ann, now).unwrap();

        let plan = room.plan_start(ann_conn).unwrap();
        assert_eq!(
            room.begin_session(plan, Vec::new(), now).unwrap_err(),
            RoomError::NoQuestions
        );
        assert_eq!(room.phase(), RoomPhase::Waiting);
        assert!(room.plan_start(ann_conn).is_ok());
    }

    #[test]
    fn solo_game_runs_to_completion() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        let ann = joining("ann");
        let conn = ann.connection_id;
        room.join(ann, now).unwrap();

        let plan = room.plan_start(conn).unwrap();
        let effects = room
            .begin_session(plan, vec![question("q0", 10), question("q1", 10)], now)
            .unwrap();
        assert_eq!(events(&effects), ["game-started", "question-delivered"]);
        let session_id = room.session_id().unwrap();
        assert_eq!(
            scheduled(&effects),
            Some(DeadlineKey {
                session_id,
                question_index: 0
            })
        );

        let effects = room.submit_answer(conn, 0, "right", now).unwrap();
        assert_eq!(
            events(&effects),
            [
                "answer-submitted",
                "scores-updated",
                "question-ended",
                "question-delivered"
            ]
        );
        assert_eq!(room.current_question_index(), Some(1));

        let effects = room.submit_answer(conn, 1, "wrong", now).unwrap();
        assert_eq!(
            events(&effects),
            [
                "answer-submitted",
                "scores-updated",
                "question-ended",
                "game-ended"
            ]
        );
        let delta = finalized(&effects).unwrap();
        assert_eq!(delta.session_id, session_id);
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(delta.entries[0].score_delta, 10);
        assert!(delta.entries[0].won_session);

        assert_eq!(room.phase(), RoomPhase::Waiting);
        assert_eq!(room.session_id(), None);
        assert!(room.plan_start(conn).is_ok());
    }

    #[test]
    fn duplicate_answer_scores_once() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann", "bob"], 2, now);
        let ann = connections[0];

        room.submit_answer(ann, 0, "right", now).unwrap();
        let effects = room.submit_answer(ann, 0, "right", now).unwrap();

        assert_eq!(events(&effects), ["answer-submitted"]);
        match &effects[0] {
            RoomEffect::Send {
                message: ServerMessage::AnswerSubmitted(ack),
                ..
            } => {
                assert!(!ack.accepted);
                assert_eq!(ack.points_awarded, 0);
                assert_eq!(ack.total_score, 10);
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        assert_eq!(room.player("ann").unwrap().score, 10);
        assert_eq!(room.current_question_index(), Some(0));
    }

    #[test]
    fn solo_duplicate_after_advance_is_acknowledged() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann"], 3, now);
        let ann = connections[0];

        room.submit_answer(ann, 0, "right", now).unwrap();
        assert_eq!(room.current_question_index(), Some(1));

        let effects = room.submit_answer(ann, 0, "right", now).unwrap();
        assert_eq!(events(&effects), ["answer-submitted"]);
        match &effects[0] {
            RoomEffect::Send {
                message: ServerMessage::AnswerSubmitted(ack),
                ..
            } => {
                assert_eq!(ack.question_index, 0);
                assert!(!ack.accepted);
                assert!(ack.is_correct);
                assert_eq!(ack.points_awarded, 0);
                assert_eq!(ack.total_score, 10);
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        assert_eq!(room.current_question_index(), Some(1));
        assert_eq!(
            room.submit_answer(ann, 2, "right", now).unwrap_err(),
            RoomError::StaleQuestion {
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn duplicate_after_the_session_ended_is_acknowledged() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann"], 1, now);
        let ann = connections[0];

        let effects = room.submit_answer(ann, 0, "wrong", now).unwrap();
        assert!(events(&effects).contains(&"game-ended"));
        assert_eq!(room.phase(), RoomPhase::Waiting);

        let effects = room.submit_answer(ann, 0, "wrong", now).unwrap();
        assert_eq!(events(&effects), ["answer-submitted"]);
        assert!(finalized(&effects).is_none());
        match &effects[0] {
            RoomEffect::Send {
                message: ServerMessage::AnswerSubmitted(ack),
                ..
            } => {
                assert!(!ack.accepted);
                assert!(!ack.is_correct);
            }
            other => panic!("unexpected effect: {other:?}"),
        }

        let plan = room.plan_start(ann).unwrap();
        room.begin_session(plan, vec![question("q0", 10)], now).unwrap();
        let effects = room.submit_answer(ann, 0, "right", now).unwrap();
        match &effects[0] {
            RoomEffect::Send {
                message: ServerMessage::AnswerSubmitted(ack),
                ..
            } => assert!(ack.accepted),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn wrong_index_and_unknown_choice_are_rejected() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann", "bob"], 2, now);
        let ann = connections[0];

        assert_eq!(
            room.submit_answer(ann, 1, "right", now).unwrap_err(),
            RoomError::StaleQuestion {
                expected: 0,
                got: 1
            }
        );
        assert_eq!(
            room.submit_answer(ann, 0, "maybe", now).unwrap_err(),
            RoomError::InvalidChoice("maybe".into())
        );
        assert_eq!(
            room.submit_answer(Uuid::new_v4(), 0, "right", now).unwrap_err(),
            RoomError::NotInRoom
        );
        assert!(room.answer("ann", 0).is_none());
    }

    #[test]
    fn answer_outside_session_is_rejected() {
        let now = Instant::now();
        let mut room = Room::new("smiths", policy());
        let ann = joining("ann");
        let conn = ann.connection_id;
        room.join(ann, now).unwrap();
        assert_eq!(
            room.submit_answer(conn, 0, "right", now).unwrap_err(),
            RoomError::NoActiveQuestion
        );
    }

    #[test]
    fn latency_is_recorded_without_affecting_points() {
        let start = Instant::now();
        let (mut room, connections) = started_room(&["ann", "bob"], 1, start);
        let later = start + Duration::from_secs(7);

        room.submit_answer(connections[0], 0, "right", later).unwrap();
        let record = room.answer("ann", 0).unwrap();
        assert_eq!(record.latency, Duration::from_secs(7));
        assert_eq!(record.points_awarded, 10);
    }

    #[test]
    fn deadline_advances_and_stale_keys_are_ignored() {
        let now = Instant::now();
        let (mut room, _) = started_room(&["ann", "bob"], 2, now);
        let session_id = room.session_id().unwrap();
        let first = DeadlineKey {
            session_id,
            question_index: 0,
        };

        let later = now + Duration::from_secs(10);
        let effects = room.deadline_elapsed(first, later);
        assert_eq!(events(&effects), ["question-ended", "question-delivered"]);
        assert_eq!(room.current_question_index(), Some(1));

        assert!(room.deadline_elapsed(first, later).is_empty());
        let foreign = DeadlineKey {
            session_id: Uuid::new_v4(),
            question_index: 1,
        };
        assert!(room.deadline_elapsed(foreign, later).is_empty());
        assert_eq!(room.current_question_index(), Some(1));
    }

    #[test]
    fn last_deadline_after_all_answered_finish_is_ignored() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann", "bob"], 1, now);
        let last = DeadlineKey {
            session_id: room.session_id().unwrap(),
            question_index: 0,
        };

        let mut effects = room.submit_answer(connections[0], 0, "right", now).unwrap();
        effects.extend(room.submit_answer(connections[1], 0, "wrong", now).unwrap());
        effects.extend(room.deadline_elapsed(last, now + Duration::from_secs(10)));

        let names = events(&effects);
        assert_eq!(names.iter().filter(|name| **name == "game-ended").count(), 1);
        assert_eq!(names.iter().filter(|name| **name == "question-ended").count(), 1);
        let finalizes = effects
            .iter()
            .filter(|effect| matches!(effect, RoomEffect::Finalize(_)))
            .count();
        assert_eq!(finalizes, 1);
        assert_eq!(room.phase(), RoomPhase::Waiting);
    }

    #[test]
    fn leave_of_last_pending_player_advances() {
        let now = Instant::now();
        let (mut room, connections) = started_room(&["ann", "bob"], 2, now);

        room.submit_answer(connections[0], 0, "right", now).unwrap();
        let outcome = room.leave(connections[1], now).unwrap();

        assert_eq!(
            events(&outcome.effects),
            ["player-left", "question-ended", "question-delivered"]
        );
        assert_eq!(room.current_question_index(), Some(1));
    }

    #[test]
    fn mid_question_joiner_sees_remaining_time() {
        let start = Instant::now();
        let (mut room, _) = started_room(&["ann"], 1, start);

        let outcome = room
            .join(joining("bob"), start + Duration::from_secs(4))
            .unwrap();
        assert_eq!(
            events(&outcome.effects),
            ["room-joined", "player-joined", "question-delivered"]
        );
        match &outcome.effects[2] {
            RoomEffect::Send {
                message: ServerMessage::QuestionDelivered(delivered),
                ..
            } => {
                assert_eq!(delivered.question_index, 0);
                assert_eq!(delivered.remaining_ms, 6_000);
            }
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn delivered_question_hides_the_correct_choice() {
        let now = Instant::now();
        let (room, _) = started_room(&["ann"], 1, now);
        let snapshot = room.snapshot(now);
        assert_eq!(snapshot.question_count, Some(1));

        let session = room.session.as_ref().unwrap();
        let value = serde_json::to_value(ServerMessage::QuestionDelivered(
            session.delivered_event(now),
        ))
        .unwrap();
        assert!(value["data"]["question"].get("correctChoice").is_none());
        assert_eq!(value["data"]["remainingMs"], 10_000);
    }
}
