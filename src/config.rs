//! Application-level configuration loading: room limits, session defaults, finalizer retry
//! policy, connection buffers, membership roster and the fallback question bank.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{dao::models::QuestionEntity, state::room::RoomPolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_ROOMS_CONFIG_PATH";

const DEFAULT_MAX_PLAYERS: usize = 12;
const DEFAULT_MIN_PLAYERS_TO_START: usize = 1;
const DEFAULT_QUESTION_COUNT: usize = 5;
const DEFAULT_MAX_QUESTION_COUNT: usize = 20;
const DEFAULT_QUESTION_FETCH_TIMEOUT_MS: u64 = 4_000;
const DEFAULT_RETRY_INITIAL_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Room limits.
    pub room: RoomConfig,
    /// Session defaults.
    pub session: SessionConfig,
    /// Leaderboard finalizer retry policy.
    pub leaderboard: LeaderboardConfig,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// `group -> members` roster; groups not listed are open to everyone.
    pub membership: HashMap<String, Vec<String>>,
    /// Replacement for the built-in fallback bank when not empty.
    pub fallback_questions: Vec<QuestionEntity>,
}

/// Per-room limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomConfig {
    /// Players admitted to one room.
    pub max_players: usize,
    /// Players required before the host may start.
    pub min_players_to_start: usize,
}

impl RoomConfig {
    /// Limits handed to every new room.
    pub fn policy(&self) -> RoomPolicy {
        RoomPolicy {
            max_players: self.max_players,
            min_players_to_start: self.min_players_to_start,
        }
    }
}

/// Session defaults applied to `start-game`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Questions per session when `start-game` names no count.
    pub default_question_count: usize,
    /// Upper bound on the questions of one session.
    pub max_question_count: usize,
    /// Time allowed to the question source before the fallback bank is used.
    pub question_fetch_timeout: Duration,
}

impl SessionConfig {
    /// Question count for a start request, defaulted and clamped to the configured maximum.
    pub fn question_count(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_question_count)
            .clamp(1, self.max_question_count)
    }
}

/// Retry policy of the leaderboard finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardConfig {
    /// Delay before the first retry of a failed delta.
    pub retry_initial: Duration,
    /// Ceiling of the exponential backoff.
    pub retry_max: Duration,
}

/// Per-connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        max_players = app_config.room.max_players,
                        restricted_groups = app_config.membership.len(),
                        fallback_questions = app_config.fallback_questions.len(),
                        "loaded config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document. Absent sections and fields keep their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    room: RawRoom,
    session: RawSession,
    leaderboard: RawLeaderboard,
    connection: RawConnection,
    membership: HashMap<String, Vec<String>>,
    fallback_questions: Vec<QuestionEntity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRoom {
    max_players: Option<usize>,
    min_players_to_start: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSession {
    default_question_count: Option<usize>,
    max_question_count: Option<usize>,
    question_fetch_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLeaderboard {
    retry_initial_ms: Option<u64>,
    retry_max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConnection {
    outbound_buffer: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let max_players = value
            .room
            .max_players
            .unwrap_or(DEFAULT_MAX_PLAYERS)
            .max(1);
        let min_players_to_start = value
            .room
            .min_players_to_start
            .unwrap_or(DEFAULT_MIN_PLAYERS_TO_START)
            .clamp(1, max_players);

        let max_question_count = value
            .session
            .max_question_count
            .unwrap_or(DEFAULT_MAX_QUESTION_COUNT)
            .max(1);
        let default_question_count = value
            .session
            .default_question_count
            .unwrap_or(DEFAULT_QUESTION_COUNT)
            .clamp(1, max_question_count);

        let retry_initial_ms = value
            .leaderboard
            .retry_initial_ms
            .unwrap_or(DEFAULT_RETRY_INITIAL_MS)
            .max(1);
        let retry_max_ms = value
            .leaderboard
            .retry_max_ms
            .unwrap_or(DEFAULT_RETRY_MAX_MS)
            .max(retry_initial_ms);

        Self {
            room: RoomConfig {
                max_players,
                min_players_to_start,
            },
            session: SessionConfig {
                default_question_count,
                max_question_count,
                question_fetch_timeout: Duration::from_millis(
                    value
                        .session
                        .question_fetch_timeout_ms
                        .unwrap_or(DEFAULT_QUESTION_FETCH_TIMEOUT_MS),
                ),
            },
            leaderboard: LeaderboardConfig {
                retry_initial: Duration::from_millis(retry_initial_ms),
                retry_max: Duration::from_millis(retry_max_ms),
            },
            connection: ConnectionConfig {
                outbound_buffer: value
                    .connection
                    .outbound_buffer
                    .unwrap_or(DEFAULT_OUTBOUND_BUFFER)
                    .max(1),
            },
            membership: value.membership,
            fallback_questions: value.fallback_questions,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
