/// CouchDB-backed implementations of the collaborators.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// Leaderboard store abstraction and its in-memory implementation.
pub mod leaderboard;
/// Group membership checks performed before joining a room.
pub mod membership;
/// Persistence model definitions shared with the collaborators.
pub mod models;
/// Question supply abstraction and the built-in fallback bank.
pub mod questions;
/// Error types shared by every collaborator.
pub mod storage;
