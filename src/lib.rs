//! Library crate for trivia-rooms-back, exposing modules for binaries and integration tests.

/// Layered application configuration.
pub mod config;
/// Storage backends and their data models.
pub mod dao;
/// Wire and HTTP data transfer objects.
pub mod dto;
/// Service and API error types.
pub mod error;
/// HTTP and WebSocket route trees.
pub mod routes;
/// Room orchestration, finalization and read-only services.
pub mod services;
/// Shared application state and the in-memory room model.
pub mod state;
