/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Session finalizer feeding the leaderboard store.
pub mod leaderboard_service;
/// Public service for read-only room and leaderboard information.
pub mod public_service;
/// Question retrieval with timeout and fallback.
pub mod question_service;
/// Delivery of room effects to connections, timers and the finalizer.
pub mod room_events;
/// Join, leave, start and answer operations on rooms.
pub mod room_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
