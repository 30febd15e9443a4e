use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Shapes shared by the WebSocket and HTTP surfaces.
pub mod common;
/// Healthcheck response.
pub mod health;
/// Room phase as exposed to clients.
pub mod phase;
/// Read-only HTTP payloads.
pub mod public;
pub mod validation;
pub mod ws;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
