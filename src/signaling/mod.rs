//! Signaling-Modul
//!
//! Event-basierte Kommunikation mit dem zentralen Signaling-Server:
//! Call-Control (Aufbau, Annahme, Abbruch) und Media-Relay über eine
//! persistente WebSocket-Verbindung.

mod client;
mod messages;

pub use client::{ConnectOptions, SignalingClient, SignalingError, SignalingEvent};
pub use messages::{
    CallMessagePayload, CallRequestPayload, CallResponsePayload, CancelCallPayload,
    HeartbeatPayload, JoinCallPayload, LeaveCallPayload, MediaFramePayload, MediaKind,
    RegisterPayload, ServerEvent,
};
