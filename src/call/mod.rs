//! Call-Modul
//!
//! Zustandsmaschine, Sitzungsdaten und die Kommando-Schnittstelle des
//! Call-Engines.

mod engine;
mod session;

pub use engine::{CallEngine, CallError, EngineEvent, NetworkMetricsSnapshot};
pub use session::{CallMessage, CallSession, CallState};
