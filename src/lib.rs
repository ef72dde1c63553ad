//! matchcall - Echtzeit Call-Engine der Job-Matching-App
//!
//! Baut Sprach- und Video-Anrufe zwischen zwei angemeldeten Benutzern über
//! einen zentralen Signaling-Server auf, überträgt Media als gerahmte
//! Relay-Nachrichten und passt die Stream-Qualität laufend an die
//! gemessene Netzwerklage an:
//! - Signaling über eine persistente WebSocket-Verbindung
//! - Capture-Produzenten mit Sprach-Gate und Frame-Drosselung
//! - Netzwerk-Sampler mit adaptiver Profilwahl
//! - Latest-wins-Wiedergabe der Gegenseite
//!
//! Die Engine ist eine Bibliothek; Oberfläche, Kontakte und alles andere
//! rund um den Anruf liefert die einbettende Anwendung. Sie konsumiert den
//! beobachtbaren [`CallState`] samt Events und steuert über die Kommandos
//! des [`CallEngine`].

pub mod call;
pub mod media;
pub mod quality;
pub mod signaling;

pub use call::{
    CallEngine, CallError, CallMessage, CallSession, CallState, EngineEvent,
    NetworkMetricsSnapshot,
};
pub use media::{MediaError, RemoteFrame, VideoFrame};
pub use quality::{QualityTier, StreamProfile, TransportKind};
pub use signaling::{SignalingError, SignalingEvent};

use crate::media::{GateSettings, VideoSettings};
use crate::signaling::ConnectOptions;
use std::time::Duration;

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Konfiguration des Call-Engines
///
/// Identität und Anzeigename kommen von der einbettenden Anwendung; die
/// Server-URL lässt sich über die Umgebungsvariable `SIGNALING_URL`
/// überschreiben.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub server_url: String,
    pub user_id: String,
    pub user_name: String,
    /// Verbindungs- und Reconnect-Policy des Signaling-Clients
    pub connect: ConnectOptions,
    /// Kamera-Auswahl, Frame-Drosselung und Start-Profil
    pub video: VideoSettings,
    /// Schwelle und Hysterese des Sprach-Gates
    pub voice_gate: GateSettings,
    /// Abtastintervall des Netzwerk-Samplers
    pub sampler_interval: Duration,
}

impl EngineConfig {
    /// Konfiguration mit Standardwerten für die gegebene Identität
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            server_url: default_signaling_url(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            connect: ConnectOptions::default(),
            video: VideoSettings::default(),
            voice_gate: GateSettings::default(),
            sampler_interval: crate::quality::SAMPLE_INTERVAL,
        }
    }
}

/// Default Signaling-URL (über Umgebungsvariable überschreibbar)
pub fn default_signaling_url() -> String {
    std::env::var("SIGNALING_URL")
        .unwrap_or_else(|_| "https://call-signaling.jobmatch.app".to_string())
}
