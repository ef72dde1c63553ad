//! Message Types für das Signaling-Protokoll
//!
//! Diese Strukturen spiegeln das JSON-Event-Protokoll des Signaling-Servers
//! wider und ermöglichen typsichere Kommunikation. Alle Felder sind auf dem
//! Draht camelCase, Media-Payloads sind base64-kodiert.

use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Anmeldung nach erfolgreichem Verbindungsaufbau
#[derive(Debug, Clone, Serialize)]
pub struct RegisterPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
}

impl RegisterPayload {
    pub fn new(user_id: String, user_name: String) -> Self {
        Self {
            msg_type: "register",
            user_id,
            user_name,
        }
    }
}

/// Ausgehenden Anruf starten
#[derive(Debug, Clone, Serialize)]
pub struct CallRequestPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "fromUserId")]
    pub from_user_id: String,
    #[serde(rename = "fromUserName")]
    pub from_user_name: String,
    #[serde(rename = "toUserId")]
    pub to_user_id: String,
    #[serde(rename = "isVideoCall")]
    pub is_video_call: bool,
}

impl CallRequestPayload {
    pub fn new(
        room_id: String,
        from_user_id: String,
        from_user_name: String,
        to_user_id: String,
        is_video_call: bool,
    ) -> Self {
        Self {
            msg_type: "call-request",
            room_id,
            from_user_id,
            from_user_name,
            to_user_id,
            is_video_call,
        }
    }
}

/// Eingehenden Anruf annehmen oder ablehnen
#[derive(Debug, Clone, Serialize)]
pub struct CallResponsePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "callId")]
    pub call_id: String,
    pub accepted: bool,
}

impl CallResponsePayload {
    pub fn new(call_id: String, accepted: bool) -> Self {
        Self {
            msg_type: "call-response",
            call_id,
            accepted,
        }
    }
}

/// Relay-Raum betreten
#[derive(Debug, Clone, Serialize)]
pub struct JoinCallPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
}

impl JoinCallPayload {
    pub fn new(room_id: String, user_id: String, user_name: String) -> Self {
        Self {
            msg_type: "join-call",
            room_id,
            user_id,
            user_name,
        }
    }
}

/// Anruf lokal beenden
#[derive(Debug, Clone, Serialize)]
pub struct LeaveCallPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "roomId")]
    pub room_id: String,
}

impl LeaveCallPayload {
    pub fn new(room_id: String) -> Self {
        Self {
            msg_type: "leave-call",
            room_id,
        }
    }
}

/// Ausgehenden Anruf vor Annahme abbrechen
#[derive(Debug, Clone, Serialize)]
pub struct CancelCallPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "callId")]
    pub call_id: String,
}

impl CancelCallPayload {
    pub fn new(call_id: String) -> Self {
        Self {
            msg_type: "cancel-call",
            call_id,
        }
    }
}

/// Heartbeat, hält die Verbindung über Idle-Timeouts hinweg offen
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "userId")]
    pub user_id: String,
}

impl HeartbeatPayload {
    pub fn new(user_id: String) -> Self {
        Self {
            msg_type: "heartbeat",
            user_id,
        }
    }
}

/// Chat-Nachricht innerhalb eines aktiven Anrufs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessagePayload {
    #[serde(rename = "type")]
    #[serde(default = "call_message_type")]
    pub msg_type: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub message: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    /// Millisekunden seit Epoch; beim Senden gesetzt, beim Empfang optional
    #[serde(default)]
    pub timestamp: Option<i64>,
}

fn call_message_type() -> String {
    "call-message".to_string()
}

impl CallMessagePayload {
    pub fn new(
        room_id: String,
        message: String,
        user_id: String,
        user_name: String,
        timestamp: i64,
    ) -> Self {
        Self {
            msg_type: call_message_type(),
            room_id,
            message,
            user_id,
            user_name,
            timestamp: Some(timestamp),
        }
    }
}

// ============================================================================
// MEDIA RELAY (BIDIREKTIONAL)
// ============================================================================

/// Art des Media-Payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// Ein relayter Frame bzw. Audio-Chunk, base64-kodiert
///
/// Wird in beide Richtungen mit identischer Form verwendet: der Client
/// sendet `media-frame` in den Raum, der Server verteilt dieselbe Struktur
/// an den anderen Teilnehmer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFramePayload {
    #[serde(rename = "type")]
    #[serde(default = "media_frame_type")]
    pub msg_type: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "mediaType")]
    pub kind: MediaKind,
    /// JPEG-Bytes, base64 (nur bei `kind == Video`)
    #[serde(rename = "frameData")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_data: Option<String>,
    /// 16-bit PCM little-endian, base64 (nur bei `kind == Audio`)
    #[serde(rename = "audioData")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    /// Millisekunden seit Epoch
    pub timestamp: i64,
}

fn media_frame_type() -> String {
    "media-frame".to_string()
}

impl MediaFramePayload {
    /// Erstellt einen Video-Frame-Payload
    pub fn video(
        room_id: String,
        frame_data: String,
        user_id: String,
        user_name: String,
        timestamp: i64,
    ) -> Self {
        Self {
            msg_type: media_frame_type(),
            room_id,
            kind: MediaKind::Video,
            frame_data: Some(frame_data),
            audio_data: None,
            user_id,
            user_name,
            timestamp,
        }
    }

    /// Erstellt einen Audio-Chunk-Payload
    pub fn audio(
        room_id: String,
        audio_data: String,
        user_id: String,
        user_name: String,
        timestamp: i64,
    ) -> Self {
        Self {
            msg_type: media_frame_type(),
            room_id,
            kind: MediaKind::Audio,
            frame_data: None,
            audio_data: Some(audio_data),
            user_id,
            user_name,
            timestamp,
        }
    }
}

// ============================================================================
// SERVER → CLIENT EVENTS
// ============================================================================

/// Alle möglichen Server-Events
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Registrierung bestätigt
    #[serde(rename = "register-success")]
    RegisterSuccess {
        #[serde(rename = "userId")]
        #[serde(default)]
        user_id: Option<String>,
    },

    /// Registrierung fehlgeschlagen
    #[serde(rename = "register-error")]
    RegisterError {
        #[serde(default)]
        message: Option<String>,
    },

    /// Eingehender Anruf
    #[serde(rename = "incoming-call")]
    IncomingCall {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
        #[serde(rename = "fromUserName")]
        from_user_name: String,
        #[serde(rename = "isVideoCall")]
        is_video_call: bool,
        timestamp: i64,
    },

    /// Anruf wurde serverseitig angelegt (informativ)
    #[serde(rename = "call-started")]
    CallStarted {
        #[serde(rename = "callId")]
        #[serde(default)]
        call_id: Option<String>,
    },

    /// Anrufaufbau fehlgeschlagen (Gegenseite offline o.ä.)
    #[serde(rename = "call-request-failed")]
    CallRequestFailed { reason: String },

    /// Antwort der Gegenseite auf einen ausgehenden Anruf
    #[serde(rename = "call-response")]
    CallResponse {
        #[serde(rename = "callId")]
        call_id: String,
        accepted: bool,
    },

    /// Aufforderung, den Relay-Raum zu betreten
    #[serde(rename = "join-call-room")]
    JoinCallRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Anrufer hat vor Annahme abgebrochen
    #[serde(rename = "call-cancelled")]
    CallCancelled {
        #[serde(rename = "callId")]
        #[serde(default)]
        call_id: Option<String>,
    },

    /// Anruf wurde serverseitig nicht rechtzeitig beantwortet
    #[serde(rename = "call-timeout")]
    CallTimeout {
        #[serde(rename = "callId")]
        #[serde(default)]
        call_id: Option<String>,
    },

    /// Anruf wurde beendet (Gegenseite oder Server)
    #[serde(rename = "call-ended")]
    CallEnded {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Relayter Media-Frame der Gegenseite
    #[serde(rename = "media-frame")]
    MediaFrame(MediaFramePayload),

    /// Chat-Nachricht der Gegenseite
    #[serde(rename = "call-message")]
    CallMessage(CallMessagePayload),

    /// Optionale Netzwerk-Telemetrie des Servers
    #[serde(rename = "network-metrics")]
    NetworkMetrics {
        #[serde(rename = "packetLoss")]
        #[serde(default)]
        packet_loss: Option<f64>,
        #[serde(default)]
        latency: Option<f64>,
        #[serde(default)]
        bandwidth: Option<f64>,
    },

    /// Server-Diagnose zum Media-Relay
    #[serde(rename = "debug-media-info")]
    DebugMediaInfo {
        #[serde(flatten)]
        info: serde_json::Map<String, serde_json::Value>,
    },

    /// Heartbeat-Antwort
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
}
