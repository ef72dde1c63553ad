//! Call-Zustand und Sitzungsdaten
//!
//! `CallState` ist die einzige autoritative Beschreibung dessen, was gerade
//! passiert; `CallSession` trägt die Daten genau eines Anrufversuchs. Beide
//! werden ausschließlich von der [`crate::call::CallEngine`] geschrieben.

use chrono::{DateTime, Utc};

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status des Call-Engines
///
/// Es ist immer genau eine Variante aktiv; Übergänge laufen nur entlang der
/// im Engine implementierten Kanten. Unbekannte Kanten sind No-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Angenommener Anruf, warten auf den Relay-Raum
    Connecting,
    /// Ausgehender Anruf wartet auf Antwort der Gegenseite
    OutgoingCall { remote_user_id: String },
    /// Eingehender Anruf wartet auf Annahme/Ablehnung
    IncomingCall {
        call_id: String,
        remote_user_id: String,
        remote_user_name: String,
        is_video: bool,
    },
    /// Anruf aktiv, Media läuft über den Raum
    InCall { room_id: String },
    /// Fehlgeschlagen; bleibt stehen bis der Benutzer quittiert
    Failed { reason: String },
}

impl CallState {
    /// True solange irgendein Anrufversuch läuft oder ansteht
    pub fn is_busy(&self) -> bool {
        !matches!(self, CallState::Idle | CallState::Failed { .. })
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Daten genau eines Anrufversuchs
///
/// Wird beim Wählen bzw. beim Eintreffen eines eingehenden Anrufs angelegt
/// und bei jedem Ende (Auflegen, Abbruch, Timeout, Ablehnung, Gegenseite)
/// wieder verworfen. Pro Engine existiert höchstens eine Session.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Serverseitig vergebene Call-ID; beim Anrufer erst ab
    /// `call-response`/`join-call-room` bekannt
    pub call_id: Option<String>,
    /// Relay-Raum für Media und Chat
    pub room_id: String,
    pub local_user_id: String,
    pub local_user_name: String,
    pub remote_user_id: String,
    pub remote_user_name: String,
    pub is_video: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// CALL MESSAGES
// ============================================================================

/// Chat-Nachricht innerhalb eines aktiven Anrufs
///
/// Append-only Liste, deren Lebensdauer an den `InCall`-Zustand gebunden
/// ist; beim Verlassen des Anrufs wird die Liste geleert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMessage {
    pub text: String,
    pub sender_user_id: String,
    pub sender_user_name: String,
    pub timestamp: DateTime<Utc>,
    /// True für lokal verfasste Nachrichten und Engine-Hinweise
    pub is_local: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_and_failed_are_not_busy() {
        assert!(!CallState::Idle.is_busy());
        assert!(!CallState::Failed {
            reason: "x".into()
        }
        .is_busy());
    }

    #[test]
    fn test_active_variants_are_busy() {
        assert!(CallState::Connecting.is_busy());
        assert!(CallState::OutgoingCall {
            remote_user_id: "u2".into()
        }
        .is_busy());
        assert!(CallState::IncomingCall {
            call_id: "c1".into(),
            remote_user_id: "u2".into(),
            remote_user_name: "Bob".into(),
            is_video: false,
        }
        .is_busy());
        assert!(CallState::InCall {
            room_id: "room_1".into()
        }
        .is_busy());
    }
}
