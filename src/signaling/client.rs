//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die persistente Event-Verbindung zum Server:
//! - Automatische Reconnection (max. 5 Versuche, 1s Delay, 20s Handshake-Timeout)
//! - Registrierung direkt nach Verbindungsaufbau
//! - Heartbeat-Keeping
//! - Fire-and-forget Senden für Control- und Media-Events

use super::messages::*;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("Invalid signaling server URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// CONNECT OPTIONS
// ============================================================================

/// Verbindungs- und Reconnect-Policy
///
/// Transport-Präferenz ist WebSocket; ein Polling-Fallback existiert
/// serverseitig, wird vom Engine-Client aber nicht gesprochen.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bei jedem Versuch eine frische Verbindung aufbauen
    pub force_new: bool,
    /// Nach Verbindungsverlust automatisch neu verbinden
    pub reconnect: bool,
    /// Maximale Anzahl aufeinanderfolgender Reconnect-Versuche
    pub max_reconnect_attempts: u32,
    /// Pause zwischen zwei Versuchen
    pub reconnect_delay: Duration,
    /// Timeout für den WebSocket-Handshake
    pub handshake_timeout: Duration,
    /// Intervall für Heartbeats auf stehender Verbindung
    pub heartbeat_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            force_new: true,
            reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            handshake_timeout: Duration::from_millis(20_000),
            heartbeat_interval: Duration::from_secs(25),
        }
    }
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Verbunden mit dem Signaling-Server (Registrierung gesendet)
    Connected,

    /// Verbindung getrennt, Reconnect läuft ggf. an
    Disconnected,

    /// Alle Reconnect-Versuche aufgebraucht
    RetriesExhausted,

    /// Ein typisiertes Server-Event
    Server(ServerEvent),
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Default)]
struct ClientState {
    is_connected: bool,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// Client für die Signaling-Server-Kommunikation
///
/// Hält genau eine logische Verbindung. Lesen und Schreiben laufen in
/// getrennten Tasks, verbunden über einen mpsc-Kanal serialisierter Frames;
/// eingehende Events werden als [`SignalingEvent`] gebroadcastet.
pub struct SignalingClient {
    server_url: String,
    user_id: String,
    user_name: String,
    options: ConnectOptions,
    state: Arc<RwLock<ClientState>>,
    writer: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient
    pub fn new(
        server_url: String,
        user_id: String,
        user_name: String,
        options: ConnectOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            server_url,
            user_id,
            user_name,
            options,
            state: Arc::new(RwLock::new(ClientState::default())),
            writer: Arc::new(RwLock::new(None)),
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Verbindet mit dem Signaling-Server
    ///
    /// Läuft als Hintergrund-Task weiter: bei Verbindungsverlust greift die
    /// Reconnect-Policy aus den [`ConnectOptions`]. Nach erfolgreichem
    /// Handshake wird sofort `register` gesendet.
    pub fn connect(self: Arc<Self>) -> Result<(), SignalingError> {
        let ws_url = Self::websocket_url(&self.server_url)?;

        tokio::spawn(async move {
            self.run_connection(ws_url).await;
        });

        Ok(())
    }

    /// Verbindungsschleife: verbinden, lesen bis zum Abbruch, neu versuchen
    async fn run_connection(self: Arc<Self>, ws_url: String) {
        let mut attempt: u32 = 0;

        loop {
            match tokio::time::timeout(self.options.handshake_timeout, connect_async(&ws_url))
                .await
            {
                Ok(Ok((ws_stream, _))) => {
                    attempt = 0;
                    tracing::info!("Connected to signaling server: {}", ws_url);
                    self.serve_connection(ws_stream).await;
                    // Verbindung weg, unten ggf. Reconnect
                    let _ = self.event_tx.send(SignalingEvent::Disconnected);
                }
                Ok(Err(e)) => {
                    tracing::warn!("WebSocket connection failed: {}", e);
                }
                Err(_) => {
                    tracing::warn!(
                        "WebSocket handshake timed out after {:?}",
                        self.options.handshake_timeout
                    );
                }
            }

            if !self.options.reconnect {
                break;
            }

            attempt += 1;
            if attempt > self.options.max_reconnect_attempts {
                tracing::error!(
                    "Giving up after {} reconnect attempts",
                    self.options.max_reconnect_attempts
                );
                let _ = self.event_tx.send(SignalingEvent::RetriesExhausted);
                break;
            }

            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                self.options.reconnect_delay,
                attempt,
                self.options.max_reconnect_attempts
            );
            tokio::time::sleep(self.options.reconnect_delay).await;
        }
    }

    /// Bedient genau eine stehende Verbindung bis zu deren Ende
    async fn serve_connection(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut write, mut read) = ws_stream.split();

        // Message-Sender erstellen und als aktiven Writer eintragen
        let (tx, mut rx) = mpsc::channel::<String>(256);
        self.state.write().is_connected = true;
        *self.writer.write() = Some(tx.clone());

        let _ = self.event_tx.send(SignalingEvent::Connected);

        // Write-Task starten
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        // Registrierung sofort nach dem Handshake
        if let Err(e) = self.send_payload(&RegisterPayload::new(
            self.user_id.clone(),
            self.user_name.clone(),
        )) {
            tracing::error!("Failed to send register: {}", e);
        }

        // Heartbeat-Task für diese Verbindung
        self.spawn_heartbeat(tx);

        // Read-Loop bis Close oder Fehler
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => self.dispatch_text(&text),
                Ok(Message::Close(_)) => {
                    tracing::info!("WebSocket closed by server");
                    break;
                }
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        // Disconnect-Status setzen, Writer verwerfen
        {
            let mut state = self.state.write();
            state.is_connected = false;
        }
        *self.writer.write() = None;
        write_task.abort();
    }

    /// Parst eine Text-Frame und broadcastet das Server-Event
    ///
    /// Nicht parsebare Events werden geloggt und verworfen, niemals
    /// weitergereicht.
    fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                let _ = self.event_tx.send(SignalingEvent::Server(event));
            }
            Err(e) => {
                tracing::warn!("Dropping malformed signaling event: {}", e);
            }
        }
    }

    /// Startet einen Heartbeat-Task für die aktuelle Verbindung
    ///
    /// Der Task hängt am Schreibkanal genau dieser Verbindung und endet
    /// von selbst, sobald der Kanal geschlossen ist.
    fn spawn_heartbeat(&self, tx: mpsc::Sender<String>) {
        let user_id = self.user_id.clone();
        let interval = self.options.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // erster Tick feuert sofort
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let Ok(msg) = serde_json::to_string(&HeartbeatPayload::new(user_id.clone()))
                else {
                    break;
                };
                if let Err(e) = tx.try_send(msg) {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }
            }
        });
    }

    // ========================================================================
    // SEND API (fire-and-forget)
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    pub fn send_call_request(&self, payload: CallRequestPayload) -> Result<(), SignalingError> {
        self.send_payload(&payload)
    }

    /// Beantwortet einen eingehenden Anruf
    pub fn send_call_response(
        &self,
        call_id: String,
        accepted: bool,
    ) -> Result<(), SignalingError> {
        self.send_payload(&CallResponsePayload::new(call_id, accepted))
    }

    /// Betritt den Relay-Raum
    pub fn send_join_call(&self, room_id: String) -> Result<(), SignalingError> {
        self.send_payload(&JoinCallPayload::new(
            room_id,
            self.user_id.clone(),
            self.user_name.clone(),
        ))
    }

    /// Verlässt den Relay-Raum (lokales Auflegen)
    pub fn send_leave_call(&self, room_id: String) -> Result<(), SignalingError> {
        self.send_payload(&LeaveCallPayload::new(room_id))
    }

    /// Bricht einen ausgehenden Anruf vor der Annahme ab
    pub fn send_cancel_call(&self, call_id: String) -> Result<(), SignalingError> {
        self.send_payload(&CancelCallPayload::new(call_id))
    }

    /// Relayt einen Media-Frame in den Raum
    pub fn send_media_frame(&self, payload: &MediaFramePayload) -> Result<(), SignalingError> {
        self.send_payload(payload)
    }

    /// Sendet eine Chat-Nachricht in den Raum
    pub fn send_call_message(
        &self,
        room_id: String,
        message: String,
    ) -> Result<(), SignalingError> {
        self.send_payload(&CallMessagePayload::new(
            room_id,
            message,
            self.user_id.clone(),
            self.user_name.clone(),
            Utc::now().timestamp_millis(),
        ))
    }

    /// Serialisiert und sendet einen Payload (non-blocking, try_send)
    fn send_payload<T: serde::Serialize>(&self, payload: &T) -> Result<(), SignalingError> {
        let writer = self.writer.read();
        let tx = writer.as_ref().ok_or(SignalingError::NotConnected)?;

        let msg = serde_json::to_string(payload)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.try_send(msg)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Validiert die Server-URL und bildet die WebSocket-URL
    fn websocket_url(server_url: &str) -> Result<String, SignalingError> {
        let ws_url = format!("{}/ws", server_url.replace("http", "ws"));
        Url::parse(&ws_url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;
        Ok(ws_url)
    }

    /// Hängt einen Writer ohne echte Verbindung ein (Tests)
    #[cfg(test)]
    pub(crate) fn attach_writer_for_test(&self, tx: mpsc::Sender<String>) {
        self.state.write().is_connected = true;
        *self.writer.write() = Some(tx);
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url)
            .field("user_id", &self.user_id)
            .field("is_connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Arc<SignalingClient> {
        Arc::new(SignalingClient::new(
            "https://signaling.example.test".into(),
            "u1".into(),
            "Alice".into(),
            ConnectOptions::default(),
        ))
    }

    #[test]
    fn test_websocket_url_https_becomes_wss() {
        let url = SignalingClient::websocket_url("https://signaling.example.test").unwrap();
        assert_eq!(url, "wss://signaling.example.test/ws");
    }

    #[test]
    fn test_websocket_url_rejects_garbage() {
        assert!(SignalingClient::websocket_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let client = test_client();
        let result = client.send_leave_call("room_1".into());
        assert!(matches!(result, Err(SignalingError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_delivers_serialized_frame() {
        let client = test_client();
        let (tx, mut rx) = mpsc::channel(8);
        client.attach_writer_for_test(tx);

        client.send_join_call("room_1".into()).unwrap();

        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "join-call");
        assert_eq!(json["roomId"], "room_1");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userName"], "Alice");
    }

    #[tokio::test]
    async fn test_malformed_event_is_dropped() {
        let client = test_client();
        let mut rx = client.subscribe();

        client.dispatch_text("{\"type\": \"incoming-call\", \"broken\": true}");
        client.dispatch_text("not json at all");

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_valid_event_is_broadcast() {
        let client = test_client();
        let mut rx = client.subscribe();

        client.dispatch_text(r#"{"type": "call-ended", "reason": "remote hangup"}"#);

        match rx.try_recv().unwrap() {
            SignalingEvent::Server(ServerEvent::CallEnded { reason }) => {
                assert_eq!(reason.as_deref(), Some("remote hangup"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
