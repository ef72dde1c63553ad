//! Call Engine - Zustandsmaschine und Kommando-Schnittstelle
//!
//! Besitzt als einziger Schreiber den [`CallState`] und koordiniert
//! Signaling, Capture-Produzenten, Netzwerk-Sampler und Wiedergabe-Senke.
//! Produzenten und Sampler laufen genau dann, wenn der Zustand `InCall`
//! ist; jeder Austritt räumt synchron auf, bevor `Idle`/`Failed` gemeldet
//! wird.

use super::session::{CallMessage, CallSession, CallState};
use crate::media::{
    AudioBackend, AudioChunk, AudioProducer, CameraHost, MediaError, PlaybackSink, RemoteFrame,
    VideoFrame, VideoProducer,
};
use crate::quality::{
    AdaptiveAction, AdaptiveQualityController, NetworkProbe, NetworkQualitySampler, QualityTier,
    TransportKind, POOR_NETWORK_NOTICE,
};
use crate::signaling::{
    CallRequestPayload, MediaFramePayload, MediaKind, ServerEvent, SignalingClient,
    SignalingError, SignalingEvent,
};
use crate::EngineConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Already in a call")]
    AlreadyInCall,

    #[error("No call in a state that allows this command")]
    NoActiveCall,

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Events die vom CallEngine ausgelöst werden
///
/// Medien-Gerätefehler laufen bewusst über diesen Kanal statt über den
/// Zustand: eine fehlende Kamera degradiert den Anruf, sie beendet ihn
/// nicht.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(CallState),
    MessageAppended(CallMessage),
    /// Der Latest-wins-Slot der Gegenseite wurde überschrieben
    RemoteFrameUpdated,
    SpeakingChanged(bool),
    ConnectivityChanged(bool),
    QualityChanged(QualityTier),
    MediaError(String),
}

/// Letzter `network-metrics`-Stand des Servers (rein informativ)
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkMetricsSnapshot {
    pub packet_loss: Option<f64>,
    pub latency: Option<f64>,
    pub bandwidth: Option<f64>,
}

// ============================================================================
// CALL ENGINE
// ============================================================================

/// Echtzeit-Engine für Sprach- und Video-Anrufe
pub struct CallEngine {
    config: EngineConfig,
    signaling: Arc<SignalingClient>,
    camera_host: Arc<dyn CameraHost>,
    audio_backend: Arc<dyn AudioBackend>,
    probe: Arc<dyn NetworkProbe>,

    state: Mutex<CallState>,
    session: Mutex<Option<CallSession>>,
    messages: Mutex<Vec<CallMessage>>,

    is_video_streaming: Arc<AtomicBool>,
    is_audio_streaming: Arc<AtomicBool>,

    video: Mutex<Option<Arc<VideoProducer>>>,
    audio: Mutex<Option<Arc<AudioProducer>>>,
    playback: PlaybackSink,
    sampler: Mutex<Option<NetworkQualitySampler>>,
    adaptive: AdaptiveQualityController,

    /// Hintergrund-Tasks der laufenden Anruf-Phase (Forwarding, Adaption)
    call_tasks: Mutex<Vec<JoinHandle<()>>>,
    intake_started: AtomicBool,
    last_metrics: Mutex<Option<NetworkMetricsSnapshot>>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl CallEngine {
    /// Erstellt den Engine mit den Plattform-Standard-Backends
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::with_backends(
            config,
            Arc::new(crate::media::NoCameraHost),
            Arc::new(crate::media::CpalBackend),
            Arc::new(crate::quality::StaticProbe::default()),
        )
    }

    /// Erstellt den Engine mit explizit eingehängten Backends
    pub fn with_backends(
        config: EngineConfig,
        camera_host: Arc<dyn CameraHost>,
        audio_backend: Arc<dyn AudioBackend>,
        probe: Arc<dyn NetworkProbe>,
    ) -> Arc<Self> {
        let signaling = Arc::new(SignalingClient::new(
            config.server_url.clone(),
            config.user_id.clone(),
            config.user_name.clone(),
            config.connect.clone(),
        ));
        let (event_tx, _) = broadcast::channel(256);
        let playback = PlaybackSink::new(Arc::clone(&audio_backend));

        Arc::new(Self {
            config,
            signaling,
            camera_host,
            audio_backend,
            probe,
            state: Mutex::new(CallState::Idle),
            session: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            is_video_streaming: Arc::new(AtomicBool::new(false)),
            is_audio_streaming: Arc::new(AtomicBool::new(false)),
            video: Mutex::new(None),
            audio: Mutex::new(None),
            playback,
            sampler: Mutex::new(None),
            adaptive: AdaptiveQualityController::new(),
            call_tasks: Mutex::new(Vec::new()),
            intake_started: AtomicBool::new(false),
            last_metrics: Mutex::new(None),
            event_tx,
        })
    }

    // ========================================================================
    // OBSERVERS
    // ========================================================================

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        self.state.lock().clone()
    }

    /// Daten des laufenden Anrufversuchs, falls vorhanden
    pub fn session(&self) -> Option<CallSession> {
        self.session.lock().clone()
    }

    /// Chat-Verlauf des aktiven Anrufs
    pub fn messages(&self) -> Vec<CallMessage> {
        self.messages.lock().clone()
    }

    pub fn is_video_streaming(&self) -> bool {
        self.is_video_streaming.load(Ordering::SeqCst)
    }

    pub fn is_audio_streaming(&self) -> bool {
        self.is_audio_streaming.load(Ordering::SeqCst)
    }

    /// Letzter empfangener Remote-Frame (Latest-wins)
    pub fn latest_remote_frame(&self) -> Option<RemoteFrame> {
        self.playback.latest_frame()
    }

    /// Dekodiert den letzten Remote-Frame nach RGB8
    pub fn decode_remote_frame(&self) -> Option<(u32, u32, Vec<u8>)> {
        self.playback.decode_latest()
    }

    /// Gibt Audio-Pegel zurück (input, output)
    pub fn audio_levels(&self) -> (f32, f32) {
        let input = self
            .audio
            .lock()
            .as_ref()
            .map(|a| a.input_level())
            .unwrap_or(0.0);
        (input, self.playback.output_level())
    }

    /// Letzte Server-Telemetrie, falls empfangen
    pub fn last_network_metrics(&self) -> Option<NetworkMetricsSnapshot> {
        *self.last_metrics.lock()
    }

    /// Transport der letzten Netzwerk-Messung, solange der Sampler läuft
    pub fn network_transport(&self) -> Option<TransportKind> {
        self.sampler.lock().as_ref().map(|s| s.current_transport())
    }

    pub fn adaptive_quality_enabled(&self) -> bool {
        self.adaptive.is_enabled()
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Verbindet mit dem Signaling-Server und startet die Event-Verarbeitung
    pub fn connect(self: Arc<Self>) -> Result<(), CallError> {
        Arc::clone(&self.signaling).connect()?;
        self.spawn_intake();
        Ok(())
    }

    /// Startet einen ausgehenden Anruf
    pub fn dial(
        &self,
        remote_user_id: &str,
        remote_user_name: &str,
        is_video: bool,
    ) -> Result<(), CallError> {
        {
            let state = self.state.lock();
            if *state != CallState::Idle {
                return Err(CallError::AlreadyInCall);
            }
        }

        let room_id = format!("room_{}", Uuid::new_v4());

        self.signaling.send_call_request(CallRequestPayload::new(
            room_id.clone(),
            self.config.user_id.clone(),
            self.config.user_name.clone(),
            remote_user_id.to_string(),
            is_video,
        ))?;

        *self.session.lock() = Some(CallSession {
            call_id: None,
            room_id,
            local_user_id: self.config.user_id.clone(),
            local_user_name: self.config.user_name.clone(),
            remote_user_id: remote_user_id.to_string(),
            remote_user_name: remote_user_name.to_string(),
            is_video,
            created_at: Utc::now(),
        });

        tracing::info!("Dialing {} (video: {})", remote_user_id, is_video);
        self.set_state(CallState::OutgoingCall {
            remote_user_id: remote_user_id.to_string(),
        });
        Ok(())
    }

    /// Nimmt den eingehenden Anruf an
    ///
    /// Ein zweiter Aufruf für denselben Anruf scheitert am Zustand und
    /// sendet garantiert keine zweite `call-response`.
    pub fn accept(&self) -> Result<(), CallError> {
        let call_id = {
            let state = self.state.lock();
            match &*state {
                CallState::IncomingCall { call_id, .. } => call_id.clone(),
                _ => return Err(CallError::NoActiveCall),
            }
        };

        self.signaling.send_call_response(call_id, true)?;
        tracing::info!("Incoming call accepted");
        self.set_state(CallState::Connecting);
        Ok(())
    }

    /// Lehnt den eingehenden Anruf ab
    pub fn reject(&self) -> Result<(), CallError> {
        let call_id = {
            let state = self.state.lock();
            match &*state {
                CallState::IncomingCall { call_id, .. } => call_id.clone(),
                _ => return Err(CallError::NoActiveCall),
            }
        };

        if let Err(e) = self.signaling.send_call_response(call_id, false) {
            tracing::warn!("Failed to send rejection: {}", e);
        }
        tracing::info!("Incoming call rejected");
        self.clear_session();
        self.set_state(CallState::Idle);
        Ok(())
    }

    /// Bricht den eigenen ausgehenden Anruf vor der Annahme ab
    pub fn cancel(&self) -> Result<(), CallError> {
        {
            let state = self.state.lock();
            if !matches!(&*state, CallState::OutgoingCall { .. }) {
                return Err(CallError::NoActiveCall);
            }
        }

        let call_id = self
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.call_id.clone())
            .unwrap_or_default();
        if let Err(e) = self.signaling.send_cancel_call(call_id) {
            tracing::warn!("Failed to send cancel: {}", e);
        }

        tracing::info!("Outgoing call cancelled");
        self.clear_session();
        self.set_state(CallState::Idle);
        Ok(())
    }

    /// Beendet den aktiven Anruf
    ///
    /// Außerhalb von `InCall` ein No-op; doppeltes Auflegen ist damit
    /// wirkungsgleich mit einfachem.
    pub fn hang_up(&self) {
        let room_id = {
            let state = self.state.lock();
            match &*state {
                CallState::InCall { room_id } => room_id.clone(),
                _ => {
                    tracing::debug!("hang_up ignored outside of an active call");
                    return;
                }
            }
        };

        self.teardown_call();
        if let Err(e) = self.signaling.send_leave_call(room_id) {
            tracing::warn!("Failed to send leave-call: {}", e);
        }
        self.clear_session();
        self.clear_messages();
        tracing::info!("Call ended locally");
        self.set_state(CallState::Idle);
    }

    /// Quittiert einen fehlgeschlagenen Anruf
    pub fn dismiss_failed(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(&*state, CallState::Failed { .. }) {
                return;
            }
            *state = CallState::Idle;
        }
        self.emit(EngineEvent::StateChanged(CallState::Idle));
    }

    /// Schaltet den lokalen Video-Stream um; gibt den neuen Zustand zurück
    pub fn toggle_video(&self) -> Result<bool, CallError> {
        let video = self.video.lock().clone().ok_or(CallError::NoActiveCall)?;

        if video.is_streaming() {
            video.stop();
            Ok(false)
        } else {
            video.start()?;
            Ok(true)
        }
    }

    /// Schaltet das Mikrofon stumm bzw. wieder frei; true = Audio aktiv
    pub fn toggle_audio(&self) -> Result<bool, CallError> {
        let audio = self.audio.lock().clone().ok_or(CallError::NoActiveCall)?;
        let muted = !audio.is_muted();
        audio.set_muted(muted);
        Ok(!muted)
    }

    /// Wechselt auf die jeweils andere Kamera
    pub fn switch_camera(&self) -> Result<(), CallError> {
        let video = self.video.lock().clone().ok_or(CallError::NoActiveCall)?;
        video.switch_camera().map_err(Into::into)
    }

    /// Sendet eine Chat-Nachricht in den aktiven Anruf
    pub fn send_message(&self, text: &str) -> Result<(), CallError> {
        let room_id = {
            let state = self.state.lock();
            match &*state {
                CallState::InCall { room_id } => room_id.clone(),
                _ => return Err(CallError::NoActiveCall),
            }
        };

        self.signaling
            .send_call_message(room_id, text.to_string())?;

        self.append_message(CallMessage {
            text: text.to_string(),
            sender_user_id: self.config.user_id.clone(),
            sender_user_name: self.config.user_name.clone(),
            timestamp: Utc::now(),
            is_local: true,
        });
        Ok(())
    }

    /// Schaltet die adaptive Qualitätssteuerung um
    pub fn set_adaptive_quality(&self, enabled: bool) {
        self.adaptive.set_enabled(enabled);
    }

    // ========================================================================
    // SIGNALING EVENT INTAKE
    // ========================================================================

    /// Startet die Event-Verarbeitungsschleife (einmalig)
    fn spawn_intake(self: Arc<Self>) {
        if self.intake_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut rx = self.signaling.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Arc::clone(&self).handle_signaling_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Signaling intake lagged, {} events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Verarbeitet ein Ereignis des SignalingClients
    pub(crate) fn handle_signaling_event(self: Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                self.emit(EngineEvent::ConnectivityChanged(true));
            }
            SignalingEvent::Disconnected => {
                // Reconnect läuft; ein laufender Anruf scheitert erst, wenn
                // alle Versuche aufgebraucht sind
                self.emit(EngineEvent::ConnectivityChanged(false));
            }
            SignalingEvent::RetriesExhausted => {
                self.emit(EngineEvent::ConnectivityChanged(false));
                let busy = self.state.lock().is_busy();
                if busy {
                    self.fail_call("connection failed");
                }
            }
            SignalingEvent::Server(server) => self.handle_server_event(server),
        }
    }

    /// Verarbeitet ein typisiertes Server-Event
    ///
    /// Unbekannte Kanten der Zustandsmaschine sind No-ops; das macht die
    /// Verarbeitung idempotent gegenüber doppelt zugestellten Events.
    fn handle_server_event(self: Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::RegisterSuccess { user_id } => {
                tracing::info!("Registered at signaling server ({:?})", user_id);
            }

            ServerEvent::RegisterError { message } => {
                tracing::error!("Registration failed: {:?}", message);
            }

            ServerEvent::IncomingCall {
                call_id,
                room_id,
                from_user_id,
                from_user_name,
                is_video_call,
                ..
            } => {
                {
                    let state = self.state.lock();
                    if *state != CallState::Idle {
                        tracing::debug!("Ignoring incoming call while busy");
                        return;
                    }
                }

                tracing::info!(
                    "Incoming call from {} ({}), video: {}",
                    from_user_name,
                    from_user_id,
                    is_video_call
                );

                *self.session.lock() = Some(CallSession {
                    call_id: Some(call_id.clone()),
                    room_id,
                    local_user_id: self.config.user_id.clone(),
                    local_user_name: self.config.user_name.clone(),
                    remote_user_id: from_user_id.clone(),
                    remote_user_name: from_user_name.clone(),
                    is_video: is_video_call,
                    created_at: Utc::now(),
                });

                self.set_state(CallState::IncomingCall {
                    call_id,
                    remote_user_id: from_user_id,
                    remote_user_name: from_user_name,
                    is_video: is_video_call,
                });
            }

            ServerEvent::CallStarted { call_id } => {
                tracing::debug!("Call registered at server ({:?})", call_id);
            }

            ServerEvent::CallRequestFailed { reason } => {
                let outgoing = matches!(&*self.state.lock(), CallState::OutgoingCall { .. });
                if outgoing {
                    tracing::warn!("Call request failed: {}", reason);
                    self.clear_session();
                    self.set_state(CallState::Failed { reason });
                }
            }

            ServerEvent::CallResponse { call_id, accepted } => {
                let outgoing = matches!(&*self.state.lock(), CallState::OutgoingCall { .. });
                if !outgoing {
                    tracing::debug!("Ignoring call-response outside outgoing call");
                    return;
                }

                if let Some(session) = self.session.lock().as_mut() {
                    session.call_id = Some(call_id);
                }

                if accepted {
                    tracing::info!("Call accepted by remote peer");
                    self.set_state(CallState::Connecting);
                } else {
                    tracing::info!("Call declined by remote peer");
                    self.clear_session();
                    self.set_state(CallState::Failed {
                        reason: "call declined".to_string(),
                    });
                }
            }

            ServerEvent::JoinCallRoom { room_id, call_id } => {
                let may_join = matches!(
                    &*self.state.lock(),
                    CallState::OutgoingCall { .. } | CallState::Connecting
                );
                if !may_join {
                    // Doppelte Zustellung oder verspätetes Event
                    tracing::debug!("Ignoring join-call-room in current state");
                    return;
                }
                self.enter_call(room_id, call_id);
            }

            ServerEvent::CallCancelled { .. } => {
                let incoming = matches!(&*self.state.lock(), CallState::IncomingCall { .. });
                if incoming {
                    tracing::info!("Incoming call cancelled by caller");
                    self.clear_session();
                    self.set_state(CallState::Idle);
                }
            }

            ServerEvent::CallTimeout { .. } => {
                let ringing = matches!(
                    &*self.state.lock(),
                    CallState::OutgoingCall { .. } | CallState::IncomingCall { .. }
                );
                if ringing {
                    tracing::info!("Call timed out at server");
                    self.clear_session();
                    self.set_state(CallState::Idle);
                }
            }

            ServerEvent::CallEnded { reason } => {
                let in_call = matches!(&*self.state.lock(), CallState::InCall { .. });
                if !in_call {
                    tracing::debug!("Ignoring call-ended outside of a call");
                    return;
                }

                tracing::info!("Call ended by remote ({:?})", reason);
                // Kein leave-call: das sendet nur das lokale Auflegen
                self.teardown_call();
                self.clear_session();
                self.clear_messages();
                self.set_state(CallState::Idle);
            }

            ServerEvent::MediaFrame(payload) => self.handle_media_frame(payload),

            ServerEvent::CallMessage(payload) => {
                let in_call = matches!(&*self.state.lock(), CallState::InCall { .. });
                if !in_call {
                    return;
                }

                let timestamp = payload
                    .timestamp
                    .and_then(chrono::DateTime::from_timestamp_millis)
                    .unwrap_or_else(Utc::now);
                self.append_message(CallMessage {
                    text: payload.message,
                    sender_user_id: payload.user_id,
                    sender_user_name: payload.user_name,
                    timestamp,
                    is_local: false,
                });
            }

            ServerEvent::NetworkMetrics {
                packet_loss,
                latency,
                bandwidth,
            } => {
                tracing::debug!(
                    "Server network metrics: loss={:?} latency={:?} bandwidth={:?}",
                    packet_loss,
                    latency,
                    bandwidth
                );
                *self.last_metrics.lock() = Some(NetworkMetricsSnapshot {
                    packet_loss,
                    latency,
                    bandwidth,
                });
            }

            ServerEvent::DebugMediaInfo { info } => {
                tracing::debug!("Server media debug info: {:?}", info);
            }

            ServerEvent::Pong { .. } => {}
        }
    }

    /// Stellt einen empfangenen Media-Frame der Wiedergabe zu
    fn handle_media_frame(&self, payload: MediaFramePayload) {
        let in_call = matches!(&*self.state.lock(), CallState::InCall { .. });
        if !in_call {
            tracing::debug!("Dropping media frame outside of a call");
            return;
        }

        match payload.kind {
            MediaKind::Video => {
                let Some(data) = payload.frame_data else {
                    tracing::warn!("Video frame without frameData, dropping");
                    return;
                };
                match BASE64.decode(data.as_bytes()) {
                    Ok(pixel_bytes) => {
                        self.playback.store_frame(RemoteFrame {
                            pixel_bytes,
                            from_user_id: payload.user_id,
                            received_at: Utc::now(),
                        });
                        self.emit(EngineEvent::RemoteFrameUpdated);
                    }
                    Err(e) => tracing::warn!("Dropping undecodable video frame: {}", e),
                }
            }
            MediaKind::Audio => {
                let Some(data) = payload.audio_data else {
                    tracing::warn!("Audio frame without audioData, dropping");
                    return;
                };
                match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => {
                        let samples: Vec<i16> = bytes
                            .chunks_exact(2)
                            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                            .collect();
                        self.playback.play_chunk(&samples);
                    }
                    Err(e) => tracing::warn!("Dropping undecodable audio chunk: {}", e),
                }
            }
        }
    }

    // ========================================================================
    // CALL LIFECYCLE
    // ========================================================================

    /// Betritt den Relay-Raum und startet die Media-Phase
    ///
    /// Einziger Eintrittspunkt für Produzenten und Sampler; die Zustands-
    /// kante davor garantiert, dass `join-call` höchstens einmal pro Anruf
    /// gesendet wird.
    fn enter_call(self: Arc<Self>, room_id: String, call_id: String) {
        let session = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                tracing::warn!("join-call-room without a session, ignoring");
                return;
            };
            session.call_id = Some(call_id);
            session.room_id = room_id.clone();
            session.clone()
        };

        if let Err(e) = self.signaling.send_join_call(room_id.clone()) {
            tracing::warn!("Failed to send join-call: {}", e);
        }

        if let Err(e) = self.start_media(&session) {
            // Ohne Mikrofon ist der Anruf nicht führbar
            tracing::error!("Media start failed: {}", e);
            self.fail_call("microphone unavailable");
            return;
        }

        Arc::clone(&self).start_quality_loop();

        tracing::info!("Entered call room {}", room_id);
        self.set_state(CallState::InCall { room_id });
    }

    /// Startet Audio- (zwingend) und Video-Produzent (Video-Anrufe)
    fn start_media(&self, session: &CallSession) -> Result<(), MediaError> {
        // Audio zuerst: ein fehlendes Mikrofon beendet den Anrufversuch
        let (audio, chunk_rx) = AudioProducer::start(
            Arc::clone(&self.audio_backend),
            self.config.voice_gate.clone(),
            Arc::clone(&self.is_audio_streaming),
        )?;
        let audio = Arc::new(audio);

        // "Spricht"-Wechsel als Engine-Events weiterreichen
        let mut speaking_rx = audio.subscribe_speaking();
        let event_tx = self.event_tx.clone();
        let speaking_task = tokio::spawn(async move {
            while speaking_rx.changed().await.is_ok() {
                let speaking = *speaking_rx.borrow_and_update();
                let _ = event_tx.send(EngineEvent::SpeakingChanged(speaking));
            }
        });

        *self.audio.lock() = Some(audio);

        // Video nur für Video-Anrufe; eine fehlende Kamera degradiert zu
        // Audio-only statt den Anruf zu beenden
        let mut video_rx = None;
        if session.is_video {
            let video = Arc::new(VideoProducer::new(
                Arc::clone(&self.camera_host),
                self.config.video.clone(),
                Arc::clone(&self.is_video_streaming),
            ));
            match video.start() {
                Ok(()) => {
                    video_rx = Some(video.subscribe());
                }
                Err(e) => {
                    tracing::warn!("Video call degrades to audio-only: {}", e);
                    self.emit(EngineEvent::MediaError(format!("camera unavailable: {e}")));
                }
            }
            *self.video.lock() = Some(video);
        }

        let forward_task = tokio::spawn(forward_media(
            Arc::clone(&self.signaling),
            session.room_id.clone(),
            session.local_user_id.clone(),
            session.local_user_name.clone(),
            chunk_rx,
            video_rx,
        ));

        let mut tasks = self.call_tasks.lock();
        tasks.push(speaking_task);
        tasks.push(forward_task);
        Ok(())
    }

    /// Startet Netzwerk-Sampler und Adaptions-Schleife
    fn start_quality_loop(self: Arc<Self>) {
        let sampler =
            NetworkQualitySampler::start(Arc::clone(&self.probe), self.config.sampler_interval);
        let mut tier_rx = sampler.subscribe();
        *self.sampler.lock() = Some(sampler);

        let engine = Arc::clone(&self);
        let task = tokio::spawn(async move {
            while tier_rx.changed().await.is_ok() {
                let tier = *tier_rx.borrow_and_update();
                engine.apply_tier_change(tier);
            }
        });
        self.call_tasks.lock().push(task);
    }

    /// Wendet einen Stufenwechsel auf den Video-Produzenten an
    pub(crate) fn apply_tier_change(&self, tier: QualityTier) {
        self.emit(EngineEvent::QualityChanged(tier));

        let is_video_call = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.is_video)
            .unwrap_or(false);
        let Some(video) = self.video.lock().clone() else {
            return;
        };

        match self.adaptive.decide(tier, is_video_call, video.is_streaming()) {
            AdaptiveAction::Observe => {
                tracing::debug!("Quality tier {:?} observed, adaptive mode off", tier);
            }
            AdaptiveAction::Reconfigure(profile) => {
                video.reconfigure(profile);
            }
            AdaptiveAction::FallBackToAudio(profile) => {
                tracing::warn!("Network degraded to {:?}, disabling video", tier);
                video.reconfigure(profile);
                video.stop();
                self.append_message(CallMessage {
                    text: POOR_NETWORK_NOTICE.to_string(),
                    sender_user_id: String::new(),
                    sender_user_name: "System".to_string(),
                    timestamp: Utc::now(),
                    is_local: true,
                });
            }
        }
    }

    /// Beendet den Anruf wegen eines Fehlers
    fn fail_call(&self, reason: &str) {
        self.teardown_call();
        self.clear_session();
        self.clear_messages();
        self.set_state(CallState::Failed {
            reason: reason.to_string(),
        });
    }

    /// Stoppt synchron alles, was an die Media-Phase gebunden ist
    ///
    /// Muss vollständig durchlaufen, bevor `Idle`/`Failed` gemeldet wird,
    /// damit keine Geräte-Handles in den nächsten Anruf lecken.
    fn teardown_call(&self) {
        for task in self.call_tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(video) = self.video.lock().take() {
            video.stop();
        }
        if let Some(audio) = self.audio.lock().take() {
            audio.stop();
        }
        if let Some(sampler) = self.sampler.lock().take() {
            sampler.stop();
        }
        self.playback.release();
        self.is_video_streaming.store(false, Ordering::SeqCst);
        self.is_audio_streaming.store(false, Ordering::SeqCst);
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Aktualisiert den State und sendet das Event
    fn set_state(&self, new_state: CallState) {
        *self.state.lock() = new_state.clone();
        self.emit(EngineEvent::StateChanged(new_state));
    }

    fn clear_session(&self) {
        *self.session.lock() = None;
    }

    fn clear_messages(&self) {
        self.messages.lock().clear();
    }

    fn append_message(&self, message: CallMessage) {
        self.messages.lock().push(message.clone());
        self.emit(EngineEvent::MessageAppended(message));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("state", &self.state())
            .field("is_video_streaming", &self.is_video_streaming())
            .field("is_audio_streaming", &self.is_audio_streaming())
            .finish()
    }
}

// ============================================================================
// MEDIA FORWARDING
// ============================================================================

/// Leitet lokale Chunks und Frames als `media-frame` in den Raum weiter
///
/// Endet von selbst, sobald die Produzenten-Kanäle schließen; Sendefehler
/// werden nur geloggt, Verlust einzelner Frames ist einkalkuliert.
async fn forward_media(
    signaling: Arc<SignalingClient>,
    room_id: String,
    user_id: String,
    user_name: String,
    mut chunk_rx: mpsc::Receiver<AudioChunk>,
    mut video_rx: Option<watch::Receiver<Option<VideoFrame>>>,
) {
    loop {
        tokio::select! {
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let mut bytes = Vec::with_capacity(chunk.samples.len() * 2);
                for sample in &chunk.samples {
                    bytes.extend_from_slice(&sample.to_le_bytes());
                }
                let payload = MediaFramePayload::audio(
                    room_id.clone(),
                    BASE64.encode(&bytes),
                    user_id.clone(),
                    user_name.clone(),
                    chunk.captured_at.timestamp_millis(),
                );
                if let Err(e) = signaling.send_media_frame(&payload) {
                    tracing::debug!("Audio chunk not relayed: {}", e);
                }
            }
            changed = video_changed(&mut video_rx) => {
                if changed.is_err() {
                    // Video-Produzent weg; Audio läuft weiter
                    video_rx = None;
                    continue;
                }
                let frame = video_rx
                    .as_mut()
                    .and_then(|rx| rx.borrow_and_update().clone());
                let Some(frame) = frame else { continue };
                let payload = MediaFramePayload::video(
                    room_id.clone(),
                    BASE64.encode(&frame.pixel_bytes),
                    user_id.clone(),
                    user_name.clone(),
                    frame.captured_at.timestamp_millis(),
                );
                if let Err(e) = signaling.send_media_frame(&payload) {
                    tracing::debug!("Video frame not relayed: {}", e);
                }
            }
        }
    }
}

/// Wartet auf den nächsten Frame, bzw. ewig wenn kein Video läuft
async fn video_changed(
    rx: &mut Option<watch::Receiver<Option<VideoFrame>>>,
) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}
