//! Audio-Produzent - Mikrofon-Capture mit Sprach-Gate
//!
//! Nimmt kontinuierlich Mono-PCM mit 16 kHz auf einer eigenen Schleife auf
//! (nicht auf dem Control-Thread). Jeder Puffer läuft durch das Sprach-Gate:
//! nur während erkannter Sprache wird weitergeleitet, das halbiert die
//! Bandbreite gegenüber Dauersenden. Geräte werden über schmale Traits
//! angesprochen; die cpal-Implementierung überbrückt per Ring-Buffer.

use super::MediaError;
use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate für Sprachübertragung
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Channels (Mono für Voice)
pub const AUDIO_CHANNELS: u16 = 1;

/// Chunk-Größe in Samples (20ms @ 16kHz)
pub const AUDIO_CHUNK_SIZE: usize = 320;

/// Kurzer Ring für weitergeleitete Chunks; nie unbegrenzt puffern
pub const AUDIO_FORWARD_BOUND: usize = 4;

/// Buffer-Größe des Capture-Ring-Buffers
const CAPTURE_RING_SIZE: usize = AUDIO_CHUNK_SIZE * 16;

/// Wartezeit pro Poll-Runde beim blockierenden Lesen
const READ_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Obergrenze einer Lese-Runde, damit die Schleife ihr Stop-Flag sieht
const READ_POLL_LIMIT: Duration = Duration::from_millis(250);

// ============================================================================
// AUDIO CHUNK
// ============================================================================

/// Ein aufgenommener PCM-Abschnitt (mono, 16 kHz, 16-bit)
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// DEVICE TRAITS
// ============================================================================

/// Blockierende Mikrofon-Quelle
pub trait AudioInput: Send {
    /// Füllt `dst` mit Samples; 0 bedeutet: gerade nichts verfügbar
    fn read(&mut self, dst: &mut [i16]) -> Result<usize, MediaError>;
}

/// Lautsprecher-Senke
pub trait AudioOutput: Send {
    /// Schreibt so viele Samples wie das Gerät annimmt und gibt die
    /// angenommene Anzahl zurück (Short Write bei vollem Puffer)
    fn write(&mut self, samples: &[i16]) -> Result<usize, MediaError>;
}

/// Zugriff auf die Audio-Geräte der Plattform
pub trait AudioBackend: Send + Sync {
    fn open_input(&self) -> Result<Box<dyn AudioInput>, MediaError>;
    fn open_output(&self) -> Result<Box<dyn AudioOutput>, MediaError>;
}

// ============================================================================
// VOICE ACTIVITY GATE
// ============================================================================

/// Einstellungen des Sprach-Gates
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// RMS-Schwelle (normalisiert auf 0.0-1.0)
    pub voice_threshold: f32,
    /// So viele Puffer unter der Schwelle, bevor "spricht" zurückfällt
    pub hangover_chunks: u32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            voice_threshold: 0.02,
            hangover_chunks: 5,
        }
    }
}

/// Ergebnis einer Gate-Entscheidung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateVerdict {
    /// Puffer weiterleiten?
    pub forward: bool,
    /// Nur bei echtem Wechsel gesetzt: neuer "spricht"-Zustand
    pub transition: Option<bool>,
}

/// RMS-basierte Sprachaktivitäts-Erkennung mit Hysterese
///
/// Über der Schwelle gilt sofort "spricht"; unter der Schwelle erst nach
/// `hangover_chunks` aufeinanderfolgenden stillen Puffern wieder "still".
/// Benachrichtigungen entstehen ausschließlich bei Wechseln.
#[derive(Debug)]
pub struct VoiceActivityGate {
    settings: GateSettings,
    speaking: bool,
    silence_run: u32,
}

impl VoiceActivityGate {
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings,
            speaking: false,
            silence_run: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Bewertet einen Puffer anhand seiner Samples
    pub fn process(&mut self, samples: &[i16]) -> GateVerdict {
        self.observe(rms_level(samples))
    }

    /// Bewertet einen bereits berechneten RMS-Wert
    pub fn observe(&mut self, rms: f32) -> GateVerdict {
        if rms > self.settings.voice_threshold {
            self.silence_run = 0;
            if !self.speaking {
                self.speaking = true;
                return GateVerdict {
                    forward: true,
                    transition: Some(true),
                };
            }
            return GateVerdict {
                forward: true,
                transition: None,
            };
        }

        if self.speaking {
            self.silence_run += 1;
            if self.silence_run > self.settings.hangover_chunks {
                self.speaking = false;
                self.silence_run = 0;
                return GateVerdict {
                    forward: false,
                    transition: Some(false),
                };
            }
            // Hysterese: noch als Sprache behandeln
            return GateVerdict {
                forward: true,
                transition: None,
            };
        }

        GateVerdict {
            forward: false,
            transition: None,
        }
    }
}

/// RMS eines PCM-Puffers, normalisiert auf 0.0-1.0
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|&s| {
            let f = s as f32 / i16::MAX as f32;
            f * f
        })
        .sum();
    (sum / samples.len() as f32).sqrt()
}

// ============================================================================
// AUDIO PRODUCER
// ============================================================================

/// Produzent für den lokalen Audio-Stream
///
/// Besitzt das Mikrofon exklusiv; die Capture-Schleife läuft auf einem
/// eigenen Thread und endet synchron in [`AudioProducer::stop`].
pub struct AudioProducer {
    stop_flag: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    /// Geteiltes `is_audio_streaming`-Flag des Engines
    streaming: Arc<AtomicBool>,
    input_level: Arc<Mutex<f32>>,
    speaking_tx: watch::Sender<bool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AudioProducer {
    /// Öffnet das Mikrofon und startet die Capture-Schleife
    ///
    /// Ein fehlendes Mikrofon schlägt hier fehl; der Anrufversuch ist damit
    /// hinfällig. Der Receiver liefert die weiterzuleitenden Chunks.
    pub fn start(
        backend: Arc<dyn AudioBackend>,
        gate_settings: GateSettings,
        streaming: Arc<AtomicBool>,
    ) -> Result<(Self, mpsc::Receiver<AudioChunk>), MediaError> {
        let mut input = backend.open_input()?;

        let (chunk_tx, chunk_rx) = mpsc::channel(AUDIO_FORWARD_BOUND);
        let (speaking_tx, _) = watch::channel(false);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let muted = Arc::new(AtomicBool::new(false));
        let input_level = Arc::new(Mutex::new(0.0f32));

        let stop = Arc::clone(&stop_flag);
        let muted_flag = Arc::clone(&muted);
        let level = Arc::clone(&input_level);
        let speaking = speaking_tx.clone();

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut gate = VoiceActivityGate::new(gate_settings);
                let mut chunk = vec![0i16; AUDIO_CHUNK_SIZE];

                while !stop.load(Ordering::SeqCst) {
                    let n = match input.read(&mut chunk) {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::error!("Audio capture read failed: {}", e);
                            break;
                        }
                    };
                    if n == 0 {
                        continue;
                    }

                    let samples = &chunk[..n];
                    let rms = rms_level(samples);
                    *level.lock() = rms.min(1.0);

                    // Mute wirkt wie Stille: das Gate fällt über die
                    // Hysterese zurück und meldet den Wechsel genau einmal
                    let effective_rms = if muted_flag.load(Ordering::SeqCst) {
                        0.0
                    } else {
                        rms
                    };

                    let verdict = gate.observe(effective_rms);
                    if let Some(now_speaking) = verdict.transition {
                        tracing::debug!("Speaking state changed: {}", now_speaking);
                        let _ = speaking.send(now_speaking);
                    }

                    if verdict.forward && !muted_flag.load(Ordering::SeqCst) {
                        let chunk = AudioChunk {
                            samples: samples.to_vec(),
                            captured_at: Utc::now(),
                        };
                        // Ring voll: Chunk verwerfen statt Latenz aufbauen
                        if chunk_tx.try_send(chunk).is_err() {
                            tracing::debug!("Audio forward ring full, dropping chunk");
                        }
                    }
                }

                tracing::info!("Audio capture loop ended");
            })
            .map_err(|e| MediaError::StreamBuildError(e.to_string()))?;

        streaming.store(true, Ordering::SeqCst);
        tracing::info!(
            "Audio capture started: {} Hz, {} channel(s)",
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS
        );

        Ok((
            Self {
                stop_flag,
                muted,
                streaming,
                input_level,
                speaking_tx,
                thread: Mutex::new(Some(thread)),
            },
            chunk_rx,
        ))
    }

    /// Receiver für Wechsel des "spricht"-Zustands
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Stoppt die Capture-Schleife und gibt das Mikrofon frei
    ///
    /// Blockiert bis der Capture-Thread beendet ist, damit keine
    /// Geräte-Handles in den nächsten Anruf lecken.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                tracing::error!("Audio capture thread panicked");
            }
        }
        self.streaming.store(false, Ordering::SeqCst);
        tracing::info!("Audio capture stopped");
    }

    /// Setzt den Mute-Status
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        tracing::debug!("Audio muted: {}", muted);
    }

    /// Gibt den Mute-Status zurück
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Aktueller Eingangspegel (0.0 - 1.0) für Visualisierung
    pub fn input_level(&self) -> f32 {
        *self.input_level.lock()
    }
}

impl Drop for AudioProducer {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// CPAL BACKEND
// ============================================================================

/// Audio-Backend auf Basis von cpal
#[derive(Debug, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self) -> Result<Box<dyn AudioInput>, MediaError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(MediaError::NoInputDevice)?;
        let config = find_best_config(device.supported_input_configs().map_err(|e| {
            MediaError::UnsupportedConfig(e.to_string())
        })?)?;

        let buffer = Arc::new(Mutex::new(HeapRb::<i16>::new(CAPTURE_RING_SIZE)));
        let capture_buffer = Arc::clone(&buffer);
        let source_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Auf Mono reduzieren, auf 16kHz resampeln, nach i16
                    let mono = downmix(data, channels);
                    let samples = resample(&mono, source_rate, AUDIO_SAMPLE_RATE);

                    let mut buffer = capture_buffer.lock();
                    for sample in samples {
                        let value = (sample * i16::MAX as f32)
                            .clamp(i16::MIN as f32, i16::MAX as f32)
                            as i16;
                        let _ = buffer.try_push(value);
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::StreamPlayError(e.to_string()))?;

        tracing::info!(
            "Microphone opened: {} Hz, {} channels",
            source_rate,
            channels
        );

        Ok(Box::new(CpalInput {
            _stream: stream,
            buffer,
        }))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(MediaError::NoOutputDevice)?;
        let config = find_best_config(device.supported_output_configs().map_err(|e| {
            MediaError::UnsupportedConfig(e.to_string())
        })?)?;

        // Mehrfache der kleinsten sicheren Puffergröße, um Netzwerk-Jitter
        // zu schlucken
        let capacity = AUDIO_CHUNK_SIZE * 8;
        let buffer = Arc::new(Mutex::new(HeapRb::<i16>::new(capacity)));
        let playback_buffer = Arc::clone(&buffer);
        let target_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = playback_buffer.lock();
                    let frames = data.len() / channels;
                    let ratio = AUDIO_SAMPLE_RATE as f32 / target_rate as f32;
                    let mut consumed = 0f32;
                    let mut current = buffer.try_pop().unwrap_or(0);

                    for frame in 0..frames {
                        // Einfaches Nachzieh-Resampling 16kHz -> Gerät
                        consumed += ratio;
                        while consumed >= 1.0 {
                            current = buffer.try_pop().unwrap_or(0);
                            consumed -= 1.0;
                        }
                        let value = current as f32 / i16::MAX as f32;
                        for ch in 0..channels {
                            if let Some(slot) = data.get_mut(frame * channels + ch) {
                                *slot = value;
                            }
                        }
                    }
                },
                |err| {
                    tracing::error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::StreamPlayError(e.to_string()))?;

        tracing::info!("Speaker opened: {} Hz, {} channels", target_rate, channels);

        Ok(Box::new(CpalOutput {
            _stream: stream,
            buffer,
        }))
    }
}

/// Mikrofon-Quelle über cpal-Stream und Ring-Buffer
struct CpalInput {
    _stream: Stream,
    buffer: Arc<Mutex<HeapRb<i16>>>,
}

// Stream ist nicht Send; der Input bleibt aber für seine gesamte
// Lebensdauer auf dem Capture-Thread
unsafe impl Send for CpalInput {}

impl AudioInput for CpalInput {
    fn read(&mut self, dst: &mut [i16]) -> Result<usize, MediaError> {
        let deadline = std::time::Instant::now() + READ_POLL_LIMIT;

        loop {
            {
                let mut buffer = self.buffer.lock();
                if buffer.occupied_len() >= dst.len() {
                    for slot in dst.iter_mut() {
                        *slot = buffer.try_pop().unwrap_or(0);
                    }
                    return Ok(dst.len());
                }
            }
            if std::time::Instant::now() >= deadline {
                return Ok(0);
            }
            std::thread::sleep(READ_POLL_INTERVAL);
        }
    }
}

/// Lautsprecher-Senke über cpal-Stream und Ring-Buffer
struct CpalOutput {
    _stream: Stream,
    buffer: Arc<Mutex<HeapRb<i16>>>,
}

// Stream ist nicht Send; siehe CpalInput
unsafe impl Send for CpalOutput {}

impl AudioOutput for CpalOutput {
    fn write(&mut self, samples: &[i16]) -> Result<usize, MediaError> {
        let mut buffer = self.buffer.lock();
        let mut accepted = 0;
        for &sample in samples {
            if buffer.try_push(sample).is_err() {
                break;
            }
            accepted += 1;
        }
        Ok(accepted)
    }
}

/// Mittelt verschränkte Kanäle auf Mono
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches Linear-Resampling
fn resample(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }
    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

/// Wählt die beste Stream-Konfiguration (F32 bevorzugt, 16kHz wenn möglich)
fn find_best_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
) -> Result<StreamConfig, MediaError> {
    let configs: Vec<_> = configs.collect();
    let target_rate = cpal::SampleRate(AUDIO_SAMPLE_RATE);

    // Exakt 16kHz mit F32
    for config in &configs {
        if config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
            && config.sample_format() == SampleFormat::F32
        {
            return Ok(config.clone().with_sample_rate(target_rate).into());
        }
    }

    // Fallback auf beste verfügbare F32-Konfiguration
    for config in &configs {
        if config.sample_format() == SampleFormat::F32 {
            return Ok(config.clone().with_max_sample_rate().into());
        }
    }

    // Nehme erste verfügbare Konfiguration
    if let Some(config) = configs.first() {
        return Ok(config.clone().with_max_sample_rate().into());
    }

    Err(MediaError::UnsupportedConfig(
        "no suitable audio configuration found".to_string(),
    ))
}

// ============================================================================
// TEST BACKEND
// ============================================================================

/// Skriptbares Audio-Backend für Tests
#[cfg(test)]
pub(crate) mod testaudio {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    pub(crate) struct TestAudioBackend {
        pub(crate) input_chunks: Mutex<VecDeque<Vec<i16>>>,
        /// Kein Mikrofon vorhanden
        pub(crate) fail_input: AtomicBool,
        /// Kein Lautsprecher vorhanden
        pub(crate) fail_output: AtomicBool,
        /// Angenommene Samples pro write (usize::MAX = alle)
        pub(crate) accept_limit: AtomicUsize,
        /// Nächster write schlägt fehl
        pub(crate) fail_next_write: AtomicBool,
        pub(crate) written: Mutex<Vec<i16>>,
        pub(crate) outputs_opened: AtomicUsize,
    }

    impl TestAudioBackend {
        pub(crate) fn new() -> Arc<Self> {
            let backend = Self {
                accept_limit: AtomicUsize::new(usize::MAX),
                ..Self::default()
            };
            Arc::new(backend)
        }

        pub(crate) fn push_input(&self, chunk: Vec<i16>) {
            self.input_chunks.lock().push_back(chunk);
        }
    }

    impl AudioBackend for Arc<TestAudioBackend> {
        fn open_input(&self) -> Result<Box<dyn AudioInput>, MediaError> {
            if self.fail_input.load(Ordering::SeqCst) {
                return Err(MediaError::NoInputDevice);
            }
            Ok(Box::new(TestInput {
                backend: Arc::clone(self),
            }))
        }

        fn open_output(&self) -> Result<Box<dyn AudioOutput>, MediaError> {
            if self.fail_output.load(Ordering::SeqCst) {
                return Err(MediaError::NoOutputDevice);
            }
            self.outputs_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestOutput {
                backend: Arc::clone(self),
            }))
        }
    }

    struct TestInput {
        backend: Arc<TestAudioBackend>,
    }

    impl AudioInput for TestInput {
        fn read(&mut self, dst: &mut [i16]) -> Result<usize, MediaError> {
            match self.backend.input_chunks.lock().pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(dst.len());
                    dst[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => {
                    // Skript leer: kurz warten, damit die Schleife ihr
                    // Stop-Flag prüfen kann
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(0)
                }
            }
        }
    }

    struct TestOutput {
        backend: Arc<TestAudioBackend>,
    }

    impl AudioOutput for TestOutput {
        fn write(&mut self, samples: &[i16]) -> Result<usize, MediaError> {
            if self.backend.fail_next_write.swap(false, Ordering::SeqCst) {
                return Err(MediaError::StreamPlayError("device lost".into()));
            }
            let limit = self.backend.accept_limit.load(Ordering::SeqCst);
            let accepted = samples.len().min(limit);
            self.backend
                .written
                .lock()
                .extend_from_slice(&samples[..accepted]);
            Ok(accepted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testaudio::TestAudioBackend;
    use super::*;

    fn loud_chunk() -> Vec<i16> {
        vec![8_000; AUDIO_CHUNK_SIZE]
    }

    fn quiet_chunk() -> Vec<i16> {
        vec![10; AUDIO_CHUNK_SIZE]
    }

    #[test]
    fn test_rms_bounds() {
        assert_eq!(rms_level(&[0; 64]), 0.0);
        let full = rms_level(&vec![i16::MAX; 64]);
        assert!((full - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_gate_starts_speaking_once() {
        let mut gate = VoiceActivityGate::new(GateSettings::default());

        let verdict = gate.process(&loud_chunk());
        assert!(verdict.forward);
        assert_eq!(verdict.transition, Some(true));

        // Zweiter lauter Puffer: kein weiterer Wechsel
        let verdict = gate.process(&loud_chunk());
        assert!(verdict.forward);
        assert_eq!(verdict.transition, None);
    }

    #[test]
    fn test_gate_keeps_speaking_within_hangover() {
        let mut gate = VoiceActivityGate::new(GateSettings::default());
        gate.process(&loud_chunk());

        for _ in 0..5 {
            let verdict = gate.process(&quiet_chunk());
            assert!(verdict.forward);
            assert_eq!(verdict.transition, None);
        }
        assert!(gate.is_speaking());
    }

    #[test]
    fn test_gate_flips_exactly_once_after_hangover() {
        let mut gate = VoiceActivityGate::new(GateSettings::default());
        gate.process(&loud_chunk());

        let mut transitions = Vec::new();
        for _ in 0..8 {
            if let Some(t) = gate.process(&quiet_chunk()).transition {
                transitions.push(t);
            }
        }

        assert_eq!(transitions, vec![false]);
        assert!(!gate.is_speaking());
    }

    #[test]
    fn test_gate_speech_resets_hangover() {
        let mut gate = VoiceActivityGate::new(GateSettings::default());
        gate.process(&loud_chunk());

        for _ in 0..4 {
            gate.process(&quiet_chunk());
        }
        // Sprache setzt den Zähler zurück
        gate.process(&loud_chunk());
        for _ in 0..5 {
            assert_eq!(gate.process(&quiet_chunk()).transition, None);
        }
        assert!(gate.is_speaking());
    }

    #[tokio::test]
    async fn test_missing_microphone_fails_start() {
        let backend = TestAudioBackend::new();
        backend.fail_input.store(true, Ordering::SeqCst);
        let streaming = Arc::new(AtomicBool::new(false));

        let result = AudioProducer::start(
            Arc::new(Arc::clone(&backend)),
            GateSettings::default(),
            Arc::clone(&streaming),
        );

        assert!(matches!(result, Err(MediaError::NoInputDevice)));
        assert!(!streaming.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_speech_chunks_are_forwarded() {
        let backend = TestAudioBackend::new();
        backend.push_input(loud_chunk());
        backend.push_input(loud_chunk());

        let streaming = Arc::new(AtomicBool::new(false));
        let (producer, mut chunk_rx) = AudioProducer::start(
            Arc::new(Arc::clone(&backend)),
            GateSettings::default(),
            Arc::clone(&streaming),
        )
        .unwrap();

        assert!(streaming.load(Ordering::SeqCst));

        let first = tokio::time::timeout(Duration::from_secs(1), chunk_rx.recv())
            .await
            .expect("timed out")
            .expect("chunk expected");
        assert_eq!(first.samples.len(), AUDIO_CHUNK_SIZE);

        producer.stop();
        assert!(!streaming.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_muted_forwards_nothing() {
        let backend = TestAudioBackend::new();
        let streaming = Arc::new(AtomicBool::new(false));
        let (producer, mut chunk_rx) = AudioProducer::start(
            Arc::new(Arc::clone(&backend)),
            GateSettings::default(),
            Arc::clone(&streaming),
        )
        .unwrap();

        producer.set_muted(true);
        backend.push_input(loud_chunk());
        backend.push_input(loud_chunk());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(chunk_rx.try_recv().is_err());

        producer.stop();
    }
}
