//! Wiedergabe-Senke für Remote-Media
//!
//! Hält den jeweils letzten empfangenen Video-Frame (Latest-wins, keine
//! Warteschlange) und schreibt empfangene Audio-Chunks auf das
//! Ausgabegerät. Das Gerät wird lazy erzeugt und nach unbehebbaren
//! Fehlern beim nächsten Chunk neu aufgebaut; Short Writes werden geloggt
//! und überlebt, nie dem Anruf angelastet.

use super::audio::{rms_level, AudioBackend, AudioOutput};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// REMOTE FRAME
// ============================================================================

/// Der zuletzt empfangene Video-Frame der Gegenseite
#[derive(Debug, Clone)]
pub struct RemoteFrame {
    /// JPEG-Bytes wie empfangen
    pub pixel_bytes: Vec<u8>,
    pub from_user_id: String,
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// PLAYBACK SINK
// ============================================================================

/// Senke für empfangene Remote-Frames und -Audio
pub struct PlaybackSink {
    backend: Arc<dyn AudioBackend>,
    output: Mutex<Option<Box<dyn AudioOutput>>>,
    frame: Mutex<Option<RemoteFrame>>,
    output_level: Mutex<f32>,
}

impl PlaybackSink {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            output: Mutex::new(None),
            frame: Mutex::new(None),
            output_level: Mutex::new(0.0),
        }
    }

    /// Überschreibt den Frame-Slot (Latest-wins)
    pub fn store_frame(&self, frame: RemoteFrame) {
        *self.frame.lock() = Some(frame);
    }

    /// Letzter empfangener Frame, falls vorhanden
    pub fn latest_frame(&self) -> Option<RemoteFrame> {
        self.frame.lock().clone()
    }

    /// Dekodiert den letzten Frame nach RGB8 (Breite, Höhe, Pixel)
    pub fn decode_latest(&self) -> Option<(u32, u32, Vec<u8>)> {
        let frame = self.frame.lock().clone()?;
        match image::load_from_memory(&frame.pixel_bytes) {
            Ok(decoded) => {
                let rgb = decoded.to_rgb8();
                Some((rgb.width(), rgb.height(), rgb.into_raw()))
            }
            Err(e) => {
                tracing::warn!("Failed to decode remote frame: {}", e);
                None
            }
        }
    }

    /// Spielt einen empfangenen Audio-Chunk ab
    ///
    /// Ohne Gerät wird eines erzeugt; scheitert das, wird der Chunk
    /// verworfen und beim nächsten erneut versucht. Ein Short Write
    /// (Jitter-Puffer voll) wird geloggt und ignoriert; ein Gerätefehler
    /// reißt das Gerät ab, der nächste Chunk baut es neu auf.
    pub fn play_chunk(&self, samples: &[i16]) {
        let mut guard = self.output.lock();

        if guard.is_none() {
            match self.backend.open_output() {
                Ok(output) => *guard = Some(output),
                Err(e) => {
                    tracing::warn!("Audio output unavailable, dropping chunk: {}", e);
                    return;
                }
            }
        }

        if let Some(output) = guard.as_mut() {
            match output.write(samples) {
                Ok(accepted) if accepted < samples.len() => {
                    tracing::warn!(
                        "Audio output short write: {} of {} samples",
                        accepted,
                        samples.len()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Audio output failed, will recreate device: {}", e);
                    *guard = None;
                }
            }
        }

        *self.output_level.lock() = rms_level(samples).min(1.0);
    }

    /// Aktueller Ausgangspegel (0.0 - 1.0) für Visualisierung
    pub fn output_level(&self) -> f32 {
        *self.output_level.lock()
    }

    /// Gibt Gerät und Frame-Slot frei (Anruf-Ende)
    pub fn release(&self) {
        *self.output.lock() = None;
        *self.frame.lock() = None;
        *self.output_level.lock() = 0.0;
        tracing::debug!("Playback sink released");
    }

    /// True solange ein Ausgabegerät offen ist
    pub fn has_output(&self) -> bool {
        self.output.lock().is_some()
    }
}

impl std::fmt::Debug for PlaybackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSink")
            .field("has_output", &self.has_output())
            .field("has_frame", &self.frame.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::audio::testaudio::TestAudioBackend;
    use std::sync::atomic::Ordering;

    fn sink(backend: &Arc<TestAudioBackend>) -> PlaybackSink {
        PlaybackSink::new(Arc::new(Arc::clone(backend)))
    }

    fn frame(data: &[u8], user: &str) -> RemoteFrame {
        RemoteFrame {
            pixel_bytes: data.to_vec(),
            from_user_id: user.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_latest_frame_wins() {
        let backend = TestAudioBackend::new();
        let sink = sink(&backend);

        sink.store_frame(frame(&[1], "u2"));
        sink.store_frame(frame(&[2], "u2"));

        assert_eq!(sink.latest_frame().unwrap().pixel_bytes, vec![2]);
    }

    #[test]
    fn test_first_chunk_opens_device_lazily() {
        let backend = TestAudioBackend::new();
        let sink = sink(&backend);
        assert!(!sink.has_output());

        sink.play_chunk(&[100; 320]);

        assert!(sink.has_output());
        assert_eq!(backend.outputs_opened.load(Ordering::SeqCst), 1);
        assert_eq!(backend.written.lock().len(), 320);
    }

    #[test]
    fn test_short_write_survives() {
        let backend = TestAudioBackend::new();
        backend.accept_limit.store(100, Ordering::SeqCst);
        let sink = sink(&backend);

        sink.play_chunk(&[100; 320]);
        sink.play_chunk(&[100; 320]);

        // Gerät bleibt bestehen, es wurde nur gekürzt geschrieben
        assert!(sink.has_output());
        assert_eq!(backend.outputs_opened.load(Ordering::SeqCst), 1);
        assert_eq!(backend.written.lock().len(), 200);
    }

    #[test]
    fn test_device_error_recreates_on_next_chunk() {
        let backend = TestAudioBackend::new();
        let sink = sink(&backend);

        sink.play_chunk(&[100; 320]);
        backend.fail_next_write.store(true, Ordering::SeqCst);
        sink.play_chunk(&[100; 320]);
        assert!(!sink.has_output());

        sink.play_chunk(&[100; 320]);
        assert!(sink.has_output());
        assert_eq!(backend.outputs_opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_output_drops_chunk() {
        let backend = TestAudioBackend::new();
        backend.fail_output.store(true, Ordering::SeqCst);
        let sink = sink(&backend);

        sink.play_chunk(&[100; 320]);

        assert!(!sink.has_output());
        assert!(backend.written.lock().is_empty());
    }

    #[test]
    fn test_release_drops_device_and_frame() {
        let backend = TestAudioBackend::new();
        let sink = sink(&backend);
        sink.play_chunk(&[100; 320]);
        sink.store_frame(frame(&[1], "u2"));

        sink.release();

        assert!(!sink.has_output());
        assert!(sink.latest_frame().is_none());
    }

    #[test]
    fn test_decode_valid_jpeg() {
        use image::codecs::jpeg::JpegEncoder;
        use image::{DynamicImage, RgbImage};

        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, image::Rgb([90, 90, 90])));
        let mut jpeg = Vec::new();
        image
            .write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, 80))
            .unwrap();

        let backend = TestAudioBackend::new();
        let sink = sink(&backend);
        sink.store_frame(frame(&jpeg, "u2"));

        let (width, height, rgb) = sink.decode_latest().unwrap();
        assert_eq!((width, height), (6, 4));
        assert_eq!(rgb.len(), 6 * 4 * 3);
    }

    #[test]
    fn test_decode_garbage_returns_none() {
        let backend = TestAudioBackend::new();
        let sink = sink(&backend);
        sink.store_frame(frame(&[0, 1, 2, 3], "u2"));

        assert!(sink.decode_latest().is_none());
    }
}
