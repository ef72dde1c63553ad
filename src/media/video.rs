//! Video-Produzent
//!
//! Nimmt rohe planare Frames von der Kamera entgegen, drosselt auf die
//! Ziel-Framerate, konvertiert, komprimiert nach JPEG und korrigiert die
//! Sensor-Rotation. Ausgabe ist ein Latest-wins-Slot: ein neuer Frame
//! überschreibt einen noch nicht konsumierten, es wird nie gepuffert.

use super::camera::{CameraFacing, CameraHost, CameraInfo, FrameSink, PlanarFrame};
use super::convert::{interleaved_to_rgb, planar_to_interleaved};
use super::MediaError;
use crate::quality::{profile_for, QualityTier, StreamProfile};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

// ============================================================================
// FRAME TYPE
// ============================================================================

/// Ein fertig kodierter Video-Frame
///
/// `rotation_degrees` dokumentiert die bereits angewandte Korrektur;
/// `width`/`height` beschreiben das Bild nach der Rotation.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// JPEG-Bytes
    pub pixel_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Konfiguration des Video-Produzenten
#[derive(Debug, Clone)]
pub struct VideoSettings {
    /// Bevorzugte Blickrichtung bei der Kamera-Auswahl
    pub preferred_facing: CameraFacing,
    /// Mindestabstand zwischen zwei verarbeiteten Frames (~10 fps)
    pub min_frame_interval: Duration,
    /// Profil bis zur ersten adaptiven Umstellung
    pub initial_profile: StreamProfile,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            preferred_facing: CameraFacing::Front,
            min_frame_interval: Duration::from_millis(100),
            initial_profile: profile_for(QualityTier::Good),
        }
    }
}

// ============================================================================
// VIDEO PRODUCER
// ============================================================================

/// Produzent für den lokalen Video-Stream
pub struct VideoProducer {
    host: Arc<dyn CameraHost>,
    settings: VideoSettings,
    profile: Arc<Mutex<StreamProfile>>,
    device: Mutex<Option<Box<dyn super::camera::CameraDevice>>>,
    /// Geteiltes `is_video_streaming`-Flag des Engines
    streaming: Arc<AtomicBool>,
    frames_emitted: Arc<AtomicU64>,
    frame_tx: watch::Sender<Option<VideoFrame>>,
}

impl VideoProducer {
    pub fn new(
        host: Arc<dyn CameraHost>,
        settings: VideoSettings,
        streaming: Arc<AtomicBool>,
    ) -> Self {
        let (frame_tx, _) = watch::channel(None);
        let profile = Arc::new(Mutex::new(settings.initial_profile));

        Self {
            host,
            settings,
            profile,
            device: Mutex::new(None),
            streaming,
            frames_emitted: Arc::new(AtomicU64::new(0)),
            frame_tx,
        }
    }

    /// Receiver für den Latest-wins-Frame-Slot
    pub fn subscribe(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frame_tx.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Anzahl tatsächlich kodierter Frames (gedrosselte zählen nicht)
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::SeqCst)
    }

    /// Startet die Aufnahme auf der bevorzugten Kamera
    pub fn start(&self) -> Result<(), MediaError> {
        if self.device.lock().is_some() {
            return Ok(());
        }

        let info = self
            .select_camera(self.settings.preferred_facing)
            .ok_or_else(|| MediaError::CameraUnavailable("no camera available".into()))?;

        self.open_and_stream(info)?;
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stoppt die Aufnahme und gibt die Kamera frei
    pub fn stop(&self) {
        if let Some(mut device) = self.device.lock().take() {
            device.stop();
            tracing::info!("Video capture stopped");
        }
        self.streaming.store(false, Ordering::SeqCst);
    }

    /// Stellt den Produzenten auf ein neues Stream-Profil um
    pub fn reconfigure(&self, profile: StreamProfile) {
        *self.profile.lock() = profile;

        if let Some(device) = self.device.lock().as_mut() {
            if let Err(e) = device.configure(profile.width, profile.height) {
                tracing::warn!("Camera reconfigure failed: {}", e);
            }
        }

        tracing::info!(
            "Stream profile now {}x{}, quality {}, {} kbps",
            profile.width,
            profile.height,
            profile.compression_quality,
            profile.target_bitrate_kbps
        );
    }

    /// Wechselt auf die jeweils andere Kamera
    ///
    /// Das Streaming-Flag bleibt über die Close/Reopen-Sequenz hinweg
    /// unangetastet, damit Beobachter keinen Schein-Übergang sehen.
    pub fn switch_camera(&self) -> Result<(), MediaError> {
        let (current_id, current_facing) = {
            let mut guard = self.device.lock();
            let mut current = guard
                .take()
                .ok_or_else(|| MediaError::CameraUnavailable("no active camera".into()))?;
            let info = current.info().clone();
            current.stop();
            (info.id, info.facing)
        };

        let cameras = self.host.cameras();
        let next = cameras
            .iter()
            .find(|c| c.facing != current_facing)
            .or_else(|| cameras.iter().find(|c| c.id != current_id))
            .cloned()
            .ok_or_else(|| {
                MediaError::CameraUnavailable("no other camera to switch to".into())
            })?;

        tracing::info!("Switching camera to '{}'", next.label);

        match self.open_and_stream(next) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.streaming.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Kamera-Auswahl: bevorzugte Blickrichtung, dann andere Blickrichtung,
    /// dann irgendein Gerät
    fn select_camera(&self, preferred: CameraFacing) -> Option<CameraInfo> {
        let cameras = self.host.cameras();
        cameras
            .iter()
            .find(|c| c.facing == preferred)
            .or_else(|| cameras.iter().find(|c| c.facing != preferred))
            .or_else(|| cameras.first())
            .cloned()
    }

    fn open_and_stream(&self, info: CameraInfo) -> Result<(), MediaError> {
        let mut device = self.host.open(&info.id)?;

        let profile = *self.profile.lock();
        device.configure(profile.width, profile.height)?;

        // Sensor-Rotation einmalig beim Öffnen ermitteln; die Senke trägt
        // sie als feste Korrektur für jeden Frame dieses Geräts
        let rotation = device.sensor_rotation();
        device.start(self.make_sink(rotation))?;
        *self.device.lock() = Some(device);

        tracing::info!(
            "Video capture started on '{}' ({}x{}, rotation {}°)",
            info.label,
            profile.width,
            profile.height,
            rotation
        );
        Ok(())
    }

    /// Baut die Frame-Senke mit Drosselung und Kodier-Pipeline
    fn make_sink(&self, rotation: u32) -> FrameSink {
        let profile = Arc::clone(&self.profile);
        let frames_emitted = Arc::clone(&self.frames_emitted);
        let frame_tx = self.frame_tx.clone();
        let min_interval = self.settings.min_frame_interval;
        let mut last_emit: Option<Instant> = None;

        Box::new(move |frame: PlanarFrame| {
            // Drosselung vor jeder Verarbeitung: zu schnelle Frames werden
            // verworfen, nie eingereiht
            let now = Instant::now();
            if let Some(prev) = last_emit {
                if now.duration_since(prev) < min_interval {
                    return;
                }
            }
            last_emit = Some(now);

            let profile = *profile.lock();
            match encode_frame(&frame, &profile, rotation) {
                Ok(encoded) => {
                    frames_emitted.fetch_add(1, Ordering::SeqCst);
                    frame_tx.send_replace(Some(encoded));
                }
                Err(e) => {
                    tracing::warn!("Dropping unencodable frame: {}", e);
                }
            }
        })
    }
}

// ============================================================================
// ENCODE PIPELINE
// ============================================================================

/// Konvertiert, skaliert, komprimiert und rotiert einen rohen Frame
fn encode_frame(
    frame: &PlanarFrame,
    profile: &StreamProfile,
    rotation: u32,
) -> Result<VideoFrame, MediaError> {
    let captured_at = Utc::now();

    let interleaved = planar_to_interleaved(frame)?;
    let rgb = interleaved_to_rgb(&interleaved, frame.width, frame.height)?;

    let image = RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| MediaError::EncodeFailed("rgb buffer size mismatch".into()))?;
    let mut image = DynamicImage::ImageRgb8(image);

    if frame.width != profile.width || frame.height != profile.height {
        image = image.resize_exact(profile.width, profile.height, FilterType::Triangle);
    }

    let mut pixel_bytes = encode_jpeg(&image, profile.compression_quality)?;
    let mut width = profile.width;
    let mut height = profile.height;

    // Rotations-Korrektur über Re-Decode, nur bei Korrektur != 0
    if rotation % 360 != 0 {
        let decoded = image::load_from_memory(&pixel_bytes)
            .map_err(|e| MediaError::EncodeFailed(e.to_string()))?;
        let rotated = match rotation % 360 {
            90 => decoded.rotate90(),
            180 => decoded.rotate180(),
            270 => decoded.rotate270(),
            other => {
                tracing::warn!("Ignoring unsupported rotation {}°", other);
                decoded
            }
        };
        width = rotated.width();
        height = rotated.height();
        pixel_bytes = encode_jpeg(&rotated, profile.compression_quality)?;
    }

    Ok(VideoFrame {
        pixel_bytes,
        width,
        height,
        rotation_degrees: rotation,
        captured_at,
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| MediaError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::camera::testcam::{gray_frame, TestCameraHost};
    use crate::media::camera::NoCameraHost;

    fn producer(host: Arc<TestCameraHost>, min_interval: Duration) -> VideoProducer {
        let settings = VideoSettings {
            min_frame_interval: min_interval,
            ..VideoSettings::default()
        };
        VideoProducer::new(host, settings, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_start_without_cameras_fails() {
        let producer = VideoProducer::new(
            Arc::new(NoCameraHost),
            VideoSettings::default(),
            Arc::new(AtomicBool::new(false)),
        );

        assert!(matches!(
            producer.start(),
            Err(MediaError::CameraUnavailable(_))
        ));
        assert!(!producer.is_streaming());
    }

    #[test]
    fn test_start_falls_back_to_other_facing() {
        let host = TestCameraHost::new(
            vec![CameraInfo {
                id: "cam-back".into(),
                label: "Back Camera".into(),
                facing: CameraFacing::Back,
            }],
            0,
        );
        let producer = producer(Arc::clone(&host), Duration::from_millis(100));

        producer.start().unwrap();

        assert!(producer.is_streaming());
        assert_eq!(host.active_camera().as_deref(), Some("cam-back"));
    }

    #[test]
    fn test_burst_frames_are_throttled() {
        let host = TestCameraHost::two_cameras();
        let producer = producer(Arc::clone(&host), Duration::from_millis(50));
        producer.start().unwrap();

        for _ in 0..5 {
            host.push_frame(gray_frame(8, 8));
        }
        assert_eq!(producer.frames_emitted(), 1);

        std::thread::sleep(Duration::from_millis(60));
        host.push_frame(gray_frame(8, 8));
        assert_eq!(producer.frames_emitted(), 2);
    }

    #[test]
    fn test_emitted_frame_lands_in_slot() {
        let host = TestCameraHost::two_cameras();
        let producer = producer(Arc::clone(&host), Duration::from_millis(0));
        let rx = producer.subscribe();
        producer.start().unwrap();

        host.push_frame(gray_frame(8, 8));
        host.push_frame(gray_frame(8, 8));

        let frame = rx.borrow().clone().expect("frame expected");
        assert!(!frame.pixel_bytes.is_empty());
        assert_eq!(producer.frames_emitted(), 2);
    }

    #[test]
    fn test_switch_camera_keeps_streaming_flag() {
        let host = TestCameraHost::two_cameras();
        let producer = producer(Arc::clone(&host), Duration::from_millis(100));
        producer.start().unwrap();
        assert_eq!(host.active_camera().as_deref(), Some("cam-front"));

        producer.switch_camera().unwrap();

        assert!(producer.is_streaming());
        assert_eq!(host.active_camera().as_deref(), Some("cam-back"));
        assert_eq!(host.open_count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reconfigure_applies_resolution() {
        let host = TestCameraHost::two_cameras();
        let producer = producer(Arc::clone(&host), Duration::from_millis(100));
        producer.start().unwrap();

        producer.reconfigure(profile_for(QualityTier::Poor));

        assert_eq!(host.configured(), Some((240, 180)));
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let profile = StreamProfile {
            width: 8,
            height: 4,
            compression_quality: 80,
            target_bitrate_kbps: 600,
        };

        let frame = encode_frame(&gray_frame(8, 4), &profile, 90).unwrap();

        assert_eq!((frame.width, frame.height), (4, 8));
        assert_eq!(frame.rotation_degrees, 90);
        assert!(!frame.pixel_bytes.is_empty());
    }

    #[test]
    fn test_larger_source_scales_down() {
        let profile = StreamProfile {
            width: 4,
            height: 4,
            compression_quality: 50,
            target_bitrate_kbps: 300,
        };

        let frame = encode_frame(&gray_frame(8, 8), &profile, 0).unwrap();

        assert_eq!((frame.width, frame.height), (4, 4));
    }
}
