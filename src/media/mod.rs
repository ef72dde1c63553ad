//! Media-Modul
//!
//! Capture-Produzenten (Video, Audio mit Sprach-Gate), Pixel-Konvertierung
//! und die Wiedergabe-Senke für Remote-Media. Kamera und Audio-Geräte
//! werden über schmale Traits angesprochen, damit Engine-Szenarien ohne
//! Hardware laufen.

mod audio;
mod camera;
mod convert;
mod playback;
mod video;

pub use audio::{
    rms_level, AudioBackend, AudioChunk, AudioInput, AudioOutput, AudioProducer, CpalBackend,
    GateSettings, GateVerdict, VoiceActivityGate, AUDIO_CHANNELS, AUDIO_CHUNK_SIZE,
    AUDIO_FORWARD_BOUND, AUDIO_SAMPLE_RATE,
};
pub use camera::{
    CameraDevice, CameraFacing, CameraHost, CameraInfo, FramePlane, FrameSink, NoCameraHost,
    PlanarFrame,
};
pub use convert::{interleaved_to_rgb, planar_to_interleaved};
pub use playback::{PlaybackSink, RemoteFrame};
pub use video::{VideoFrame, VideoProducer, VideoSettings};

#[cfg(test)]
pub(crate) use audio::testaudio;
#[cfg(test)]
pub(crate) use camera::testcam;

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    #[error("Unsupported camera frame: {0}")]
    UnsupportedFrame(String),

    #[error("Frame encoding failed: {0}")]
    EncodeFailed(String),
}
