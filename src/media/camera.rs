//! Kamera-Abstraktion
//!
//! Kamera-Hardware ist pro Plattform verschieden; der Engine spricht sie
//! deshalb über ein schmales Trait-Paar an. Eine Host-Implementierung
//! liefert die verfügbaren Geräte, ein geöffnetes Gerät liefert rohe
//! planare Frames per Callback (kein Polling).

use super::MediaError;

// ============================================================================
// DEVICE DESCRIPTION
// ============================================================================

/// Blickrichtung einer Kamera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
    External,
}

/// Beschreibung eines Kamera-Geräts
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub id: String,
    pub label: String,
    pub facing: CameraFacing,
}

// ============================================================================
// RAW FRAMES
// ============================================================================

/// Eine Bildebene mit eigenen Strides
///
/// `row_stride` kann größer als die Nutzbreite sein (Zeilen-Padding),
/// `pixel_stride` größer als 1 (verschränkte Chroma-Ebenen). Beide müssen
/// bei der Konvertierung berücksichtigt werden.
#[derive(Debug, Clone)]
pub struct FramePlane {
    pub bytes: Vec<u8>,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// Ein roher planarer Frame (YUV 4:2:0, Ebenen Y/U/V)
#[derive(Debug, Clone)]
pub struct PlanarFrame {
    pub width: u32,
    pub height: u32,
    pub planes: Vec<FramePlane>,
}

// ============================================================================
// DEVICE TRAITS
// ============================================================================

/// Senke für fertig aufgenommene Frames; läuft auf dem Capture-Kontext der
/// Kamera, nie auf dem Control-Thread
pub type FrameSink = Box<dyn FnMut(PlanarFrame) + Send + 'static>;

/// Ein geöffnetes Kamera-Gerät
pub trait CameraDevice: Send {
    fn info(&self) -> &CameraInfo;

    /// Einmalig beim Öffnen ermittelte Sensor-Rotation in Grad (0/90/180/270)
    fn sensor_rotation(&self) -> u32;

    /// Gewünschte Aufnahmegröße setzen; darf gerundet werden
    fn configure(&mut self, width: u32, height: u32) -> Result<(), MediaError>;

    /// Capture starten; Frames kommen über die Senke
    fn start(&mut self, sink: FrameSink) -> Result<(), MediaError>;

    /// Capture stoppen und Gerät freigeben
    fn stop(&mut self);
}

/// Zugriff auf die Kameras der Plattform
pub trait CameraHost: Send + Sync {
    /// Alle verfügbaren Geräte
    fn cameras(&self) -> Vec<CameraInfo>;

    /// Gerät anhand seiner ID öffnen
    fn open(&self, id: &str) -> Result<Box<dyn CameraDevice>, MediaError>;
}

/// Host ohne Kamera-Hardware
///
/// Standard, solange die einbettende Anwendung keinen Plattform-Host
/// einhängt. Video-Anrufe degradieren damit zu Audio-only statt zu
/// scheitern.
#[derive(Debug, Default)]
pub struct NoCameraHost;

impl CameraHost for NoCameraHost {
    fn cameras(&self) -> Vec<CameraInfo> {
        Vec::new()
    }

    fn open(&self, id: &str) -> Result<Box<dyn CameraDevice>, MediaError> {
        Err(MediaError::CameraUnavailable(format!(
            "no camera host installed (requested '{id}')"
        )))
    }
}

// ============================================================================
// TEST CAMERA
// ============================================================================

/// Synthetische Kamera für Tests: Frames werden von Hand eingespeist
#[cfg(test)]
pub(crate) mod testcam {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Shared {
        sink: Mutex<Option<FrameSink>>,
        configured: Mutex<Option<(u32, u32)>>,
        active_camera: Mutex<Option<String>>,
    }

    pub(crate) struct TestCameraHost {
        infos: Vec<CameraInfo>,
        rotation: u32,
        shared: Arc<Shared>,
        pub(crate) open_count: AtomicUsize,
    }

    impl TestCameraHost {
        pub(crate) fn new(infos: Vec<CameraInfo>, rotation: u32) -> Arc<Self> {
            Arc::new(Self {
                infos,
                rotation,
                shared: Arc::new(Shared::default()),
                open_count: AtomicUsize::new(0),
            })
        }

        /// Host mit Front- und Rück-Kamera
        pub(crate) fn two_cameras() -> Arc<Self> {
            Self::new(
                vec![
                    CameraInfo {
                        id: "cam-front".into(),
                        label: "Front Camera".into(),
                        facing: CameraFacing::Front,
                    },
                    CameraInfo {
                        id: "cam-back".into(),
                        label: "Back Camera".into(),
                        facing: CameraFacing::Back,
                    },
                ],
                0,
            )
        }

        /// Speist einen Frame in die aktive Senke ein
        pub(crate) fn push_frame(&self, frame: PlanarFrame) {
            if let Some(sink) = self.shared.sink.lock().as_mut() {
                sink(frame);
            }
        }

        pub(crate) fn configured(&self) -> Option<(u32, u32)> {
            *self.shared.configured.lock()
        }

        pub(crate) fn active_camera(&self) -> Option<String> {
            self.shared.active_camera.lock().clone()
        }
    }

    impl CameraHost for TestCameraHost {
        fn cameras(&self) -> Vec<CameraInfo> {
            self.infos.clone()
        }

        fn open(&self, id: &str) -> Result<Box<dyn CameraDevice>, MediaError> {
            let info = self
                .infos
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| MediaError::CameraUnavailable(format!("unknown camera '{id}'")))?;

            self.open_count.fetch_add(1, Ordering::SeqCst);
            *self.shared.active_camera.lock() = Some(info.id.clone());

            Ok(Box::new(TestCameraDevice {
                info,
                rotation: self.rotation,
                shared: Arc::clone(&self.shared),
            }))
        }
    }

    struct TestCameraDevice {
        info: CameraInfo,
        rotation: u32,
        shared: Arc<Shared>,
    }

    impl CameraDevice for TestCameraDevice {
        fn info(&self) -> &CameraInfo {
            &self.info
        }

        fn sensor_rotation(&self) -> u32 {
            self.rotation
        }

        fn configure(&mut self, width: u32, height: u32) -> Result<(), MediaError> {
            *self.shared.configured.lock() = Some((width, height));
            Ok(())
        }

        fn start(&mut self, sink: FrameSink) -> Result<(), MediaError> {
            *self.shared.sink.lock() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            *self.shared.sink.lock() = None;
        }
    }

    /// Grauer planarer Frame mit engen Strides
    pub(crate) fn gray_frame(width: u32, height: u32) -> PlanarFrame {
        let chroma_w = (width as usize).div_ceil(2);
        let chroma_h = (height as usize).div_ceil(2);

        PlanarFrame {
            width,
            height,
            planes: vec![
                FramePlane {
                    bytes: vec![128; width as usize * height as usize],
                    row_stride: width as usize,
                    pixel_stride: 1,
                },
                FramePlane {
                    bytes: vec![128; chroma_w * chroma_h],
                    row_stride: chroma_w,
                    pixel_stride: 1,
                },
                FramePlane {
                    bytes: vec![128; chroma_w * chroma_h],
                    row_stride: chroma_w,
                    pixel_stride: 1,
                },
            ],
        }
    }
}
