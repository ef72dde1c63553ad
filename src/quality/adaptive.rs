//! Adaptive Qualitätssteuerung
//!
//! Bildet Qualitätsstufen auf feste Stream-Profile ab und entscheidet bei
//! jedem Stufenwechsel, wie der Video-Produzent umkonfiguriert wird. Bei
//! schwerer Degradierung fällt ein Video-Anruf auf Audio-only zurück.

use super::sampler::QualityTier;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// STREAM PROFILES
// ============================================================================

/// Ziel-Parameter für den Video-Produzenten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    /// JPEG-Qualitätsfaktor 0-100
    pub compression_quality: u8,
    pub target_bitrate_kbps: u32,
}

/// Festes Profil pro Qualitätsstufe
pub fn profile_for(tier: QualityTier) -> StreamProfile {
    match tier {
        QualityTier::Excellent => StreamProfile {
            width: 640,
            height: 480,
            compression_quality: 80,
            target_bitrate_kbps: 1_200,
        },
        QualityTier::Good => StreamProfile {
            width: 480,
            height: 360,
            compression_quality: 70,
            target_bitrate_kbps: 600,
        },
        QualityTier::Fair => StreamProfile {
            width: 320,
            height: 240,
            compression_quality: 50,
            target_bitrate_kbps: 300,
        },
        QualityTier::Poor => StreamProfile {
            width: 240,
            height: 180,
            compression_quality: 30,
            target_bitrate_kbps: 150,
        },
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Hinweistext an den lokalen Teilnehmer beim Rückfall auf Audio-only
pub const POOR_NETWORK_NOTICE: &str = "Video disabled due to poor network quality";

/// Reaktion auf einen Stufenwechsel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveAction {
    /// Adaptiver Modus ist aus; Wechsel nur beobachtet
    Observe,
    /// Video-Produzent auf das neue Profil umstellen
    Reconfigure(StreamProfile),
    /// Zusätzlich Video deaktivieren und Hinweis anzeigen
    FallBackToAudio(StreamProfile),
}

/// Entscheidet pro Stufenwechsel über die Reaktion des Engines
///
/// Der Controller hält keinerlei Geräte-Handles; die Ausführung der
/// Entscheidung (Umkonfigurieren, Video stoppen, Hinweis anhängen) liegt
/// beim Engine, der den Video-Produzenten besitzt.
pub struct AdaptiveQualityController {
    enabled: AtomicBool,
}

impl AdaptiveQualityController {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// Schaltet den adaptiven Modus um
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!("Adaptive quality mode: {}", enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Reaktion auf einen Stufenwechsel bestimmen
    ///
    /// `is_video_call` und `video_streaming` beschreiben den Moment des
    /// Wechsels; der Rückfall auf Audio-only greift nur, wenn gerade
    /// wirklich Video gesendet wird.
    pub fn decide(
        &self,
        tier: QualityTier,
        is_video_call: bool,
        video_streaming: bool,
    ) -> AdaptiveAction {
        if !self.is_enabled() {
            return AdaptiveAction::Observe;
        }

        let profile = profile_for(tier);
        if tier == QualityTier::Poor && is_video_call && video_streaming {
            AdaptiveAction::FallBackToAudio(profile)
        } else {
            AdaptiveAction::Reconfigure(profile)
        }
    }
}

impl Default for AdaptiveQualityController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_match_table() {
        assert_eq!(
            profile_for(QualityTier::Excellent),
            StreamProfile {
                width: 640,
                height: 480,
                compression_quality: 80,
                target_bitrate_kbps: 1_200
            }
        );
        assert_eq!(profile_for(QualityTier::Good).width, 480);
        assert_eq!(profile_for(QualityTier::Fair).compression_quality, 50);
        assert_eq!(profile_for(QualityTier::Poor).target_bitrate_kbps, 150);
    }

    #[test]
    fn test_disabled_mode_only_observes() {
        let controller = AdaptiveQualityController::new();
        controller.set_enabled(false);

        assert_eq!(
            controller.decide(QualityTier::Poor, true, true),
            AdaptiveAction::Observe
        );
    }

    #[test]
    fn test_poor_tier_falls_back_to_audio() {
        let controller = AdaptiveQualityController::new();

        assert_eq!(
            controller.decide(QualityTier::Poor, true, true),
            AdaptiveAction::FallBackToAudio(profile_for(QualityTier::Poor))
        );
    }

    #[test]
    fn test_poor_without_video_only_reconfigures() {
        let controller = AdaptiveQualityController::new();

        // Audio-Anruf
        assert_eq!(
            controller.decide(QualityTier::Poor, false, false),
            AdaptiveAction::Reconfigure(profile_for(QualityTier::Poor))
        );
        // Video-Anruf, Video aber bereits aus
        assert_eq!(
            controller.decide(QualityTier::Poor, true, false),
            AdaptiveAction::Reconfigure(profile_for(QualityTier::Poor))
        );
    }

    #[test]
    fn test_recovery_reconfigures_upwards() {
        let controller = AdaptiveQualityController::new();

        assert_eq!(
            controller.decide(QualityTier::Excellent, true, true),
            AdaptiveAction::Reconfigure(profile_for(QualityTier::Excellent))
        );
    }
}
