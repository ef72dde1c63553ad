//! Qualitäts-Modul
//!
//! Netzwerk-Sampling, Einstufung in Qualitätsstufen und die adaptive
//! Steuerung des Video-Streams.

mod adaptive;
mod sampler;

pub use adaptive::{
    profile_for, AdaptiveAction, AdaptiveQualityController, StreamProfile, POOR_NETWORK_NOTICE,
};
pub use sampler::{
    classify, NetworkProbe, NetworkQualitySample, NetworkQualitySampler, QualityTier, StaticProbe,
    TransportKind, SAMPLE_INTERVAL,
};
