//! Netzwerk-Qualitäts-Sampler
//!
//! Fragt in festem Takt die aktive Netzwerkverbindung ab und stuft sie in
//! eine diskrete Qualitätsstufe ein. Die Einstufung ist eine reine Funktion
//! der Einzelmessung; veröffentlicht wird nur bei Änderung.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// SAMPLES & TIERS
// ============================================================================

/// Art des aktiven Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Wifi,
    Ethernet,
    Cellular,
    /// Kein nutzbarer Transport
    None,
}

impl TransportKind {
    /// Draht-/Log-Name des Transports
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Wifi => "wifi",
            TransportKind::Ethernet => "ethernet",
            TransportKind::Cellular => "cellular",
            TransportKind::None => "none",
        }
    }
}

/// Eine Einzelmessung der Netzwerkverbindung
///
/// Nur die jeweils letzte Messung wird gehalten, es gibt keine Historie.
#[derive(Debug, Clone)]
pub struct NetworkQualitySample {
    pub transport_kind: TransportKind,
    pub estimated_downstream_kbps: u32,
    pub measured_at: DateTime<Utc>,
}

/// Diskrete Qualitätsstufe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Stuft eine Einzelmessung ein
///
/// Reine Funktion ohne Hysterese; jede Messung steht für sich.
pub fn classify(sample: &NetworkQualitySample) -> QualityTier {
    match sample.transport_kind {
        TransportKind::Wifi | TransportKind::Ethernet => {
            if sample.estimated_downstream_kbps > 5_000 {
                QualityTier::Excellent
            } else {
                QualityTier::Good
            }
        }
        TransportKind::Cellular => {
            if sample.estimated_downstream_kbps > 10_000 {
                QualityTier::Good
            } else if sample.estimated_downstream_kbps > 2_000 {
                QualityTier::Fair
            } else {
                QualityTier::Poor
            }
        }
        TransportKind::None => QualityTier::Poor,
    }
}

// ============================================================================
// NETWORK PROBE
// ============================================================================

/// Zugriff auf die Verbindungsdaten der Plattform
///
/// Konnektivitäts-APIs sind pro Plattform verschieden; die einbettende
/// Anwendung kann hier ihre eigene Messung einhängen.
pub trait NetworkProbe: Send + Sync {
    fn sample(&self) -> NetworkQualitySample;
}

/// Probe mit festen Werten
///
/// Standard, solange keine Plattform-Probe eingehängt ist (WLAN mit
/// konservativer Schätzung), und Arbeitspferd der Tests.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub transport_kind: TransportKind,
    pub estimated_downstream_kbps: u32,
}

impl StaticProbe {
    pub fn new(transport_kind: TransportKind, estimated_downstream_kbps: u32) -> Self {
        Self {
            transport_kind,
            estimated_downstream_kbps,
        }
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(TransportKind::Wifi, 3_000)
    }
}

impl NetworkProbe for StaticProbe {
    fn sample(&self) -> NetworkQualitySample {
        NetworkQualitySample {
            transport_kind: self.transport_kind,
            estimated_downstream_kbps: self.estimated_downstream_kbps,
            measured_at: Utc::now(),
        }
    }
}

// ============================================================================
// SAMPLER
// ============================================================================

/// Standard-Abtastintervall
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Timer-Task, der die Probe abfragt und Stufenwechsel veröffentlicht
pub struct NetworkQualitySampler {
    tier_tx: watch::Sender<QualityTier>,
    transport_tx: watch::Sender<TransportKind>,
    task: JoinHandle<()>,
}

impl NetworkQualitySampler {
    /// Startet den Sampler
    ///
    /// Die erste Messung geschieht sofort und setzt die Ausgangsstufe;
    /// danach wird nur noch bei Änderung veröffentlicht.
    pub fn start(probe: Arc<dyn NetworkProbe>, interval: Duration) -> Self {
        let first = probe.sample();
        let initial = classify(&first);
        let (tier_tx, _) = watch::channel(initial);
        let (transport_tx, _) = watch::channel(first.transport_kind);
        let tx = tier_tx.clone();
        let transport = transport_tx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // erster Tick feuert sofort
            let mut last = initial;

            loop {
                ticker.tick().await;
                let sample = probe.sample();
                let tier = classify(&sample);

                transport.send_if_modified(|kind| {
                    if *kind != sample.transport_kind {
                        *kind = sample.transport_kind;
                        true
                    } else {
                        false
                    }
                });

                if tier != last {
                    tracing::info!(
                        "Network quality changed: {:?} -> {:?} (transport={}, {} kbps)",
                        last,
                        tier,
                        sample.transport_kind.as_str(),
                        sample.estimated_downstream_kbps
                    );
                    last = tier;
                    let _ = tx.send(tier);
                }
            }
        });

        Self {
            tier_tx,
            transport_tx,
            task,
        }
    }

    /// Receiver für Stufenwechsel
    pub fn subscribe(&self) -> watch::Receiver<QualityTier> {
        self.tier_tx.subscribe()
    }

    /// Zuletzt veröffentlichte Stufe
    pub fn current_tier(&self) -> QualityTier {
        *self.tier_tx.borrow()
    }

    /// Zuletzt beobachteter Transport, für Diagnosezwecke
    pub fn current_transport(&self) -> TransportKind {
        *self.transport_tx.borrow()
    }

    /// Stoppt den Timer-Task
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for NetworkQualitySampler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
