//! Concurrent multi-port classification.
//!
//! `classify` shortlists the ports, then classifies every shortlisted port at the same
//! time and joins them all; scan latency is bounded by the slowest port. Each port goes
//! through, in order:
//!
//! 1. the cache (a fresh entry is returned as-is),
//! 2. the hardware fast path (a metadata-only guess at or above the threshold is accepted
//!    without opening the port),
//! 3. active probing, starting with the role the hardware guess favours.
//!
//! A failing port is recorded as [`DeviceRole::Unknown`] with its error; it never aborts
//! the scan.
//!
//! Ports a live session already holds are never opened: they keep the role and
//! confidence from the previous report (see [`DeviceClassifier::classify_with_held`]).

use super::scoring::{hardware_guess, HardwareGuess, ScoringWeights};
use super::{
    ClassificationCache, DetectionMethod, DeviceCandidate, DeviceRole, PlatformProfile,
    PortProber,
};
use crate::hardware::PortDescriptor;
use crate::protocol::response::is_identification;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Counts from one classification pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Ports reported by the enumerator
    pub total_ports: usize,
    /// Ports left after platform filtering
    pub candidate_ports: usize,
    /// Ports answered from the cache
    pub cached: usize,
    /// Ports accepted on USB metadata alone
    pub fast_path: usize,
    /// Ports that were actively probed
    pub probed: usize,
    /// Ports skipped because a live session holds them
    pub held: usize,
    /// Candidates identified as the analyzer
    pub xl2_found: usize,
    /// Candidates identified as the GPS receiver
    pub gps_found: usize,
    /// Candidates that could not be identified
    pub unknown: usize,
    /// Wall time of the pass
    pub duration_ms: u64,
    /// When the pass finished
    pub completed_at: DateTime<Utc>,
}

/// Result of [`DeviceClassifier::classify`]: candidates per role, best first.
#[derive(Clone, Debug, Serialize)]
pub struct ClassificationReport {
    /// Identified analyzers
    pub xl2: Vec<DeviceCandidate>,
    /// Identified GPS receivers
    pub gps: Vec<DeviceCandidate>,
    /// Ports nothing was identified on
    pub unknown: Vec<DeviceCandidate>,
    /// Counts and timing of the pass
    pub summary: ScanSummary,
}

impl ClassificationReport {
    /// Candidates for `role`.
    pub fn candidates(&self, role: DeviceRole) -> &[DeviceCandidate] {
        match role {
            DeviceRole::Xl2 => &self.xl2,
            DeviceRole::Gps => &self.gps,
            DeviceRole::Unknown => &self.unknown,
        }
    }

    /// Highest-confidence candidate for `role`.
    pub fn best(&self, role: DeviceRole) -> Option<&DeviceCandidate> {
        self.candidates(role).first()
    }

    /// Every candidate, XL2 first, then GPS, then unknown.
    pub fn all(&self) -> Vec<DeviceCandidate> {
        self.xl2
            .iter()
            .chain(&self.gps)
            .chain(&self.unknown)
            .cloned()
            .collect()
    }
}

enum Source {
    Cache,
    Hardware,
    Probe,
    Held,
}

/// Finds which port hosts which device.
pub struct DeviceClassifier {
    profile: PlatformProfile,
    weights: ScoringWeights,
    prober: Arc<dyn PortProber>,
    cache: ClassificationCache,
    last_report: RwLock<Option<ClassificationReport>>,
}

impl DeviceClassifier {
    /// Classifier for `profile` whose results stay cached for `cache_ttl`.
    pub fn new(
        profile: PlatformProfile,
        weights: ScoringWeights,
        prober: Arc<dyn PortProber>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            profile,
            weights,
            prober,
            cache: ClassificationCache::new(cache_ttl),
            last_report: RwLock::new(None),
        }
    }

    /// Classifies `ports` and remembers the report for later queries.
    pub async fn classify(&self, ports: &[PortDescriptor]) -> ClassificationReport {
        self.classify_with_held(ports, &[]).await
    }

    /// Like [`classify`](Self::classify), but the `(path, role)` pairs in `held` belong to
    /// live sessions and are not opened. Ports on exclusive-open drivers would only
    /// report busy, so a held port keeps its previous candidate for that role, or gets
    /// one scored as if it had answered as that role.
    #[instrument(skip_all, fields(ports = ports.len(), held = held.len()))]
    pub async fn classify_with_held(
        &self,
        ports: &[PortDescriptor],
        held: &[(String, DeviceRole)],
    ) -> ClassificationReport {
        let started = Instant::now();
        let shortlist = self.profile.shortlist(ports);
        debug!(
            shortlisted = shortlist.len(),
            platform = ?self.profile.kind,
            "ports shortlisted"
        );

        let previous = self.all_candidates().await;
        let previous = previous.as_slice();
        let results = join_all(shortlist.iter().map(|port| {
            let held_role = held
                .iter()
                .find(|(path, _)| *path == port.path)
                .map(|(_, role)| *role);
            async move {
                match held_role {
                    Some(role) => (self.held_candidate(port, role, previous), Source::Held),
                    None => self.classify_port(port).await,
                }
            }
        }))
        .await;

        let mut report = ClassificationReport {
            xl2: Vec::new(),
            gps: Vec::new(),
            unknown: Vec::new(),
            summary: ScanSummary {
                total_ports: ports.len(),
                candidate_ports: shortlist.len(),
                cached: 0,
                fast_path: 0,
                probed: 0,
                held: 0,
                xl2_found: 0,
                gps_found: 0,
                unknown: 0,
                duration_ms: 0,
                completed_at: Utc::now(),
            },
        };

        for (candidate, source) in results {
            match source {
                Source::Cache => report.summary.cached += 1,
                Source::Hardware => report.summary.fast_path += 1,
                Source::Probe => report.summary.probed += 1,
                Source::Held => report.summary.held += 1,
            }
            match candidate.role {
                DeviceRole::Xl2 => report.xl2.push(candidate),
                DeviceRole::Gps => report.gps.push(candidate),
                DeviceRole::Unknown => report.unknown.push(candidate),
            }
        }

        // Stable: equal confidence keeps enumeration order
        for list in [&mut report.xl2, &mut report.gps] {
            list.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        }

        report.summary.xl2_found = report.xl2.len();
        report.summary.gps_found = report.gps.len();
        report.summary.unknown = report.unknown.len();
        report.summary.duration_ms = started.elapsed().as_millis() as u64;
        report.summary.completed_at = Utc::now();

        info!(
            xl2 = report.summary.xl2_found,
            gps = report.summary.gps_found,
            unknown = report.summary.unknown,
            probed = report.summary.probed,
            held = report.summary.held,
            duration_ms = report.summary.duration_ms,
            "classification complete"
        );

        *self.last_report.write().await = Some(report.clone());
        report
    }

    fn held_candidate(
        &self,
        port: &PortDescriptor,
        role: DeviceRole,
        previous: &[DeviceCandidate],
    ) -> DeviceCandidate {
        if let Some(candidate) = previous
            .iter()
            .find(|c| c.port.path == port.path && c.role == role)
        {
            debug!(port = %port.path, %role, "held by a live session, keeping last result");
            return candidate.clone();
        }
        let guess = hardware_guess(port, &self.profile, &self.weights);
        let confidence = self.weights.probe_score(guess.score_for(role));
        debug!(port = %port.path, %role, confidence, "held by a live session");
        DeviceCandidate::identified(port.clone(), role, confidence, DetectionMethod::Probe)
    }

    async fn classify_port(&self, port: &PortDescriptor) -> (DeviceCandidate, Source) {
        if let Some(candidate) = self.cache.get(port).await {
            debug!(port = %port.path, role = %candidate.role, "classification cache hit");
            return (candidate, Source::Cache);
        }

        let guess = hardware_guess(port, &self.profile, &self.weights);
        let fast_path = guess.role != DeviceRole::Unknown
            && guess.confidence >= self.weights.fast_path_threshold;
        let (candidate, source) = if fast_path {
            debug!(
                port = %port.path,
                role = %guess.role,
                confidence = guess.confidence,
                "accepted on hardware signature"
            );
            let candidate = DeviceCandidate::identified(
                port.clone(),
                guess.role,
                guess.confidence,
                DetectionMethod::Hardware,
            );
            (candidate, Source::Hardware)
        } else {
            (self.probe(port, &guess).await, Source::Probe)
        };

        self.cache.insert(candidate.clone()).await;
        (candidate, source)
    }

    async fn probe(&self, port: &PortDescriptor, guess: &HardwareGuess) -> DeviceCandidate {
        let mut last_error = None;
        let mut stray_reply = None;

        for role in guess.probe_order() {
            match role {
                DeviceRole::Xl2 => match self.prober.identify_xl2(port).await {
                    Ok(reply) if is_identification(&reply) => {
                        let confidence = self.weights.probe_score(guess.score_for(role));
                        info!(port = %port.path, confidence, "XL2 identified");
                        return DeviceCandidate::identified(
                            port.clone(),
                            role,
                            confidence,
                            DetectionMethod::Probe,
                        )
                        .with_response(reply);
                    }
                    Ok(reply) => {
                        debug!(port = %port.path, response = %reply, "reply is not an XL2");
                        stray_reply = Some(reply);
                    }
                    Err(e) => {
                        debug!(port = %port.path, error = %e, "XL2 probe failed");
                        let unusable = e.is_port_failure();
                        last_error = Some(e);
                        // The GPS test would fail to open the port just the same
                        if unusable {
                            break;
                        }
                    }
                },
                DeviceRole::Gps => match self.prober.listen_gps(port).await {
                    Ok(hit) => {
                        let confidence = self.weights.probe_score(guess.score_for(role));
                        info!(port = %port.path, baud_rate = hit.baud_rate, confidence, "GPS identified");
                        return DeviceCandidate::identified(
                            port.clone(),
                            role,
                            confidence,
                            DetectionMethod::Probe,
                        )
                        .with_response(hit.sentence)
                        .with_baud_rate(hit.baud_rate);
                    }
                    Err(e) => {
                        debug!(port = %port.path, error = %e, "GPS probe failed");
                        let unusable = e.is_port_failure();
                        last_error = Some(e);
                        if unusable {
                            break;
                        }
                    }
                },
                DeviceRole::Unknown => {}
            }
        }

        let error = last_error.map(|e| e.to_string());
        if let Some(message) = &error {
            warn!(port = %port.path, error = %message, "port not identified");
        }
        let candidate = DeviceCandidate::unknown(port.clone(), error);
        match stray_reply {
            Some(reply) => candidate.with_response(reply),
            None => candidate,
        }
    }

    /// Highest-confidence candidate for `role` from the last scan.
    pub async fn best_candidate(&self, role: DeviceRole) -> Option<DeviceCandidate> {
        self.last_report
            .read()
            .await
            .as_ref()
            .and_then(|report| report.best(role).cloned())
    }

    /// Every candidate from the last scan, grouped by role.
    pub async fn all_candidates(&self) -> Vec<DeviceCandidate> {
        self.last_report
            .read()
            .await
            .as_ref()
            .map(ClassificationReport::all)
            .unwrap_or_default()
    }

    /// Summary of the last scan.
    pub async fn scan_summary(&self) -> Option<ScanSummary> {
        self.last_report
            .read()
            .await
            .as_ref()
            .map(|report| report.summary.clone())
    }

    /// Full report of the last scan.
    pub async fn last_report(&self) -> Option<ClassificationReport> {
        self.last_report.read().await.clone()
    }

    /// Forgets cached classifications so the next scan probes again.
    pub async fn invalidate_cache(&self) {
        self.cache.clear().await;
    }
}
