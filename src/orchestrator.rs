//! Startup sequencing: discover, connect, finalize.
//!
//! The orchestrator owns no devices. It asks the [`DeviceClassifier`] which ports host
//! which role, then hands the ranked candidates to each role's [`RoleLink`] until one
//! connects. Nothing in here fails the process: a role that cannot be connected is
//! reported as `success: false` and the rig keeps running.
//!
//! Each phase is announced on the [`EventSink`] as `started` and then `completed` or
//! `failed`.

use crate::discovery::{
    ClassificationReport, DeviceCandidate, DeviceClassifier, DeviceRole, ScanSummary,
};
use crate::error::{RigError, RigResult};
use crate::events::{EventSink, RigEvent};
use crate::hardware::PortEnumerator;
use crate::protocol::{GpsSession, Xl2Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// A session the orchestrator can bind to a classified port.
#[async_trait]
pub trait RoleLink: Send + Sync {
    /// Role this link serves.
    fn role(&self) -> DeviceRole;

    /// Connects to the candidate's port and returns it.
    async fn connect_candidate(&self, candidate: &DeviceCandidate) -> RigResult<String>;

    /// Port the session holds, if any.
    async fn current_port(&self) -> Option<String>;

    /// Closes the session. Safe to call when already closed.
    async fn disconnect(&self);
}

#[async_trait]
impl RoleLink for Xl2Session {
    fn role(&self) -> DeviceRole {
        DeviceRole::Xl2
    }

    async fn connect_candidate(&self, candidate: &DeviceCandidate) -> RigResult<String> {
        self.connect(Some(candidate.path())).await
    }

    async fn current_port(&self) -> Option<String> {
        Xl2Session::current_port(self).await
    }

    async fn disconnect(&self) {
        Xl2Session::disconnect(self).await
    }
}

#[async_trait]
impl RoleLink for GpsSession {
    fn role(&self) -> DeviceRole {
        DeviceRole::Gps
    }

    async fn connect_candidate(&self, candidate: &DeviceCandidate) -> RigResult<String> {
        self.connect(candidate.path(), candidate.baud_rate).await
    }

    async fn current_port(&self) -> Option<String> {
        GpsSession::current_port(self).await
    }

    async fn disconnect(&self) {
        GpsSession::disconnect(self).await
    }
}

/// Step of the startup sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPhase {
    /// Enumerate and classify ports
    Discover,
    /// Bind each role to its best candidate
    Connect,
    /// Summarize and publish the result
    Finalize,
}

impl StartupPhase {
    fn as_str(self) -> &'static str {
        match self {
            StartupPhase::Discover => "discover",
            StartupPhase::Connect => "connect",
            StartupPhase::Finalize => "finalize",
        }
    }
}

/// Progress of one startup phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Phase began
    Started,
    /// Phase finished
    Completed,
    /// Phase gave up, see the event detail
    Failed,
}

/// Connection outcome for one role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoleOutcome {
    /// Whether the role ended up connected
    pub success: bool,
    /// Port the role is bound to
    pub port: Option<String>,
    /// Last failure, or why nothing was tried
    pub error: Option<String>,
    /// Candidates tried
    pub attempts: usize,
}

/// Per-role outcomes of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoleConnections {
    /// Analyzer outcome
    pub xl2: RoleOutcome,
    /// GPS outcome
    pub gps: RoleOutcome,
}

/// Totals of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StartupSummary {
    /// Identified XL2 and GPS candidates
    pub devices_found: usize,
    /// Roles that ended up connected
    pub devices_connected: usize,
    /// Discovery failures and failed connect attempts, in order
    pub errors: Vec<String>,
}

/// Outcome of one orchestration run. Built once, never changed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StartupResult {
    /// Per-role outcomes
    pub connections: RoleConnections,
    /// Totals
    pub summary: StartupSummary,
    /// Wall time of the run
    pub duration_ms: u64,
    /// When the run finished
    pub completed_at: DateTime<Utc>,
}

/// Sequences discovery and connection for both roles.
pub struct ConnectionOrchestrator {
    enumerator: Arc<dyn PortEnumerator>,
    classifier: Arc<DeviceClassifier>,
    xl2: Arc<dyn RoleLink>,
    gps: Arc<dyn RoleLink>,
    sink: Arc<dyn EventSink>,
    /// One run (startup, rescan or reconnect) at a time
    run_lock: Mutex<()>,
    last_result: RwLock<Option<StartupResult>>,
}

impl ConnectionOrchestrator {
    /// Orchestrator over the given enumerator, classifier and role sessions.
    pub fn new(
        enumerator: Arc<dyn PortEnumerator>,
        classifier: Arc<DeviceClassifier>,
        xl2: Arc<dyn RoleLink>,
        gps: Arc<dyn RoleLink>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            enumerator,
            classifier,
            xl2,
            gps,
            sink,
            run_lock: Mutex::new(()),
            last_result: RwLock::new(None),
        }
    }

    fn phase(&self, phase: StartupPhase, status: PhaseStatus, detail: Option<String>) {
        self.sink.emit(RigEvent::StartupPhase {
            phase,
            status,
            detail,
        });
    }

    /// Discovers devices and connects both roles. Never fails.
    pub async fn run_startup(&self) -> StartupResult {
        let _running = self.run_lock.lock().await;
        let started = Instant::now();
        info!("startup sequence begins");

        let mut errors = Vec::new();
        let report = match self.discover().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "discovery failed");
                errors.push(e.to_string());
                None
            }
        };

        let connections = self.connect_roles(report.as_ref(), &mut errors).await;
        self.finalize(report.as_ref(), connections, errors, started)
            .await
    }

    /// Runs discovery again; live connections are left alone.
    pub async fn rescan(&self) -> RigResult<ClassificationReport> {
        let _running = self.run_lock.lock().await;
        self.discover().await
    }

    /// Connects both roles again from the last scan, without probing.
    pub async fn reconnect(&self) -> StartupResult {
        let _running = self.run_lock.lock().await;
        let started = Instant::now();
        let report = self.classifier.last_report().await;
        if report.is_none() {
            warn!("reconnect requested before any scan");
        }

        let mut errors = Vec::new();
        let connections = self.connect_roles(report.as_ref(), &mut errors).await;
        self.finalize(report.as_ref(), connections, errors, started)
            .await
    }

    async fn discover(&self) -> RigResult<ClassificationReport> {
        self.phase(StartupPhase::Discover, PhaseStatus::Started, None);

        let ports = match self.enumerator.list_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                let failure = RigError::Orchestration {
                    phase: StartupPhase::Discover.as_str().to_string(),
                    message: e.to_string(),
                };
                self.phase(
                    StartupPhase::Discover,
                    PhaseStatus::Failed,
                    Some(failure.to_string()),
                );
                return Err(failure);
            }
        };

        let mut held = Vec::new();
        for link in [&self.xl2, &self.gps] {
            if let Some(port) = link.current_port().await {
                held.push((port, link.role()));
            }
        }

        self.sink.emit(RigEvent::ScanStarted {
            port_count: ports.len(),
        });
        let report = self.classifier.classify_with_held(&ports, &held).await;
        self.sink.emit(RigEvent::ScanCompleted {
            summary: report.summary.clone(),
        });

        self.phase(
            StartupPhase::Discover,
            PhaseStatus::Completed,
            Some(format!(
                "{} port(s), {} XL2, {} GPS",
                ports.len(),
                report.xl2.len(),
                report.gps.len()
            )),
        );
        Ok(report)
    }

    async fn connect_roles(
        &self,
        report: Option<&ClassificationReport>,
        errors: &mut Vec<String>,
    ) -> RoleConnections {
        self.phase(StartupPhase::Connect, PhaseStatus::Started, None);

        let candidates = |role| report.map(|r| r.candidates(role)).unwrap_or(&[]);
        let xl2 = self
            .connect_role(self.xl2.as_ref(), candidates(DeviceRole::Xl2), errors)
            .await;
        let gps = self
            .connect_role(self.gps.as_ref(), candidates(DeviceRole::Gps), errors)
            .await;

        let connected = usize::from(xl2.success) + usize::from(gps.success);
        self.phase(
            StartupPhase::Connect,
            PhaseStatus::Completed,
            Some(format!("{connected} of 2 role(s) connected")),
        );
        RoleConnections { xl2, gps }
    }

    /// Tries `candidates` best first until one connects.
    ///
    /// A live link is kept as it is when the scan found nothing for its role or still
    /// lists its port.
    async fn connect_role(
        &self,
        link: &dyn RoleLink,
        candidates: &[DeviceCandidate],
        errors: &mut Vec<String>,
    ) -> RoleOutcome {
        let role = link.role();
        let mut outcome = RoleOutcome::default();

        let current = link.current_port().await;
        if let Some(port) = &current {
            if candidates.is_empty() || candidates.iter().any(|c| c.path() == port) {
                info!(%role, port = %port, "keeping live connection");
                outcome.success = true;
                outcome.port = current.clone();
                self.sink.emit(RigEvent::ConnectionStatus {
                    role,
                    connected: true,
                    port: current,
                });
                return outcome;
            }
        }

        if candidates.is_empty() {
            info!(%role, "no candidates found");
            outcome.error = Some(format!("no {role} device found"));
            self.sink.emit(RigEvent::ConnectionStatus {
                role,
                connected: false,
                port: None,
            });
            return outcome;
        }

        for candidate in candidates {
            outcome.attempts += 1;
            match link.connect_candidate(candidate).await {
                Ok(port) => {
                    info!(%role, port = %port, confidence = candidate.confidence, "role connected");
                    outcome.success = true;
                    outcome.port = Some(port);
                    outcome.error = None;
                    return outcome;
                }
                Err(e) => {
                    let message = format!("{role} connect to {} failed: {e}", candidate.path());
                    warn!(%role, port = %candidate.path(), error = %e, "connect failed, trying next candidate");
                    errors.push(message.clone());
                    outcome.error = Some(message);
                }
            }
        }
        outcome
    }

    async fn finalize(
        &self,
        report: Option<&ClassificationReport>,
        connections: RoleConnections,
        errors: Vec<String>,
        started: Instant,
    ) -> StartupResult {
        self.phase(StartupPhase::Finalize, PhaseStatus::Started, None);

        let devices_found = report.map(|r| r.xl2.len() + r.gps.len()).unwrap_or(0);
        let devices_connected =
            usize::from(connections.xl2.success) + usize::from(connections.gps.success);

        let result = StartupResult {
            connections,
            summary: StartupSummary {
                devices_found,
                devices_connected,
                errors,
            },
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        info!(
            devices_found,
            devices_connected,
            errors = result.summary.errors.len(),
            duration_ms = result.duration_ms,
            "startup sequence finished"
        );
        self.phase(
            StartupPhase::Finalize,
            PhaseStatus::Completed,
            Some(format!("{devices_connected} connected")),
        );
        self.sink.emit(RigEvent::StartupComplete {
            result: result.clone(),
        });
        *self.last_result.write().await = Some(result.clone());
        result
    }

    /// Highest-confidence candidate from the last scan.
    pub async fn best_candidate(&self, role: DeviceRole) -> Option<DeviceCandidate> {
        self.classifier.best_candidate(role).await
    }

    /// Every candidate from the last scan, best first.
    pub async fn all_candidates(&self) -> Vec<DeviceCandidate> {
        self.classifier.all_candidates().await
    }

    /// Summary of the last scan.
    pub async fn scan_summary(&self) -> Option<ScanSummary> {
        self.classifier.scan_summary().await
    }

    /// Result of the last startup or reconnect.
    pub async fn last_result(&self) -> Option<StartupResult> {
        self.last_result.read().await.clone()
    }

    /// Disconnects both roles.
    pub async fn shutdown(&self) {
        let _running = self.run_lock.lock().await;
        self.xl2.disconnect().await;
        self.gps.disconnect().await;
        info!("all devices disconnected");
    }
}
