//! Composition root.
//!
//! Every component is built exactly once here and handed to the components that need
//! it. Nothing in the crate reaches for global state.

use crate::config::Settings;
use crate::discovery::{DeviceClassifier, PlatformProfile, SerialProber};
use crate::events::{BroadcastSink, EventSink};
use crate::hardware::{PortEnumerator, SerialConnector, SystemPortEnumerator, TokioSerialConnector};
use crate::orchestrator::ConnectionOrchestrator;
use crate::protocol::{GpsSession, Xl2Session};
use std::sync::Arc;
use tracing::info;

/// All long-lived components of one rig.
pub struct Rig {
    /// Settings the rig was built from
    pub settings: Settings,
    /// Event fan-out shared by every component
    pub events: Arc<BroadcastSink>,
    /// Port classifier with its result cache
    pub classifier: Arc<DeviceClassifier>,
    /// Analyzer session
    pub xl2: Arc<Xl2Session>,
    /// GPS session
    pub gps: Arc<GpsSession>,
    /// Startup sequencing over both sessions
    pub orchestrator: Arc<ConnectionOrchestrator>,
}

impl Rig {
    /// Builds a rig on the host's real serial ports.
    pub fn new(settings: Settings) -> Self {
        Self::with_hardware(
            settings,
            Arc::new(SystemPortEnumerator),
            Arc::new(TokioSerialConnector),
        )
    }

    /// Builds a rig on the given port source and connector.
    pub fn with_hardware(
        settings: Settings,
        enumerator: Arc<dyn PortEnumerator>,
        connector: Arc<dyn SerialConnector>,
    ) -> Self {
        let discovery = &settings.discovery;
        let mut profile = PlatformProfile::select(discovery.platform);
        if let Some(permissive) = discovery.permissive {
            profile = profile.with_permissive(permissive);
        }
        info!(platform = ?profile.kind, permissive = profile.permissive, "platform profile selected");

        let events = Arc::new(BroadcastSink::new(settings.application.event_capacity));
        let sink: Arc<dyn EventSink> = events.clone();

        let prober = Arc::new(SerialProber::new(connector.clone(), discovery.clone()));
        let classifier = Arc::new(DeviceClassifier::new(
            profile,
            discovery.weights,
            prober,
            discovery.cache_ttl(),
        ));

        let xl2 = Arc::new(Xl2Session::new(
            connector.clone(),
            sink.clone(),
            settings.xl2.clone(),
        ));
        let gps = Arc::new(GpsSession::new(
            connector,
            sink.clone(),
            discovery.gps_primary_bauds.first().copied().unwrap_or(9600),
            discovery.open_timeout(),
        ));

        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            enumerator,
            classifier.clone(),
            xl2.clone(),
            gps.clone(),
            sink,
        ));

        Self {
            settings,
            events,
            classifier,
            xl2,
            gps,
            orchestrator,
        }
    }
}
