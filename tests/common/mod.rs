//! Shared fixtures for the integration tests: simulated ports and a rig wired to them.
#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::broadcast;
use xl2_daq::config::Settings;
use xl2_daq::discovery::PlatformKind;
use xl2_daq::events::RigEvent;
use xl2_daq::hardware::{FixedPortEnumerator, MockConnector, MockDevice, PortDescriptor};
use xl2_daq::Rig;

/// Defaults pinned to the Linux profile so port paths behave the same on every host.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.discovery.platform = PlatformKind::Linux;
    settings
}

/// An XL2 with full USB metadata: manufacturer + vendor + product = 90.
pub fn nti_port(path: &str) -> PortDescriptor {
    PortDescriptor::new(path)
        .with_usb_ids(0x1a2b, 0x0004)
        .with_manufacturer("NTi Audio AG")
}

/// A GPS behind a Prolific bridge: vendor + product = 50, below the fast path.
pub fn prolific_port(path: &str) -> PortDescriptor {
    PortDescriptor::new(path).with_usb_ids(0x067b, 0x2303)
}

/// A bridge chip on the GPS vendor list with an unlisted product: 35.
pub fn ftdi_port(path: &str) -> PortDescriptor {
    PortDescriptor::new(path).with_usb_ids(0x0403, 0x6001)
}

/// Builds a rig whose ports and devices are all simulated.
pub async fn mock_rig(
    settings: Settings,
    devices: Vec<(PortDescriptor, MockDevice)>,
) -> (Rig, MockConnector) {
    mock_rig_with(settings, MockConnector::new(), devices).await
}

/// Same as [`mock_rig`], on a connector the caller has configured.
pub async fn mock_rig_with(
    settings: Settings,
    connector: MockConnector,
    devices: Vec<(PortDescriptor, MockDevice)>,
) -> (Rig, MockConnector) {
    let mut ports = Vec::new();
    for (port, device) in devices {
        connector.attach(&port.path, device).await;
        ports.push(port);
    }
    let rig = Rig::with_hardware(
        settings,
        Arc::new(FixedPortEnumerator::new(ports)),
        Arc::new(connector.clone()),
    );
    (rig, connector)
}

/// Everything currently queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<RigEvent>) -> Vec<RigEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count(events: &[RigEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}
