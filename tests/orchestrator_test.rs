//! Startup sequencing end to end on simulated hardware.

mod common;

use async_trait::async_trait;
use common::{count, drain, mock_rig, mock_rig_with, nti_port, prolific_port, test_settings};
use std::sync::Arc;
use std::time::Duration;
use xl2_daq::error::{RigError, RigResult};
use xl2_daq::events::RigEvent;
use xl2_daq::hardware::{
    MockConnector, MockDevice, MockGps, MockXl2, PortDescriptor, PortEnumerator,
};
use xl2_daq::orchestrator::{PhaseStatus, StartupPhase};
use xl2_daq::protocol::SessionState;
use xl2_daq::Rig;

#[tokio::test(start_paused = true)]
async fn test_startup_connects_both_roles() {
    let (rig, _) = mock_rig(
        test_settings(),
        vec![
            (nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default())),
            (prolific_port("/dev/ttyUSB0"), MockDevice::Gps(MockGps::default())),
        ],
    )
    .await;
    let mut events = rig.events.subscribe();

    let result = rig.orchestrator.run_startup().await;

    assert!(result.connections.xl2.success);
    assert_eq!(result.connections.xl2.port.as_deref(), Some("/dev/ttyACM0"));
    assert!(result.connections.gps.success);
    assert_eq!(result.connections.gps.port.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(result.summary.devices_found, 2);
    assert_eq!(result.summary.devices_connected, 2);
    assert!(result.summary.errors.is_empty());
    assert_eq!(rig.xl2.state().await, SessionState::Measuring);
    assert_eq!(rig.orchestrator.last_result().await, Some(result));

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "startup_phase"), 6);
    assert_eq!(count(&seen, "startup_complete"), 1);
    assert_eq!(count(&seen, "scan_completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_best_candidate_falls_back() {
    let mut settings = test_settings();
    settings.discovery.weights.response_match = 25;
    // B only matches the XL2 vendor id: probed, then 25 + 35
    let fallback = PortDescriptor::new("/dev/ttyACM1").with_usb_ids(0x1a2b, 0x7777);
    let (rig, connector) = mock_rig(
        settings,
        vec![
            (nti_port("/dev/ttyACM0"), MockDevice::Unavailable),
            (fallback, MockDevice::Xl2(MockXl2::default())),
        ],
    )
    .await;

    let result = rig.orchestrator.run_startup().await;

    let ranked: Vec<(String, u8)> = rig
        .orchestrator
        .all_candidates()
        .await
        .into_iter()
        .map(|c| (c.path().to_string(), c.confidence))
        .collect();
    assert_eq!(
        ranked,
        vec![("/dev/ttyACM0".to_string(), 90), ("/dev/ttyACM1".to_string(), 60)]
    );

    let xl2 = &result.connections.xl2;
    assert!(xl2.success);
    assert_eq!(xl2.port.as_deref(), Some("/dev/ttyACM1"));
    assert_eq!(xl2.attempts, 2);
    assert_eq!(result.summary.errors.len(), 1);
    assert!(result.summary.errors[0].contains("/dev/ttyACM0"));
    assert!(!result.connections.gps.success);
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_ports_still_completes() {
    let (rig, _) = mock_rig(test_settings(), Vec::new()).await;
    let mut events = rig.events.subscribe();

    let result = rig.orchestrator.run_startup().await;

    assert!(!result.connections.xl2.success);
    assert!(!result.connections.gps.success);
    assert_eq!(result.summary.devices_found, 0);
    assert!(result.summary.errors.is_empty());
    assert!(result
        .connections
        .xl2
        .error
        .as_deref()
        .is_some_and(|e| e.contains("no xl2 device")));

    let seen = drain(&mut events);
    let statuses: Vec<bool> = seen
        .iter()
        .filter_map(|e| match e {
            RigEvent::ConnectionStatus { connected, .. } => Some(*connected),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![false, false]);
}

struct BrokenEnumerator;

#[async_trait]
impl PortEnumerator for BrokenEnumerator {
    async fn list_ports(&self) -> RigResult<Vec<PortDescriptor>> {
        Err(RigError::port_io(
            "*",
            std::io::Error::other("udev unavailable"),
        ))
    }
}

#[tokio::test]
async fn test_enumeration_failure_is_reported_not_raised() {
    let rig = Rig::with_hardware(
        test_settings(),
        Arc::new(BrokenEnumerator),
        Arc::new(MockConnector::new()),
    );
    let mut events = rig.events.subscribe();

    let result = rig.orchestrator.run_startup().await;

    assert_eq!(result.summary.errors.len(), 1);
    assert!(result.summary.errors[0].contains("udev unavailable"));
    assert_eq!(result.summary.devices_connected, 0);

    let failed_discover = drain(&mut events).iter().any(|e| {
        matches!(
            e,
            RigEvent::StartupPhase {
                phase: StartupPhase::Discover,
                status: PhaseStatus::Failed,
                ..
            }
        )
    });
    assert!(failed_discover);

    let err = rig.orchestrator.rescan().await.unwrap_err();
    assert_eq!(err.code(), "ORCHESTRATION");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_device_returns() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;
    assert!(rig.orchestrator.run_startup().await.connections.xl2.success);

    connector.unplug("/dev/ttyACM0").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.xl2.current_port().await, None);
    assert!(rig.xl2.history().await.is_empty());

    connector
        .attach("/dev/ttyACM0", MockDevice::Xl2(MockXl2::default()))
        .await;
    let result = rig.orchestrator.reconnect().await;

    assert!(result.connections.xl2.success);
    assert_eq!(rig.xl2.state().await, SessionState::Measuring);
    // Fast-path discovery never opened it; one open per connect
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rescan_keeps_exclusive_port_in_use() {
    // Vendor + product only: 50, below the fast path, so the first scan opens it
    let port = PortDescriptor::new("/dev/ttyACM0").with_usb_ids(0x1a2b, 0x0004);
    let (rig, connector) = mock_rig_with(
        test_settings(),
        MockConnector::exclusive(),
        vec![(port, MockDevice::Xl2(MockXl2::default()))],
    )
    .await;

    let startup = rig.orchestrator.run_startup().await;
    assert!(startup.connections.xl2.success);
    let opens = connector.open_count("/dev/ttyACM0").await;

    // Past the cache TTL, so nothing is served from the cache
    tokio::time::sleep(Duration::from_secs(31)).await;
    let report = rig.orchestrator.rescan().await.unwrap();

    assert_eq!(report.summary.held, 1);
    assert!(report.unknown.is_empty());
    let xl2: Vec<&str> = report.xl2.iter().map(|c| c.path()).collect();
    assert_eq!(xl2, vec!["/dev/ttyACM0"]);
    assert_eq!(connector.open_count("/dev/ttyACM0").await, opens);

    let again = rig.orchestrator.reconnect().await;
    assert!(again.connections.xl2.success);
    assert_eq!(again.connections.xl2.port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(rig.xl2.state().await, SessionState::Measuring);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects_everything() {
    let (rig, _) = mock_rig(
        test_settings(),
        vec![
            (nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default())),
            (prolific_port("/dev/ttyUSB0"), MockDevice::Gps(MockGps::default())),
        ],
    )
    .await;
    rig.orchestrator.run_startup().await;

    rig.orchestrator.shutdown().await;

    assert_eq!(rig.xl2.current_port().await, None);
    assert_eq!(rig.gps.current_port().await, None);
    assert!(!rig.xl2.is_continuous().await);
}
