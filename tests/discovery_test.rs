//! Port classification against simulated hardware.

mod common;

use common::{ftdi_port, mock_rig, nti_port, prolific_port, test_settings};
use std::time::Duration;
use xl2_daq::discovery::{DetectionMethod, DeviceRole};
use xl2_daq::hardware::{MockDevice, MockGps, MockXl2, PortDescriptor};

#[tokio::test(start_paused = true)]
async fn test_mixed_scan_identifies_each_port() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![
            (nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default())),
            (prolific_port("/dev/ttyUSB0"), MockDevice::Gps(MockGps::default())),
            (ftdi_port("/dev/ttyUSB1"), MockDevice::Silent),
            (ftdi_port("/dev/ttyUSB2"), MockDevice::Unavailable),
            (PortDescriptor::new("/dev/ttyS0"), MockDevice::Silent),
        ],
    )
    .await;

    let report = rig.orchestrator.rescan().await.unwrap();

    assert_eq!(report.summary.total_ports, 5);
    assert_eq!(report.summary.candidate_ports, 4);
    assert_eq!(report.summary.fast_path, 1);
    assert_eq!(report.summary.probed, 3);

    let xl2 = report.best(DeviceRole::Xl2).unwrap();
    assert_eq!(xl2.path(), "/dev/ttyACM0");
    assert_eq!(xl2.method, DetectionMethod::Hardware);
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 0);

    let gps = report.best(DeviceRole::Gps).unwrap();
    assert_eq!(gps.path(), "/dev/ttyUSB0");
    assert_eq!(gps.baud_rate, Some(9600));
    assert!(gps.response.as_deref().is_some_and(|r| r.starts_with("$GP")));

    assert_eq!(report.unknown.len(), 2);
    assert!(report.unknown.iter().all(|c| c.error.is_some()));
    assert_eq!(connector.open_count("/dev/ttyS0").await, 0);

    for candidate in report.all() {
        assert!(candidate.confidence <= 100, "{candidate:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_hardware_guess_of_75_skips_probing() {
    let port = PortDescriptor::new("/dev/ttyACM3")
        .with_usb_ids(0x1a2b, 0x7777)
        .with_manufacturer("NTi Audio AG");
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(port, MockDevice::Xl2(MockXl2::default()))],
    )
    .await;

    rig.orchestrator.rescan().await.unwrap();

    let best = rig.orchestrator.best_candidate(DeviceRole::Xl2).await.unwrap();
    assert_eq!(best.confidence, 75);
    assert_eq!(best.method, DetectionMethod::Hardware);
    assert_eq!(connector.open_count("/dev/ttyACM3").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cached_result_is_not_probed_again_until_expiry() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(
            PortDescriptor::new("/dev/ttyACM0"),
            MockDevice::Xl2(MockXl2::default()),
        )],
    )
    .await;

    let first = rig.orchestrator.rescan().await.unwrap();
    assert_eq!(first.summary.probed, 1);
    assert_eq!(first.best(DeviceRole::Xl2).unwrap().confidence, 70);
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 1);

    tokio::time::advance(Duration::from_secs(10)).await;
    let second = rig.orchestrator.rescan().await.unwrap();
    assert_eq!(second.summary.cached, 1);
    assert_eq!(second.summary.probed, 0);
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    let third = rig.orchestrator.rescan().await.unwrap();
    assert_eq!(third.summary.probed, 1);
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_probe_time_is_bounded_by_slowest_port() {
    let (rig, _) = mock_rig(
        test_settings(),
        vec![
            (ftdi_port("/dev/ttyUSB1"), MockDevice::Silent),
            (ftdi_port("/dev/ttyUSB2"), MockDevice::Silent),
            (ftdi_port("/dev/ttyUSB3"), MockDevice::Silent),
        ],
    )
    .await;
    let discovery = &rig.settings.discovery;
    let one_port = discovery.gps_listen() * (1 + discovery.gps_fallback_bauds.len() as u32)
        + discovery.identify_timeout();

    let started = tokio::time::Instant::now();
    let report = rig.orchestrator.rescan().await.unwrap();

    assert_eq!(report.unknown.len(), 3);
    assert!(started.elapsed() < one_port * 2, "{:?}", started.elapsed());
}
