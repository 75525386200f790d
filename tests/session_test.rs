//! XL2 and GPS sessions driven through a full rig.

mod common;

use common::{count, drain, mock_rig, nti_port, prolific_port, test_settings};
use std::time::Duration;
use xl2_daq::events::RigEvent;
use xl2_daq::hardware::{MockDevice, MockGps, MockXl2};
use xl2_daq::protocol::SessionState;

const SPECTRUM_QUERY: &str = "MEAS:FFT? LIVE";

fn spectrum_queries(commands: &[String]) -> usize {
    commands.iter().filter(|c| *c == SPECTRUM_QUERY).count()
}

#[tokio::test(start_paused = true)]
async fn test_connect_without_port_keeps_current_link() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;

    rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();
    let again = rig.xl2.connect(None).await.unwrap();
    let same = rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();

    assert_eq!(again, "/dev/ttyACM0");
    assert_eq!(same, "/dev/ttyACM0");
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_switching_ports_closes_the_old_link() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![
            (nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default())),
            (nti_port("/dev/ttyACM1"), MockDevice::Xl2(MockXl2::default())),
        ],
    )
    .await;
    let mut events = rig.events.subscribe();

    rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();
    rig.xl2.connect(Some("/dev/ttyACM1")).await.unwrap();

    assert_eq!(rig.xl2.current_port().await.as_deref(), Some("/dev/ttyACM1"));
    assert!(connector
        .commands("/dev/ttyACM0")
        .await
        .contains(&"INIT STOP".to_string()));

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "connected"), 2);
    assert_eq!(count(&seen, "disconnected"), 1);
    let disconnected = seen
        .iter()
        .find_map(|e| match e {
            RigEvent::Disconnected { port, .. } => port.clone(),
            _ => None,
        })
        .unwrap();
    assert_eq!(disconnected, "/dev/ttyACM0");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_open_the_port_once() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;

    let (first, second) = tokio::join!(
        rig.xl2.connect(Some("/dev/ttyACM0")),
        rig.xl2.connect(Some("/dev/ttyACM0")),
    );

    assert_eq!(first.unwrap(), "/dev/ttyACM0");
    assert_eq!(second.unwrap(), "/dev/ttyACM0");
    assert_eq!(connector.open_count("/dev/ttyACM0").await, 1);
    assert_eq!(rig.xl2.state().await, SessionState::Measuring);
}

#[tokio::test(start_paused = true)]
async fn test_sampling_loop_is_never_doubled() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;

    rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();
    rig.xl2.start_continuous().await.unwrap();
    rig.xl2.start_continuous().await.unwrap();

    // Ticks at 0, 1.5 s and 3.0 s
    tokio::time::sleep(Duration::from_millis(3200)).await;

    let commands = connector.commands("/dev/ttyACM0").await;
    assert_eq!(spectrum_queries(&commands), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_restart_resumes_sampling() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;
    rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();

    rig.xl2.stop_continuous().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let stopped = spectrum_queries(&connector.commands("/dev/ttyACM0").await);

    rig.xl2.start_continuous().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let resumed = spectrum_queries(&connector.commands("/dev/ttyACM0").await);

    assert_eq!(resumed, stopped + 1);
    assert!(rig.xl2.is_continuous().await);
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded() {
    let mut settings = test_settings();
    settings.xl2.history_size = 5;
    settings.xl2.interval_ms = 100;
    let (rig, _) = mock_rig(
        settings,
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;

    rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let history = rig.xl2.history().await;
    assert_eq!(history.len(), 5);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(rig.xl2.status().await.history_len, 5);
}

#[tokio::test(start_paused = true)]
async fn test_zoom_and_start_frequency_reach_the_device() {
    let (rig, connector) = mock_rig(
        test_settings(),
        vec![(nti_port("/dev/ttyACM0"), MockDevice::Xl2(MockXl2::default()))],
    )
    .await;
    rig.xl2.connect(Some("/dev/ttyACM0")).await.unwrap();

    rig.xl2.set_zoom(8).await.unwrap();
    rig.xl2.set_start_frequency(1000.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let commands = connector.commands("/dev/ttyACM0").await;
    assert!(commands.contains(&"MEAS:FFT:ZOOM 8".to_string()));
    assert!(commands.contains(&"MEAS:FFT:FSTART 1000".to_string()));
    let status = rig.xl2.status().await;
    assert_eq!(status.zoom, 8);
    assert_eq!(status.start_frequency_hz, 1000.0);
}

#[tokio::test(start_paused = true)]
async fn test_gps_session_uses_discovered_baud_rate() {
    let gps = MockGps {
        baud_rate: 4800,
        ..MockGps::default()
    };
    let (rig, _) = mock_rig(
        test_settings(),
        vec![(prolific_port("/dev/ttyUSB0"), MockDevice::Gps(gps))],
    )
    .await;

    let report = rig.orchestrator.rescan().await.unwrap();
    let candidate = report.best(xl2_daq::discovery::DeviceRole::Gps).unwrap();
    assert_eq!(candidate.baud_rate, Some(4800));

    rig.gps
        .connect(candidate.path(), candidate.baud_rate)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = rig.gps.status().await;
    assert_eq!(status.baud_rate, Some(4800));
    assert!(status.sentences >= 1);
    assert!(status.last_sentence.is_some_and(|s| s.starts_with("$GPGGA")));
}
