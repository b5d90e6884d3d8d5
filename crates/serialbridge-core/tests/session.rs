//! Session lifecycle and receive pipeline against an in-memory device

mod common;

use common::{drain_rx_text, fast_config, next_matching, wait_for, MockBackend};
use pretty_assertions::assert_eq;
use serialbridge_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn session_with(
    backend: Arc<MockBackend>,
    config: BridgeConfig,
) -> (Arc<Session>, Arc<Broadcaster>) {
    let broadcaster = Arc::new(Broadcaster::new());
    let session = Arc::new(Session::new(backend, broadcaster.clone(), config));
    (session, broadcaster)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_starts_disconnected() {
    let backend = Arc::new(MockBackend::default());
    let (session, _) = session_with(backend, fast_config());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.has_channel());
    assert!(matches!(session.send(b"x".to_vec()), Err(SessionError::NotConnected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_real_opens_channel_with_settings() {
    let backend = Arc::new(MockBackend::default());
    let (session, _) = session_with(backend.clone(), fast_config());

    let settings = LineSettings {
        baud_rate: 9600,
        ..LineSettings::default()
    };
    let msg = session.connect("/dev/ttyUSB0", settings).await.unwrap();
    assert!(msg.contains("/dev/ttyUSB0"));
    assert_eq!(session.state(), SessionState::ConnectedReal);
    assert!(session.has_channel());

    let opened = backend.device.0.lock().unwrap().opened.clone();
    assert_eq!(opened, vec![("/dev/ttyUSB0".to_string(), settings)]);

    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_open_stays_disconnected() {
    let backend = Arc::new(MockBackend::default());
    backend.fail_open("resource busy");
    let (session, _) = session_with(backend, fast_config());

    let err = session
        .connect("/dev/ttyUSB0", LineSettings::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("resource busy"));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.has_channel());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_received_bytes_reach_observers() {
    let backend = Arc::new(MockBackend::default());
    let (session, broadcaster) = session_with(backend.clone(), fast_config());
    let (_id, mut events) = broadcaster.subscribe();

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    backend.device.inject(b"hello world");

    let event = next_matching(&mut events, WAIT, |e| matches!(e, Event::Rx { .. })).await;
    let mut text = match event {
        Some(Event::Rx { data }) => data,
        other => panic!("expected rx event, got {other:?}"),
    };
    // The bytes may straddle two flushes
    if text.len() < 11 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        text.push_str(&drain_rx_text(&mut events));
    }
    assert_eq!(text, "hello world");

    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hex_display_mode() {
    let backend = Arc::new(MockBackend::default());
    let (session, broadcaster) = session_with(backend.clone(), fast_config());
    let (_id, mut events) = broadcaster.subscribe();
    session.set_hex_display(true);

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    backend.device.inject(&[0x41]);

    let event = next_matching(&mut events, WAIT, |e| matches!(e, Event::Rx { .. })).await;
    assert_eq!(event, Some(Event::Rx { data: "41".into() }));

    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_forces_final_flush() {
    let backend = Arc::new(MockBackend::default());
    let config = BridgeConfig {
        flush_interval_ms: 1000,
        ..fast_config()
    };
    let (session, broadcaster) = session_with(backend.clone(), config);
    let (_id, mut events) = broadcaster.subscribe();

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    backend.device.inject(b"tail");
    assert!(wait_for(WAIT, || session.buffered_rx() == b"tail").await);

    session.disconnect().await;
    assert_eq!(drain_rx_text(&mut events), "tail");
    assert!(session.buffered_rx().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_buffer_keeps_newest_bytes_at_capacity() {
    let backend = Arc::new(MockBackend::default());
    let config = BridgeConfig {
        rx_buffer_capacity: 16,
        flush_interval_ms: 1000,
        ..fast_config()
    };
    let (session, _broadcaster) = session_with(backend.clone(), config);

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    let data: Vec<u8> = (0..40u8).collect();
    backend.device.inject(&data);
    assert!(wait_for(WAIT, || backend.device.pending_len() == 0).await);
    assert!(wait_for(WAIT, || session.buffered_rx().len() == 16).await);

    assert_eq!(session.buffered_rx(), data[24..].to_vec());
    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_stops_buffer_growth() {
    let backend = Arc::new(MockBackend::default());
    let config = BridgeConfig {
        flush_interval_ms: 1000,
        ..fast_config()
    };
    let (session, _broadcaster) = session_with(backend.clone(), config);

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    session.set_paused(true);
    // Let the loop observe the flag before data shows up
    tokio::time::sleep(Duration::from_millis(30)).await;

    backend.device.inject(b"held");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.buffered_rx().is_empty());
    assert_eq!(backend.device.pending_len(), 4);

    session.set_paused(false);
    assert!(wait_for(WAIT, || session.buffered_rx() == b"held").await);
    assert_eq!(backend.device.pending_len(), 0);

    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_resets_pause() {
    let backend = Arc::new(MockBackend::default());
    let (session, _) = session_with(backend, fast_config());
    session.set_paused(true);
    session.connect(SIMULATOR_PORT, LineSettings::default()).await.unwrap();
    assert!(!session.is_paused());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_mid_poll_then_reconnect() {
    let backend = Arc::new(MockBackend::default());
    let (session, _) = session_with(backend.clone(), fast_config());

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.has_channel());
    assert!(!backend.device.is_open());

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::ConnectedReal);
    assert!(session.has_channel());
    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_is_never_additive() {
    let backend = Arc::new(MockBackend::default());
    let (session, _) = session_with(backend.clone(), fast_config());

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    session.connect(SIMULATOR_PORT, LineSettings::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::ConnectedSimulated);
    assert!(!session.has_channel());
    assert!(!backend.device.is_open());

    session.connect("/dev/ttyACM1", LineSettings::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::ConnectedReal);
    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_error_ends_session() {
    let backend = Arc::new(MockBackend::default());
    let (session, broadcaster) = session_with(backend.clone(), fast_config());
    let (_id, mut events) = broadcaster.subscribe();

    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    backend.device.set_fail_read(true);

    let event = next_matching(&mut events, WAIT, |e| matches!(e, Event::Status { .. })).await;
    match event {
        Some(Event::Status {
            success, connected, ..
        }) => {
            assert!(!success);
            assert!(!connected);
        }
        other => panic!("expected status event, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.has_channel());

    // A fresh connect works after the failure
    backend.device.set_fail_read(false);
    session.connect("/dev/ttyACM0", LineSettings::default()).await.unwrap();
    assert_eq!(session.state(), SessionState::ConnectedReal);
    session.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulated_send_echoes_hex() {
    let backend = Arc::new(MockBackend::default());
    let (session, broadcaster) = session_with(backend.clone(), fast_config());
    let (_id, mut events) = broadcaster.subscribe();

    session.connect(SIMULATOR_PORT, LineSettings::default()).await.unwrap();
    let report = session.send(vec![0xde, 0xad]).unwrap().wait().await;
    assert_eq!(report.outcome, TransmitOutcome::Completed);

    assert_eq!(
        events.try_recv().unwrap(),
        Event::Rx {
            data: "[SIM] Echo: de ad".into()
        }
    );
    assert!(backend.device.written().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runtime_settings_are_clamped() {
    let backend = Arc::new(MockBackend::default());
    let (session, _) = session_with(backend, fast_config());

    assert_eq!(session.set_flush_interval(1), 10);
    assert_eq!(session.set_flush_interval(5000), 1000);
    assert_eq!(session.flush_interval_ms(), 1000);
    assert_eq!(session.set_tx_delay(250), 100);
    assert_eq!(session.set_tx_delay(3), 3);
    assert_eq!(session.tx_delay_ms(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ports_are_prefixed_with_simulator() {
    let backend = Arc::new(MockBackend::with_ports(&["/dev/ttyACM0"]));
    let (session, _) = session_with(backend, fast_config());
    assert_eq!(
        session.ports().await.unwrap(),
        vec!["SIMULATOR".to_string(), "/dev/ttyACM0".to_string()]
    );
}
