mod common;

use common::{mock_device, record, transitions, MockTransport};
use serialkit_communication::communication::simulated;
use serialkit_communication::{
    ConnectionParams, DataInterceptor, SendPipelineConfig, Session, SimulatedTransport, Transport,
};
use serialkit_core::{
    BusEvent, ConnectionEvent, ConnectionState, Error, EventBus, QueueError, Scheduler, Topic,
    TransportError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::Duration;

use ConnectionState::*;

fn session() -> Session {
    Session::new(EventBus::new(), SendPipelineConfig::default())
}

fn incoming_text(events: &[BusEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            BusEvent::IncomingData { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_streams_incoming_data() {
    let session = session();
    let connection = record(session.bus(), Topic::Connection);
    let incoming = record(session.bus(), Topic::IncomingData);
    let transport = MockTransport::new();

    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();
    assert!(session.is_open());
    assert_eq!(session.device().unwrap().id, "network_mock:1");
    assert_eq!(
        transitions(&connection.lock()),
        vec![(Disconnected, Connecting), (Connecting, Open)]
    );

    assert!(transport.push_inbound(b"hello "));
    assert!(transport.push_inbound(b"world"));
    settle().await;
    assert_eq!(incoming_text(&incoming.lock()), vec!["hello ", "world"]);
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_is_rejected() {
    let session = session();
    let transport = MockTransport::new();
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    let err = session
        .connect(transport.clone(), mock_device("mock:2"), &ConnectionParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::AlreadyConnected { ref device })
            if device == "network_mock:1"
    ));
    assert_eq!(session.device().unwrap().id, "network_mock:1");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_everything() {
    let session = session();
    let connection = record(session.bus(), Topic::Connection);
    let incoming = record(session.bus(), Topic::IncomingData);
    let transport = MockTransport::new();
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    for i in 0..10u8 {
        session.send(vec![i]).unwrap();
    }
    session.disconnect().await.unwrap();

    assert_eq!(session.state(), Disconnected);
    assert!(session.device().is_none());
    assert!(session.pipeline().is_empty());
    assert!(!session.pipeline().is_draining());
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(session.send(vec![1]), Err(QueueError::NotConnected));

    assert!(!transport.push_inbound(b"late"));
    let written = transport.written().len();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.written().len(), written);
    assert!(incoming.lock().is_empty());

    assert_eq!(
        transitions(&connection.lock()),
        vec![
            (Disconnected, Connecting),
            (Connecting, Open),
            (Open, Closing),
            (Closing, Disconnected)
        ]
    );

    // Disconnecting again is a no-op
    session.disconnect().await.unwrap();
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_returns_to_disconnected() {
    let session = session();
    let connection = record(session.bus(), Topic::Connection);
    let transport = MockTransport::new();
    transport.fail_open.store(true, Ordering::SeqCst);

    let err = session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::OpenFailed { .. })
    ));
    assert_eq!(session.state(), Disconnected);
    assert!(session.device().is_none());
    assert_eq!(
        transitions(&connection.lock()),
        vec![(Disconnected, Connecting), (Connecting, Disconnected)]
    );

    transport.fail_open.store(false, Ordering::SeqCst);
    session
        .connect(transport, mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();
    assert!(session.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_tears_down_the_session() {
    let session = session();
    let connection = record(session.bus(), Topic::Connection);
    let transport = MockTransport::new();
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    transport.drop_link();
    settle().await;

    assert_eq!(session.state(), Disconnected);
    assert!(session.device().is_none());
    assert!(!session.pipeline().is_open());
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);

    let events = connection.lock();
    assert!(events.iter().any(|event| matches!(
        event,
        BusEvent::Connection(ConnectionEvent::LinkError { .. })
    )));
    assert_eq!(transitions(&events).last(), Some(&(Open, Disconnected)));
}

struct Framer;

impl DataInterceptor for Framer {
    fn on_receive(&self, data: Vec<u8>) -> Vec<u8> {
        if data == b"noise" {
            return Vec::new();
        }
        let mut framed = b"<".to_vec();
        framed.extend(data);
        framed.push(b'>');
        framed
    }

    fn on_send(&self, mut data: Vec<u8>) -> Vec<u8> {
        data.extend_from_slice(b"\r\n");
        data
    }
}

#[tokio::test(start_paused = true)]
async fn test_interceptor_applies_in_both_directions() {
    let session = session();
    let incoming = record(session.bus(), Topic::IncomingData);
    let transport = MockTransport::new();
    session.set_interceptor(Some(Arc::new(Framer)));
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    transport.push_inbound(b"noise");
    transport.push_inbound(b"ok");
    session.send_text("AT", false).unwrap();
    settle().await;

    assert_eq!(incoming_text(&incoming.lock()), vec!["<ok>"]);
    assert_eq!(transport.written(), vec![b"AT\r\n".to_vec()]);

    session.set_interceptor(None);
    transport.push_inbound(b"raw");
    settle().await;
    assert_eq!(incoming_text(&incoming.lock()).last().unwrap(), "raw");
}

#[tokio::test(start_paused = true)]
async fn test_hex_send_text() {
    let session = session();
    let transport = MockTransport::new();
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    session.send_text("48 49", true).unwrap();
    assert!(session.send_text("4G", true).unwrap_err().is_codec_error());
    settle().await;
    assert_eq!(transport.written(), vec![b"HI".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_simulated_device_streams_imu_lines() {
    let scheduler = Arc::new(Scheduler::new());
    let driver = scheduler.spawn_driver(Duration::from_millis(5));
    let session = session();
    let incoming = record(session.bus(), Topic::IncomingData);
    let transport = Arc::new(SimulatedTransport::new(scheduler.clone()));

    let device = transport.discover().await.unwrap().remove(0);
    assert_eq!(device.id, simulated::SIMULATED_DEVICE_ID);
    session
        .connect(transport.clone(), device, &ConnectionParams::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(520)).await;
    let lines = incoming_text(&incoming.lock());
    assert!(lines.len() >= 9, "got {} lines", lines.len());
    assert!(lines.iter().all(|l| l.starts_with("pitch:") && l.ends_with('\n')));

    session.disconnect().await.unwrap();
    assert!(!scheduler.contains(simulated::SIMULATED_TIMER_ID));
    let count = incoming.lock().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(incoming.lock().len(), count);
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_completes_while_a_write_is_blocked() {
    let session = session();
    let connection = record(session.bus(), Topic::Connection);
    let transport = MockTransport::new();
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    transport.stall_writes();
    session.send(b"stuck".to_vec()).unwrap();
    settle().await;

    tokio::time::timeout(Duration::from_secs(10), session.disconnect())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.state(), Disconnected);
    assert!(!session.pipeline().is_open());
    assert!(transport.written().is_empty());
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(
        transitions(&connection.lock()),
        vec![
            (Disconnected, Connecting),
            (Connecting, Open),
            (Open, Closing),
            (Closing, Disconnected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_tears_down_the_session() {
    let session = session();
    let connection = record(session.bus(), Topic::Connection);
    let transport = MockTransport::new();
    session
        .connect(transport.clone(), mock_device("mock:1"), &ConnectionParams::default())
        .await
        .unwrap();

    transport.fail_writes();
    for i in 0..5u8 {
        session.send(vec![i]).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(session.state(), Disconnected);
    assert!(session.device().is_none());
    assert_eq!(session.send(b"more".to_vec()), Err(QueueError::NotConnected));
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);

    let events = connection.lock();
    let link_errors: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            BusEvent::Connection(ConnectionEvent::LinkError { reason, .. }) => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(link_errors.len(), 1);
    assert!(link_errors[0].contains("write failed"), "{}", link_errors[0]);
    assert_eq!(transitions(&events).last(), Some(&(Open, Disconnected)));
}
