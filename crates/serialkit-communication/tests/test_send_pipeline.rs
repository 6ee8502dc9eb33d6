mod common;

use common::{mock_device, record, MockTransport, MockWriter};
use std::sync::atomic::Ordering;
use serialkit_communication::{
    ConnectionParams, DataInterceptor, SendPipeline, SendPipelineConfig, Transport,
};
use serialkit_core::codec::verify_checksum;
use serialkit_core::{BusEvent, ConnectionEvent, EventBus, QueueError, Topic};
use std::sync::Arc;
use tokio::time::Duration;

fn pipeline_with(bus: &EventBus, capacity: usize) -> SendPipeline {
    SendPipeline::new(
        bus.clone(),
        SendPipelineConfig {
            capacity,
            ..Default::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_payloads_are_written_in_order_with_pacing() {
    let bus = EventBus::new();
    let outgoing = record(&bus, Topic::OutgoingData);
    let pipeline = pipeline_with(&bus, 100);
    let (writer, written) = MockWriter::new();
    pipeline.attach("mock", writer).await;

    for i in 0..5u8 {
        pipeline.enqueue(vec![i]).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let written = written.lock().clone();
    let payloads: Vec<Vec<u8>> = written.iter().map(|(_, p)| p.clone()).collect();
    assert_eq!(payloads, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    for pair in written.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(10));
    }
    assert_eq!(outgoing.lock().len(), 5);
    assert!(pipeline.is_empty());
    assert!(!pipeline.is_draining());
}

#[tokio::test(start_paused = true)]
async fn test_queue_never_exceeds_capacity() {
    let bus = EventBus::new();
    let pipeline = pipeline_with(&bus, 3);
    let (writer, written) = MockWriter::new();
    pipeline.attach("mock", writer).await;

    for i in 0..3u8 {
        pipeline.enqueue(vec![i]).unwrap();
    }
    assert_eq!(
        pipeline.enqueue(vec![9]),
        Err(QueueError::QueueFull { capacity: 3 })
    );
    assert_eq!(pipeline.len(), 3);

    for i in 10..40u8 {
        let _ = pipeline.enqueue(vec![i]);
        assert!(pipeline.len() <= 3);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let written = written.lock();
    assert!(!written.iter().any(|(_, p)| p == &vec![9]));
    assert_eq!(written[0].1, vec![0]);
}

#[tokio::test(start_paused = true)]
async fn test_detach_discards_queue_and_stops_writing() {
    let bus = EventBus::new();
    let pipeline = pipeline_with(&bus, 100);
    let (writer, written) = MockWriter::new();
    pipeline.attach("mock", writer).await;

    for i in 0..20u8 {
        pipeline.enqueue(vec![i]).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(15)).await;
    let before = written.lock().len();
    assert!(before >= 1 && before < 20);

    pipeline.detach().await;
    assert!(pipeline.is_empty());
    assert!(!pipeline.is_draining());
    assert!(!pipeline.is_open());
    assert_eq!(pipeline.enqueue(vec![1]), Err(QueueError::NotConnected));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(written.lock().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_reattach_starts_a_fresh_drain() {
    let bus = EventBus::new();
    let pipeline = pipeline_with(&bus, 100);
    let (first, first_written) = MockWriter::new();
    pipeline.attach("mock", first).await;
    for i in 0..10u8 {
        pipeline.enqueue(vec![i]).unwrap();
    }
    pipeline.detach().await;

    let (second, second_written) = MockWriter::new();
    pipeline.attach("mock", second).await;
    pipeline.enqueue(b"new".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(first_written.lock().is_empty());
    let second_written = second_written.lock();
    assert_eq!(second_written.len(), 1);
    assert_eq!(second_written[0].1, b"new".to_vec());
}

struct DropEverything;

impl DataInterceptor for DropEverything {
    fn on_receive(&self, data: Vec<u8>) -> Vec<u8> {
        data
    }

    fn on_send(&self, _data: Vec<u8>) -> Vec<u8> {
        Vec::new()
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_hook_output_is_not_written() {
    let bus = EventBus::new();
    let outgoing = record(&bus, Topic::OutgoingData);
    let pipeline = pipeline_with(&bus, 100);
    pipeline.set_interceptor(Some(Arc::new(DropEverything)));
    let (writer, written) = MockWriter::new();
    pipeline.attach("mock", writer).await;

    pipeline.enqueue(b"abc".to_vec()).unwrap();
    pipeline.enqueue(b"def".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(written.lock().is_empty());
    assert!(outgoing.lock().is_empty());
    assert!(!pipeline.is_draining());
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_reported_as_link_error() {
    let bus = EventBus::new();
    let connection = record(&bus, Topic::Connection);
    let pipeline = pipeline_with(&bus, 100);

    let transport = MockTransport::new();
    let device = mock_device("mock:1");
    let pair = transport
        .connect(&device, &ConnectionParams::default())
        .await
        .unwrap();
    pipeline.attach(&device.id, pair.writer).await;

    transport.drop_link();
    pipeline.enqueue(b"lost".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = connection.lock();
    assert!(events.iter().any(|event| matches!(
        event,
        BusEvent::Connection(ConnectionEvent::LinkError { device, .. })
            if device == "network_mock:1"
    )));
}

fn link_errors(events: &[BusEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, BusEvent::Connection(ConnectionEvent::LinkError { .. })))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_closes_the_pipeline() {
    let bus = EventBus::new();
    let connection = record(&bus, Topic::Connection);
    let pipeline = pipeline_with(&bus, 100);
    let (writer, written, faults) = MockWriter::faulty();
    faults.fail.store(true, Ordering::SeqCst);
    pipeline.attach("mock", writer).await;

    for i in 0..5u8 {
        pipeline.enqueue(vec![i]).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(written.lock().is_empty());
    assert_eq!(link_errors(&connection.lock()), 1);
    assert!(!pipeline.is_open());
    assert!(pipeline.is_empty());
    assert!(!pipeline.is_draining());
    assert_eq!(pipeline.enqueue(b"more".to_vec()), Err(QueueError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_monitored_attach_reports_failure_to_owner() {
    let bus = EventBus::new();
    let connection = record(&bus, Topic::Connection);
    let pipeline = pipeline_with(&bus, 100);
    let (writer, _written, faults) = MockWriter::faulty();
    faults.fail.store(true, Ordering::SeqCst);
    let failure = pipeline.attach_monitored("mock", writer).await;

    pipeline.enqueue(b"x".to_vec()).unwrap();
    let reason = tokio::time::timeout(Duration::from_secs(1), failure)
        .await
        .unwrap()
        .unwrap();
    assert!(reason.contains("device rejected write"), "{}", reason);
    assert_eq!(link_errors(&connection.lock()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detach_abandons_a_blocked_write() {
    let bus = EventBus::new();
    let outgoing = record(&bus, Topic::OutgoingData);
    let pipeline = pipeline_with(&bus, 100);
    let (writer, written, faults) = MockWriter::faulty();
    faults.stall.store(true, Ordering::SeqCst);
    pipeline.attach("mock", writer).await;

    pipeline.enqueue(b"stuck".to_vec()).unwrap();
    pipeline.enqueue(b"queued".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(pipeline.is_draining());

    tokio::time::timeout(Duration::from_secs(1), pipeline.detach())
        .await
        .unwrap();
    assert!(!pipeline.is_open());
    assert!(pipeline.is_empty());
    assert!(written.lock().is_empty());
    assert!(outgoing.lock().is_empty());
}

struct AppendCrlf;

impl DataInterceptor for AppendCrlf {
    fn on_receive(&self, data: Vec<u8>) -> Vec<u8> {
        data
    }

    fn on_send(&self, mut data: Vec<u8>) -> Vec<u8> {
        data.extend_from_slice(b"\r\n");
        data
    }
}

#[tokio::test(start_paused = true)]
async fn test_checksum_covers_hook_output() {
    let bus = EventBus::new();
    let pipeline = SendPipeline::new(
        bus,
        SendPipelineConfig {
            checksum: true,
            ..Default::default()
        },
    );
    pipeline.set_interceptor(Some(Arc::new(AppendCrlf)));
    let (writer, written) = MockWriter::new();
    pipeline.attach("mock", writer).await;

    pipeline.enqueue(b"AT".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let written = written.lock();
    assert_eq!(written.len(), 1);
    let frame = &written[0].1;
    assert_eq!(&frame[..4], b"AT\r\n");
    assert_eq!(frame.len(), 5);
    assert!(verify_checksum(frame));
}
