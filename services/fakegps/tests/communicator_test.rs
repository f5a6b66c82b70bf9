//! Communicator integration tests
//!
//! Drive the node wrapper over the in-memory mock driver and check error
//! classification, dispatch order, lifecycle and the bytes put on the bus.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fakegps::config::StackSettings;
use fakegps::core::transport::{TransportConfig, TransportSettings};
use fakegps::gps::reference_fix;
use fakegps::runtime::{connect_with_retry, RetryPolicy};
use fakegps::{Communicator, NodeError, NodeIdentity, NodeState, SpinPeriod};
use tokio_util::sync::CancellationToken;
use uavcan_legacy::driver::MockDriver;
use uavcan_legacy::transfer::{segment, MessageHeader, Reassembler};
use uavcan_legacy::{
    CanFrame, DriverError, Event, Fix, GetNodeInfo, GetNodeInfoResponse, Message, Mode, NodeId,
    NodeStatus, Priority, ServiceHeader, Stack, TransferId,
};

type MockCommunicator = Communicator<Stack<MockDriver>>;

fn quiet_stack() -> StackSettings {
    StackSettings {
        status_interval_secs: 0.0,
        ..Default::default()
    }
}

async fn open_mock(driver: &MockDriver, stack: &StackSettings) -> MockCommunicator {
    let driver = driver.clone();
    Communicator::open(
        &TransportSettings::default(),
        NodeIdentity::default(),
        stack,
        move |_config| async move { Ok::<_, DriverError>(driver) },
    )
    .await
    .unwrap()
}

fn status_frame(source: u8, uptime_sec: u32) -> CanFrame {
    let status = NodeStatus {
        uptime_sec,
        ..Default::default()
    };
    let can_id = MessageHeader {
        priority: Priority::LOW,
        data_type_id: NodeStatus::DATA_TYPE_ID,
        source: NodeId::new(source).unwrap(),
    }
    .can_id();
    let mut blocks = segment(
        &status.to_bytes().unwrap(),
        NodeStatus::DATA_TYPE_SIGNATURE,
        TransferId::default(),
    );
    assert_eq!(blocks.len(), 1);
    CanFrame::new_extended(can_id, blocks.remove(0)).unwrap()
}

fn node_info_request(source: u8, transfer_id: u8) -> CanFrame {
    let can_id = ServiceHeader {
        priority: Priority::LOW,
        service_type_id: GetNodeInfo::SERVICE_TYPE_ID,
        request: true,
        destination: NodeId::new(42).unwrap(),
        source: NodeId::new(source).unwrap(),
    }
    .can_id();
    let mut blocks = segment(
        &[],
        GetNodeInfo::DATA_TYPE_SIGNATURE,
        TransferId::from_truncating(transfer_id),
    );
    CanFrame::new_extended(can_id, blocks.remove(0)).unwrap()
}

/// Reassemble everything the driver sent into Fix messages
fn decode_fixes(frames: &[CanFrame]) -> Vec<Fix> {
    let mut reassembler = Reassembler::new();
    let mut fixes = Vec::new();
    for frame in frames {
        let header = MessageHeader::parse(frame.id.raw()).unwrap();
        if header.data_type_id != Fix::DATA_TYPE_ID {
            continue;
        }
        if let Some(transfer) = reassembler
            .accept(header, &frame.data, Fix::DATA_TYPE_SIGNATURE)
            .unwrap()
        {
            fixes.push(Fix::from_bytes(&transfer.payload).unwrap());
        }
    }
    fixes
}

#[tokio::test]
async fn test_valid_selection_is_live() {
    let driver = MockDriver::default();
    let node = open_mock(&driver, &quiet_stack()).await;

    assert_eq!(node.state(), NodeState::Live);
    assert_eq!(node.subscription_count(), 0);
    assert_eq!(node.error_counters(), Default::default());
    assert_eq!(node.identity().node_id.get(), 42);
}

#[tokio::test]
async fn test_invalid_selection_never_opens_driver() {
    let opened = Cell::new(false);
    let settings = TransportSettings {
        kind: "usb".to_string(),
        ..Default::default()
    };

    let result = Communicator::open(
        &settings,
        NodeIdentity::default(),
        &quiet_stack(),
        |_config: TransportConfig| {
            opened.set(true);
            async { Ok::<_, DriverError>(MockDriver::default()) }
        },
    )
    .await;

    assert!(matches!(result, Err(NodeError::Config(_))));
    assert!(!opened.get());
}

#[tokio::test]
async fn test_missing_serial_device_is_acquisition_error() {
    let settings = TransportSettings {
        device: "/dev/fakegps-no-such-adapter".to_string(),
        ..Default::default()
    };
    let result = Communicator::new(&settings, NodeIdentity::default()).await;

    match result {
        Err(error) => assert!(error.is_acquisition(), "unexpected error: {error}"),
        Ok(_) => panic!("opening a missing device must fail"),
    }
}

#[cfg(not(all(target_os = "linux", feature = "can-linux")))]
#[tokio::test]
async fn test_socketcan_selection_without_support_is_config_error() {
    let settings = TransportSettings {
        kind: "can-slcan".to_string(),
        ..Default::default()
    };
    let result = Communicator::new(&settings, NodeIdentity::default()).await;
    assert!(matches!(result, Err(NodeError::Config(_))));
}

#[cfg(all(target_os = "linux", feature = "can-linux"))]
#[tokio::test]
async fn test_missing_socketcan_interface_is_acquisition_error() {
    let settings = TransportSettings {
        kind: "can-slcan".to_string(),
        interface: "fakegps-none0".to_string(),
        ..Default::default()
    };
    match Communicator::new(&settings, NodeIdentity::default()).await {
        Err(error) => assert!(error.is_acquisition(), "unexpected error: {error}"),
        Ok(_) => panic!("opening a missing interface must fail"),
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    node.subscribe::<NodeStatus, _>(|_event| Ok(())).unwrap();

    node.close().await;
    node.close().await;

    assert_eq!(node.state(), NodeState::Closed);
    assert_eq!(node.subscription_count(), 0);
    assert_eq!(driver.close_calls().await, 1);
    assert!(matches!(
        node.publish_lowest(&reference_fix()).await,
        Err(NodeError::Closed)
    ));
    assert!(matches!(
        node.spin(SpinPeriod::NonBlocking).await,
        Err(NodeError::Closed)
    ));
}

#[tokio::test]
async fn test_send_errors_are_counted() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    let fix = reference_fix();

    for _ in 0..3 {
        driver
            .fail_next_send(DriverError::Bus("bus-off".to_string()))
            .await;
        node.publish_lowest(&fix).await.unwrap();
    }
    assert!(driver.sent_frames().await.is_empty());

    node.publish_lowest(&fix).await.unwrap();
    assert_eq!(node.error_counters().tx_can_errors, 3);
    assert_eq!(node.error_counters().tx_queue_full, 0);
    assert_eq!(decode_fixes(&driver.sent_frames().await), vec![fix]);
}

#[tokio::test]
async fn test_spin_dispatches_to_all_callbacks_in_order() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second"] {
        let seen = seen.clone();
        node.subscribe::<NodeStatus, _>(move |event: &Event<NodeStatus>| {
            seen.lock()
                .unwrap()
                .push((name, event.source_node_id.get(), event.message.uptime_sec));
            Ok(())
        })
        .unwrap();
    }
    driver
        .push_frames([status_frame(10, 100), status_frame(11, 7)])
        .await;

    node.spin(SpinPeriod::NonBlocking).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("first", 10, 100),
            ("second", 10, 100),
            ("first", 11, 7),
            ("second", 11, 7),
        ]
    );
    assert_eq!(node.subscription_count(), 2);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    let count = Arc::new(Mutex::new(0));

    let counter = count.clone();
    let handle = node
        .subscribe::<NodeStatus, _>(move |_event| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(handle.data_type(), "uavcan.protocol.NodeStatus");
    assert!(node.unsubscribe(handle));
    assert!(!node.unsubscribe(handle));

    driver.push_frame(status_frame(10, 1)).await;
    node.spin(SpinPeriod::NonBlocking).await.unwrap();
    assert_eq!(*count.lock().unwrap(), 0);
    assert_eq!(node.subscription_count(), 0);
}

#[tokio::test]
async fn test_callback_error_propagates() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    node.subscribe::<NodeStatus, _>(|_event| anyhow::bail!("subscriber exploded"))
        .unwrap();
    driver.push_frame(status_frame(10, 1)).await;

    let result = node.spin(SpinPeriod::NonBlocking).await;
    assert!(matches!(result, Err(NodeError::Stack(_))));
    assert_eq!(node.state(), NodeState::Live);
}

#[tokio::test]
async fn test_spin_soft_errors_are_counted() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    node.subscribe::<NodeStatus, _>(|_event| Ok(())).unwrap();

    driver
        .push_receive_error(DriverError::Bus("error frame".to_string()))
        .await;
    node.spin(SpinPeriod::NonBlocking).await.unwrap();

    // Continuation frame with no start of transfer
    let mut orphan = status_frame(12, 1);
    let last = orphan.data.len() - 1;
    orphan.data[last] &= !0x80;
    driver.push_frame(orphan).await;
    node.spin(SpinPeriod::NonBlocking).await.unwrap();

    driver
        .push_receive_error(DriverError::QueueFull("rx overrun".to_string()))
        .await;
    node.spin(SpinPeriod::NonBlocking).await.unwrap();

    let counters = node.error_counters();
    assert_eq!(counters.spin_can_errors, 1);
    assert_eq!(counters.spin_transfer_errors, 1);
    assert_eq!(counters.tx_can_errors + counters.tx_queue_full, 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_failure_retries_indefinitely() {
    let attempts = Rc::new(Cell::new(0u32));
    let counter = attempts.clone();
    let policy = RetryPolicy {
        initial_delay: Duration::from_secs(2),
        ..Default::default()
    };
    let cancel = CancellationToken::new();
    let transport = TransportSettings::default();
    let stack = quiet_stack();

    let outcome = tokio::time::timeout(
        Duration::from_secs(21),
        connect_with_retry(
            || {
                counter.set(counter.get() + 1);
                Communicator::open(
                    &transport,
                    NodeIdentity::default(),
                    &stack,
                    |_config| async {
                        Err::<MockDriver, _>(DriverError::Unavailable(
                            "/dev/ttyACM0: No such file or directory".to_string(),
                        ))
                    },
                )
            },
            &policy,
            &cancel,
        ),
    )
    .await;

    // Still retrying when the horizon ends: attempts at t = 0, 2, ..., 20
    assert!(outcome.is_err());
    assert_eq!(attempts.get(), 11);
}

#[tokio::test]
async fn test_reference_fix_on_the_wire() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;

    node.publish_lowest(&reference_fix()).await.unwrap();

    let frames = driver.sent_frames().await;
    assert_eq!(frames.len(), 7);
    for frame in &frames {
        let header = MessageHeader::parse(frame.id.raw()).unwrap();
        assert_eq!(header.priority, Priority::LOWEST);
        assert_eq!(header.source.get(), 42);
    }

    let fixes = decode_fixes(&frames);
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].latitude_deg_1e8, 5_575_444_260);
    assert_eq!(fixes[0].height_msl_mm, -6500);
    assert_eq!(fixes[0].height_ellipsoid_mm, 0);
    assert_eq!(fixes[0].longitude_deg_1e8, 4_874_268_400);
    assert_eq!(fixes[0].sats_used, 10);
}

#[tokio::test]
async fn test_queue_full_publish_is_counted_once() {
    let driver = MockDriver::default();
    let stack = StackSettings {
        tx_queue_capacity: 10,
        ..quiet_stack()
    };
    let mut node = open_mock(&driver, &stack).await;
    let fix = reference_fix();

    // Adapter refuses the first frame: the transfer stays in the stack queue
    driver
        .fail_next_send(DriverError::QueueFull("ENOBUFS".to_string()))
        .await;
    node.publish_lowest(&fix).await.unwrap();
    assert_eq!(node.error_counters().tx_queue_full, 0);
    assert_eq!(node.stack().unwrap().tx_pending(), 7);

    // Second transfer does not fit
    node.publish_lowest(&fix).await.unwrap();
    assert_eq!(node.error_counters().tx_queue_full, 1);

    // Next cycle drains the queue and publishes normally
    node.spin(SpinPeriod::NonBlocking).await.unwrap();
    node.publish_lowest(&fix).await.unwrap();

    assert_eq!(node.error_counters().tx_queue_full, 1);
    assert_eq!(node.error_counters().tx_can_errors, 0);
    assert_eq!(decode_fixes(&driver.sent_frames().await).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_spin_serves_callbacks_while_transport_queue_is_full() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    node.subscribe::<NodeStatus, _>(move |_event| {
        *counter.lock().unwrap() += 1;
        Ok(())
    })
    .unwrap();

    // Nobody on the bus acknowledges: every send is refused
    for _ in 0..100 {
        driver
            .fail_next_send(DriverError::QueueFull("ENOBUFS".to_string()))
            .await;
    }
    node.publish_lowest(&reference_fix()).await.unwrap();
    driver.push_frame(status_frame(10, 5)).await;

    let started = tokio::time::Instant::now();
    node.spin(SpinPeriod::Timeout(Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(started.elapsed(), Duration::from_millis(200));
    assert_eq!(node.error_counters(), Default::default());
    assert!(driver.sent_frames().await.is_empty());
}

#[tokio::test]
async fn test_get_node_info_reports_identity() {
    let driver = MockDriver::default();
    let mut node = open_mock(&driver, &quiet_stack()).await;

    driver.push_frame(node_info_request(10, 7)).await;
    node.spin(SpinPeriod::NonBlocking).await.unwrap();

    let mut reassembler = Reassembler::new();
    let mut responses = Vec::new();
    for frame in driver.sent_frames().await {
        let header = ServiceHeader::parse(frame.id.raw()).unwrap();
        assert!(!header.request);
        assert_eq!(header.destination.get(), 10);
        assert_eq!(header.source.get(), 42);
        if let Some(response) = reassembler
            .accept_service(header, &frame.data, GetNodeInfo::DATA_TYPE_SIGNATURE)
            .unwrap()
        {
            responses.push(response);
        }
    }
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].transfer_id.get(), 7);

    let info = GetNodeInfoResponse::from_bytes(&responses[0].payload).unwrap();
    let identity = node.identity();
    assert_eq!(info.name, identity.name);
    assert_eq!(info.name, "uavcan communicator");
    assert_eq!(info.software_version.major, 0);
    assert_eq!(info.software_version.minor, 2);
    assert_eq!(info.hardware_version.unique_id, identity.hardware_unique_id);
    assert_eq!(&info.hardware_version.unique_id[..5], b"12345");
    assert_eq!(info.status.mode, Mode::Operational);
}
