//! The queue-driven service: start trigger, event ordering and shutdown.

mod common;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use ble_command_bridge::action::dispatcher::RecordingDispatcher;
use ble_command_bridge::action::interpreter::Command;
use ble_command_bridge::device::connection::{event_queue, GattStateMachine};
use ble_command_bridge::device::transport::PermissionFlag;
use ble_command_bridge::device::types::{DeviceTarget, MachineEvent, SessionId};
use ble_command_bridge::service::BleService;
use ble_command_bridge::status::{ConnectionStatus, StatusPublisher, StatusStream};
use common::*;

fn spawn_service(granted: bool) -> (BleService, FakeTransport, RecordingDispatcher) {
    let transport = FakeTransport::default();
    let dispatcher = RecordingDispatcher::new();
    let (events, receiver) = event_queue();
    let machine = GattStateMachine::new(
        transport.clone(),
        PermissionFlag::new(granted),
        dispatcher.clone(),
        StatusPublisher::new(),
    );
    let service = BleService::spawn(CancellationToken::new(), machine, events, receiver);
    (service, transport, dispatcher)
}

async fn expect_statuses(stream: &mut StatusStream, expected: &[ConnectionStatus]) {
    for status in expected {
        assert_eq!(stream.next().await.as_ref(), Some(status));
    }
}

#[tokio::test]
async fn test_service_happy_path() {
    let target = DeviceTarget::default();
    let (service, transport, dispatcher) = spawn_service(true);
    let mut stream = service.subscribe();
    let events = service.events();

    service.start(target.clone());
    expect_statuses(&mut stream, &[ConnectionStatus::Inactive, ConnectionStatus::Connecting]).await;

    events.unbounded_send(MachineEvent::Transport(connected(SessionId(1)))).unwrap();
    events.unbounded_send(MachineEvent::Transport(discovered(SessionId(1), &target, vec![uuid(CCCD)]))).unwrap();
    expect_statuses(&mut stream, &[
        ConnectionStatus::Connected,
        ConnectionStatus::ServicesDiscovered,
        ConnectionStatus::NotificationsEnabled,
    ]).await;

    events.unbounded_send(MachineEvent::Transport(notification(SessionId(1), &target, "tel"))).unwrap();
    service.shutdown().await;

    assert_eq!(dispatcher.commands(), vec![Command::Call]);
    assert_eq!(transport.count(|r| matches!(r, Request::Release(..))), 1);
    assert_eq!(stream.next().await, Some(ConnectionStatus::Disconnected));
}

#[tokio::test]
async fn test_repeated_start_is_ignored() {
    let target = DeviceTarget::default();
    let (service, transport, _dispatcher) = spawn_service(true);

    service.start(target.clone());
    service.start(target.clone());
    service.events().unbounded_send(MachineEvent::Transport(connected(SessionId(1)))).unwrap();
    service.start(target);
    service.shutdown().await;

    assert_eq!(transport.count(|r| matches!(r, Request::Connect(..))), 1);
    assert_eq!(transport.count(|r| matches!(r, Request::DiscoverServices(..))), 1);
}

#[tokio::test]
async fn test_service_permission_denied() {
    let (service, transport, dispatcher) = spawn_service(false);
    let mut stream = service.subscribe();

    service.start(DeviceTarget::default());
    expect_statuses(&mut stream, &[ConnectionStatus::Inactive, ConnectionStatus::PermissionRequired]).await;
    service.shutdown().await;

    assert!(transport.requests().is_empty());
    assert!(dispatcher.commands().is_empty());
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn test_explicit_teardown() {
    let (service, transport, _dispatcher) = spawn_service(true);
    let mut stream = service.subscribe();

    service.start(DeviceTarget::default());
    service.teardown();
    service.teardown();
    expect_statuses(&mut stream, &[
        ConnectionStatus::Inactive,
        ConnectionStatus::Connecting,
        ConnectionStatus::Disconnected,
    ]).await;
    let status = service.status().clone();
    service.shutdown().await;

    assert_eq!(transport.count(|r| matches!(r, Request::Release(..))), 1);
    assert_eq!(status.current(), ConnectionStatus::Disconnected);
}
