#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use uuid::Uuid;

use ble_command_bridge::action::dispatcher::RecordingDispatcher;
use ble_command_bridge::device::connection::GattStateMachine;
use ble_command_bridge::device::transport::{GattTransport, PermissionFlag};
use ble_command_bridge::device::types::{DeviceTarget, GattCharacteristic, GattService, LinkState, MachineEvent, SessionId, TransportEvent};
use ble_command_bridge::status::{ConnectionStatus, StatusPublisher};

pub const CCCD: &str = "00002902-0000-1000-8000-00805f9b34fb";
pub const USER_DESCRIPTION: &str = "00002901-0000-1000-8000-00805f9b34fb";

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect(SessionId, String),
    DiscoverServices(SessionId),
    EnableNotifications(SessionId, Uuid),
    WriteDescriptor(SessionId, Uuid, Vec<u8>),
    Release(SessionId),
}

/// Records every request; completions are fed back by the test.
#[derive(Clone, Default)]
pub struct FakeTransport {
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeTransport {
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.requests().iter().filter(|request| predicate(request)).count()
    }

    fn push(&self, request: Request) {
        self.requests.lock().unwrap().push(request);
    }
}

impl GattTransport for FakeTransport {
    fn connect(&mut self, session: SessionId, target: &DeviceTarget) {
        self.push(Request::Connect(session, target.address.clone()));
    }

    fn discover_services(&mut self, session: SessionId) {
        self.push(Request::DiscoverServices(session));
    }

    fn enable_notifications(&mut self, session: SessionId, _service: Uuid, characteristic: Uuid) {
        self.push(Request::EnableNotifications(session, characteristic));
    }

    fn write_descriptor(&mut self, session: SessionId, _service: Uuid, _characteristic: Uuid, descriptor: Uuid, value: &[u8]) {
        self.push(Request::WriteDescriptor(session, descriptor, value.to_vec()));
    }

    fn release(&mut self, session: SessionId) {
        self.push(Request::Release(session));
    }
}

pub struct Harness {
    pub machine: GattStateMachine<FakeTransport, PermissionFlag, RecordingDispatcher>,
    pub transport: FakeTransport,
    pub permissions: PermissionFlag,
    pub dispatcher: RecordingDispatcher,
    pub status: StatusPublisher,
    pub seen: Arc<Mutex<Vec<ConnectionStatus>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_permission(true)
    }

    pub fn with_permission(granted: bool) -> Self {
        let transport = FakeTransport::default();
        let permissions = PermissionFlag::new(granted);
        let dispatcher = RecordingDispatcher::new();
        let status = StatusPublisher::new();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        status.observe(move |value| seen_clone.lock().unwrap().push(value));

        let machine = GattStateMachine::new(transport.clone(), permissions.clone(), dispatcher.clone(), status.clone());
        Harness { machine, transport, permissions, dispatcher, status, seen }
    }

    pub fn seen(&self) -> Vec<ConnectionStatus> {
        self.seen.lock().unwrap().clone()
    }

    pub fn deliver(&mut self, event: TransportEvent) {
        self.machine.handle(MachineEvent::Transport(event));
    }

    /// Drives a session from start to armed notifications.
    pub fn arm(&mut self, target: &DeviceTarget, descriptors: Vec<Uuid>) -> SessionId {
        self.machine.initiate(target.clone());
        let session = self.machine.session_id().expect("session was not started");
        self.deliver(connected(session));
        self.deliver(discovered(session, target, descriptors));
        session
    }
}

pub fn uuid(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap()
}

pub fn connected(session: SessionId) -> TransportEvent {
    TransportEvent::ConnectionStateChanged { session, state: LinkState::Connected }
}

pub fn disconnected(session: SessionId) -> TransportEvent {
    TransportEvent::ConnectionStateChanged { session, state: LinkState::Disconnected }
}

pub fn discovered(session: SessionId, target: &DeviceTarget, descriptors: Vec<Uuid>) -> TransportEvent {
    TransportEvent::ServicesDiscovered {
        session,
        services: vec![
            GattService {
                uuid: uuid("0000180a-0000-1000-8000-00805f9b34fb"),
                characteristics: vec![],
            },
            GattService {
                uuid: target.service_id,
                characteristics: vec![GattCharacteristic { uuid: target.characteristic_id, descriptors }],
            },
        ],
    }
}

pub fn notification(session: SessionId, target: &DeviceTarget, payload: &str) -> TransportEvent {
    TransportEvent::CharacteristicChanged {
        session,
        characteristic: target.characteristic_id,
        value: payload.as_bytes().to_vec(),
    }
}
