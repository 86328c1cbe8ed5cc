use std::str::FromStr;
use btleplug::api::BDAddr;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};

use crate::action::dispatcher::ActionDispatcher;
use crate::action::interpreter::interpret_bytes;
use crate::device::constants::ENABLE_NOTIFICATION_VALUE;
use crate::device::transport::{GattTransport, PermissionGate};
use crate::device::types::{DeviceTarget, GattService, LinkState, MachineEvent, SessionId, TransportEvent, TransportFailure};
use crate::status::{ConnectionStatus, ErrorReason, StatusPublisher};

pub type EventSender = UnboundedSender<MachineEvent>;
pub type EventReceiver = UnboundedReceiver<MachineEvent>;

/// The single queue every start request, teardown request and transport completion goes
/// through.
pub fn event_queue() -> (EventSender, EventReceiver) {
    unbounded::<MachineEvent>()
}

pub fn send_event(events: &EventSender, event: MachineEvent) {
    if let Err(err) = events.unbounded_send(event) {
        debug!("Event queue is closed, dropping {:?}", err.into_inner());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Connecting,
    Connected,
    DiscoveringServices,
    NotificationsArmed,
    Disconnected,
    Terminated,
    Error(ErrorReason),
}

#[derive(Debug)]
struct GattSession {
    id: SessionId,
    target: DeviceTarget,
    state: MachineState,
}

/// Owns the lifecycle of the (at most one) connection to the target peripheral. Driven
/// entirely by `handle`; every transport request it makes completes as a later event.
pub struct GattStateMachine<T, P, D> {
    transport: T,
    permissions: P,
    dispatcher: D,
    status: StatusPublisher,
    session: Option<GattSession>,
    last_session: SessionId,
    // state once no session is live
    resting_state: MachineState,
}

impl<T, P, D> GattStateMachine<T, P, D>
    where T: GattTransport, P: PermissionGate, D: ActionDispatcher
{
    pub fn new(transport: T, permissions: P, dispatcher: D, status: StatusPublisher) -> Self {
        GattStateMachine {
            transport,
            permissions,
            dispatcher,
            status,
            session: None,
            last_session: SessionId(0),
            resting_state: MachineState::Idle,
        }
    }

    pub fn state(&self) -> MachineState {
        match &self.session {
            Some(session) => session.state,
            None => self.resting_state,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn status(&self) -> &StatusPublisher {
        &self.status
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn handle(&mut self, event: MachineEvent) {
        match event {
            MachineEvent::Start(target) => self.initiate(target),
            MachineEvent::Teardown => self.teardown(),
            MachineEvent::Transport(event) => self.on_transport_event(event),
        }
    }

    /// Starts a new session unless one is already live, in which case the request is ignored.
    /// Failures are only reported through the published status.
    pub fn initiate(&mut self, target: DeviceTarget) {
        if let Some(session) = &self.session {
            info!("Session {} is already active ({:?}); ignoring start request", session.id, session.state);
            return;
        }

        if !self.permissions.has_required_permissions() {
            warn!("Bluetooth permission is missing; not connecting");
            self.resting_state = MachineState::Error(ErrorReason::PermissionDenied);
            self.status.publish(ConnectionStatus::PermissionRequired);
            return;
        }

        if let Err(err) = BDAddr::from_str(&target.address) {
            warn!("Can not connect to {}: {}", target.address, err);
            self.resting_state = MachineState::Error(ErrorReason::ConnectionFailed);
            self.status.publish(ConnectionStatus::Error(ErrorReason::ConnectionFailed));
            return;
        }

        let id = self.last_session.next();
        self.last_session = id;

        info!("Connecting to {} (session {})", target.address, id);
        self.transport.connect(id, &target);
        self.session = Some(GattSession { id, target, state: MachineState::Connecting });
        self.status.publish(ConnectionStatus::Connecting);
    }

    /// Releases the live session, if any. Calling it again, or without a session, changes
    /// nothing.
    pub fn teardown(&mut self) {
        match self.session.take() {
            Some(session) => {
                info!("Tearing down session {}", session.id);
                self.transport.release(session.id);
                self.resting_state = MachineState::Terminated;
                self.status.publish(ConnectionStatus::Disconnected);
            },
            None => debug!("Nothing to tear down"),
        }
    }

    fn set_session_state(&mut self, state: MachineState) {
        if let Some(session) = &mut self.session {
            session.state = state;
        }
    }

    fn end_session(&mut self, state: MachineState, status: ConnectionStatus) {
        if let Some(session) = self.session.take() {
            self.transport.release(session.id);
        }
        self.resting_state = state;
        self.status.publish(status);
    }

    fn fail(&mut self, failure: &TransportFailure, reason: ErrorReason) {
        match failure {
            TransportFailure::PermissionDenied => {
                self.end_session(MachineState::Error(ErrorReason::PermissionDenied), ConnectionStatus::PermissionRequired);
            },
            TransportFailure::Unresolvable => {
                self.end_session(MachineState::Error(ErrorReason::ConnectionFailed), ConnectionStatus::Error(ErrorReason::ConnectionFailed));
            },
            TransportFailure::Other(_) => {
                self.end_session(MachineState::Error(reason), ConnectionStatus::Error(reason));
            },
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let (state, target) = match &self.session {
            Some(session) if session.id == event.session() => (session.state, session.target.clone()),
            _ => {
                debug!("Discarding stale callback for session {}: {:?}", event.session(), event);
                return;
            },
        };

        match event {
            TransportEvent::ConnectionStateChanged { session, state: LinkState::Connected } => {
                if state != MachineState::Connecting {
                    debug!("Ignoring repeated connected state change in {:?}", state);
                    return;
                }

                info!("Connected; Discovering services...");
                self.set_session_state(MachineState::Connected);
                self.status.publish(ConnectionStatus::Connected);

                self.transport.discover_services(session);
                self.set_session_state(MachineState::DiscoveringServices);
            },
            TransportEvent::ConnectionStateChanged { state: LinkState::Disconnected, .. } => {
                warn!("Connection lost");
                self.end_session(MachineState::Disconnected, ConnectionStatus::Disconnected);
            },
            TransportEvent::ConnectFailed { failure, .. } => {
                warn!("Connecting to peripheral failed: {:?}", failure);
                self.fail(&failure, ErrorReason::ConnectionFailed);
            },
            TransportEvent::ServicesDiscovered { session, services } => {
                if state != MachineState::DiscoveringServices {
                    debug!("Ignoring service discovery result in {:?}", state);
                    return;
                }

                self.arm_notifications(session, &target, &services);
            },
            TransportEvent::DiscoveryFailed { failure, .. } => {
                warn!("Discovering services failed: {:?}", failure);
                self.fail(&failure, ErrorReason::ConnectionFailed);
            },
            TransportEvent::NotificationsFailed { failure, .. } => {
                warn!("Enabling notifications failed: {:?}", failure);
                self.fail(&failure, ErrorReason::DescriptorWriteFailed);
            },
            TransportEvent::DescriptorWritten { descriptor, result: Ok(()), .. } => {
                debug!("Descriptor {} written", descriptor);
            },
            TransportEvent::DescriptorWritten { descriptor, result: Err(failure), .. } => {
                warn!("Writing descriptor {} failed: {:?}", descriptor, failure);
                self.fail(&failure, ErrorReason::DescriptorWriteFailed);
            },
            TransportEvent::CharacteristicChanged { characteristic, value, .. } => {
                if state != MachineState::NotificationsArmed || characteristic != target.characteristic_id {
                    debug!("Ignoring notification from {} in {:?}", characteristic, state);
                    return;
                }

                let command = interpret_bytes(&value);
                if command.is_recognized() {
                    info!("Received command {}", command);
                    self.dispatcher.dispatch(command);
                } else {
                    debug!("Ignoring unrecognized command {:?}", String::from_utf8_lossy(&value));
                }
            },
        }
    }

    fn arm_notifications(&mut self, session: SessionId, target: &DeviceTarget, services: &[GattService]) {
        let characteristic = services
            .iter()
            .find(|service| service.uuid == target.service_id)
            .and_then(|service| {
                service.characteristics
                    .iter()
                    .find(|characteristic| characteristic.uuid == target.characteristic_id)
            });

        let characteristic = match characteristic {
            Some(characteristic) => characteristic,
            None => {
                warn!("Service {} / characteristic {} not found", target.service_id, target.characteristic_id);
                self.end_session(MachineState::Error(ErrorReason::ServiceNotFound), ConnectionStatus::Error(ErrorReason::ServiceNotFound));
                return;
            },
        };

        info!("Service Discovered; Subscribing to characteristic {:?} {:?}", target.service_id, characteristic.uuid);
        self.status.publish(ConnectionStatus::ServicesDiscovered);

        self.transport.enable_notifications(session, target.service_id, characteristic.uuid);

        // every descriptor gets the value, not only the client characteristic configuration
        for descriptor in &characteristic.descriptors {
            info!("Enabling notifications through descriptor {}", descriptor);
            self.transport.write_descriptor(session, target.service_id, characteristic.uuid, *descriptor, &ENABLE_NOTIFICATION_VALUE);
        }

        self.set_session_state(MachineState::NotificationsArmed);
        self.status.publish(ConnectionStatus::NotificationsEnabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::action::dispatcher::RecordingDispatcher;
    use crate::action::interpreter::Command;
    use crate::device::transport::PermissionFlag;
    use crate::device::types::GattCharacteristic;

    #[derive(Default)]
    struct CountingTransport {
        connects: Vec<SessionId>,
        discoveries: usize,
        descriptor_writes: usize,
        releases: Vec<SessionId>,
    }

    impl GattTransport for CountingTransport {
        fn connect(&mut self, session: SessionId, _target: &DeviceTarget) {
            self.connects.push(session);
        }

        fn discover_services(&mut self, _session: SessionId) {
            self.discoveries += 1;
        }

        fn enable_notifications(&mut self, _session: SessionId, _service: Uuid, _characteristic: Uuid) {}

        fn write_descriptor(&mut self, _session: SessionId, _service: Uuid, _characteristic: Uuid, _descriptor: Uuid, _value: &[u8]) {
            self.descriptor_writes += 1;
        }

        fn release(&mut self, session: SessionId) {
            self.releases.push(session);
        }
    }

    fn machine() -> GattStateMachine<CountingTransport, PermissionFlag, RecordingDispatcher> {
        GattStateMachine::new(
            CountingTransport::default(),
            PermissionFlag::new(true),
            RecordingDispatcher::new(),
            StatusPublisher::new(),
        )
    }

    fn connected(session: SessionId) -> MachineEvent {
        MachineEvent::Transport(TransportEvent::ConnectionStateChanged { session, state: LinkState::Connected })
    }

    #[test]
    fn repeated_start_is_ignored_while_live() {
        let mut machine = machine();
        machine.initiate(DeviceTarget::default());
        machine.initiate(DeviceTarget::default());

        assert_eq!(machine.transport().connects, vec![SessionId(1)]);
        assert_eq!(machine.state(), MachineState::Connecting);
    }

    #[test]
    fn malformed_address_fails_without_native_call() {
        let mut machine = machine();
        machine.initiate(DeviceTarget { address: "not-an-address".to_string(), ..DeviceTarget::default() });

        assert!(machine.transport().connects.is_empty());
        assert_eq!(machine.state(), MachineState::Error(ErrorReason::ConnectionFailed));
        assert_eq!(machine.status().current(), ConnectionStatus::Error(ErrorReason::ConnectionFailed));
    }

    #[test]
    fn connected_requests_discovery_once() {
        let mut machine = machine();
        machine.initiate(DeviceTarget::default());
        machine.handle(connected(SessionId(1)));
        machine.handle(connected(SessionId(1)));

        assert_eq!(machine.transport().discoveries, 1);
        assert_eq!(machine.state(), MachineState::DiscoveringServices);
        assert_eq!(machine.status().current(), ConnectionStatus::Connected);
    }

    #[test]
    fn notification_before_arming_is_ignored() {
        let mut machine = machine();
        machine.initiate(DeviceTarget::default());
        machine.handle(connected(SessionId(1)));
        machine.handle(MachineEvent::Transport(TransportEvent::CharacteristicChanged {
            session: SessionId(1),
            characteristic: DeviceTarget::default().characteristic_id,
            value: b"tel".to_vec(),
        }));

        assert!(machine.dispatcher.commands().is_empty());
    }

    #[test]
    fn notification_from_other_characteristic_is_ignored() {
        let target = DeviceTarget::default();
        let mut machine = machine();
        machine.initiate(target.clone());
        machine.handle(connected(SessionId(1)));
        machine.handle(MachineEvent::Transport(TransportEvent::ServicesDiscovered {
            session: SessionId(1),
            services: vec![GattService {
                uuid: target.service_id,
                characteristics: vec![GattCharacteristic { uuid: target.characteristic_id, descriptors: vec![] }],
            }],
        }));
        machine.handle(MachineEvent::Transport(TransportEvent::CharacteristicChanged {
            session: SessionId(1),
            characteristic: Uuid::nil(),
            value: b"tel".to_vec(),
        }));
        machine.handle(MachineEvent::Transport(TransportEvent::CharacteristicChanged {
            session: SessionId(1),
            characteristic: target.characteristic_id,
            value: b"msg".to_vec(),
        }));

        assert_eq!(machine.dispatcher.commands(), vec![Command::OpenApp]);
        assert_eq!(machine.state(), MachineState::NotificationsArmed);
    }

    #[test]
    fn unresolvable_address_reports_connection_failed() {
        let mut machine = machine();
        machine.initiate(DeviceTarget::default());
        machine.handle(MachineEvent::Transport(TransportEvent::ConnectFailed {
            session: SessionId(1),
            failure: TransportFailure::Unresolvable,
        }));

        assert_eq!(machine.state(), MachineState::Error(ErrorReason::ConnectionFailed));
        assert_eq!(machine.transport().releases, vec![SessionId(1)]);
    }

    #[test]
    fn new_session_after_disconnect_gets_new_id() {
        let mut machine = machine();
        machine.initiate(DeviceTarget::default());
        machine.handle(MachineEvent::Transport(TransportEvent::ConnectionStateChanged {
            session: SessionId(1),
            state: LinkState::Disconnected,
        }));
        assert_eq!(machine.state(), MachineState::Disconnected);

        machine.initiate(DeviceTarget::default());
        assert_eq!(machine.session_id(), Some(SessionId(2)));
        assert_eq!(machine.transport().connects, vec![SessionId(1), SessionId(2)]);
    }
}
