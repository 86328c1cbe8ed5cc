use std::fmt;
use uuid::Uuid;

use crate::device::constants::{make_command_characteristic_uuid, make_command_service_uuid, PERIPHERAL_ADDRESS};
use crate::error::DeviceError;

/// The peripheral, service and characteristic this host is wired to. Fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub address: String,
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}

impl Default for DeviceTarget {
    fn default() -> Self {
        DeviceTarget {
            address: PERIPHERAL_ADDRESS.to_string(),
            service_id: make_command_service_uuid(),
            characteristic_id: make_command_characteristic_uuid(),
        }
    }
}

/// Generation number of a connection attempt. Every transport event carries the id of the
/// session it was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next(self) -> SessionId {
        SessionId(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Why a native request failed, as far as the state machine cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    PermissionDenied,
    Unresolvable,
    Other(String),
}

impl From<&DeviceError> for TransportFailure {
    fn from(err: &DeviceError) -> Self {
        if err.is_permission_denied() {
            return TransportFailure::PermissionDenied;
        }

        match err {
            DeviceError::PeripheralNotFound { .. }
            | DeviceError::InvalidAddress { .. }
            | DeviceError::NoAdapter => TransportFailure::Unresolvable,
            other => TransportFailure::Other(other.to_string()),
        }
    }
}

/// Completion of a request previously handed to a `GattTransport`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionStateChanged {
        session: SessionId,
        state: LinkState,
    },
    ConnectFailed {
        session: SessionId,
        failure: TransportFailure,
    },
    ServicesDiscovered {
        session: SessionId,
        services: Vec<GattService>,
    },
    DiscoveryFailed {
        session: SessionId,
        failure: TransportFailure,
    },
    NotificationsFailed {
        session: SessionId,
        failure: TransportFailure,
    },
    DescriptorWritten {
        session: SessionId,
        descriptor: Uuid,
        result: Result<(), TransportFailure>,
    },
    CharacteristicChanged {
        session: SessionId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl TransportEvent {
    pub fn session(&self) -> SessionId {
        match self {
            TransportEvent::ConnectionStateChanged { session, .. }
            | TransportEvent::ConnectFailed { session, .. }
            | TransportEvent::ServicesDiscovered { session, .. }
            | TransportEvent::DiscoveryFailed { session, .. }
            | TransportEvent::NotificationsFailed { session, .. }
            | TransportEvent::DescriptorWritten { session, .. }
            | TransportEvent::CharacteristicChanged { session, .. } => *session,
        }
    }
}

/// Everything the state machine task consumes from its queue.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    Start(DeviceTarget),
    Teardown,
    Transport(TransportEvent),
}
