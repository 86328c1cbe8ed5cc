use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::device::types::{DeviceTarget, SessionId};

/// Native BLE requests. Every method returns immediately; the outcome is delivered later as a
/// `TransportEvent` tagged with the same `SessionId`.
pub trait GattTransport: Send {
    fn connect(&mut self, session: SessionId, target: &DeviceTarget);

    fn discover_services(&mut self, session: SessionId);

    /// Starts local delivery of notifications for the characteristic.
    fn enable_notifications(&mut self, session: SessionId, service: Uuid, characteristic: Uuid);

    fn write_descriptor(&mut self, session: SessionId, service: Uuid, characteristic: Uuid, descriptor: Uuid, value: &[u8]);

    /// Drops the native connection handle of the session. Releasing an unknown session is a
    /// no-op.
    fn release(&mut self, session: SessionId);
}

pub trait PermissionGate: Send {
    fn has_required_permissions(&self) -> bool;
}

/// A permission gate backed by a shared flag, so that whoever observes a permission failure
/// can close the gate for the next attempt.
#[derive(Debug, Clone)]
pub struct PermissionFlag {
    granted: Arc<AtomicBool>,
}

impl PermissionFlag {
    pub fn new(granted: bool) -> Self {
        PermissionFlag { granted: Arc::new(AtomicBool::new(granted)) }
    }

    pub fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl PermissionGate for PermissionFlag {
    fn has_required_permissions(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}
