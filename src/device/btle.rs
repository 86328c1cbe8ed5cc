use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::connection::{send_event, EventSender};
use crate::device::constants::{IS_CONNECTED_DEADLINE, LINK_POLL_DELAY, RESOLVE_DEADLINE, RESOLVE_POLL_DELAY, WRITE_DEADLINE};
use crate::device::transport::{GattTransport, PermissionFlag};
use crate::device::types::{DeviceTarget, GattCharacteristic, GattService, LinkState, MachineEvent, SessionId, TransportEvent, TransportFailure};
use crate::error::DeviceError;

/// Lists the bluetooth adapters. Fails with a permission error if this process may not use
/// bluetooth at all.
pub async fn probe_adapters(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    let adapters = manager.adapters().await?;

    for adapter in &adapters {
        info!("Found adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
    }

    Ok(adapters)
}

async fn find_peripheral(adapters: &[Adapter], address: BDAddr) -> Option<Peripheral> {
    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        if let Some(peripheral) = peripherals.into_iter().find(|peripheral| peripheral.address() == address) {
            return Some(peripheral);
        }
    }

    None
}

// Known peripherals are used as-is; otherwise the adapters scan until the address shows up
// or RESOLVE_DEADLINE passes.
async fn resolve_peripheral(adapters: &[Adapter], address: &str) -> Result<Peripheral, DeviceError> {
    let bd_addr = BDAddr::from_str(address)
        .map_err(|_| DeviceError::InvalidAddress { address: address.to_string() })?;

    if adapters.is_empty() {
        return Err(DeviceError::NoAdapter);
    }

    if let Some(peripheral) = find_peripheral(adapters, bd_addr).await {
        return Ok(peripheral);
    }

    for adapter in adapters {
        debug!("Scanning for {}...", address);
        adapter.start_scan(ScanFilter::default()).await?;
    }

    let found = timeout(Duration::from_millis(RESOLVE_DEADLINE), async {
        loop {
            if let Some(peripheral) = find_peripheral(adapters, bd_addr).await {
                return peripheral;
            }
            sleep(Duration::from_millis(RESOLVE_POLL_DELAY)).await;
        }
    }).await;

    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }
    }

    found.map_err(|_| DeviceError::PeripheralNotFound { address: address.to_string() })
}

async fn is_connected(peripheral: &Peripheral) -> bool {
    tokio::select! {
        _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
            // macOS
            warn!("Checking for connection status took too long");
            false
        }
        result = peripheral.is_connected() => match result {
            Err(err) => {
                warn!("Error checking for connection state: {:?}", err);
                false
            },
            Ok(connected) => connected,
        }
    }
}

async fn watch_link(cancel: CancellationToken, peripheral: Peripheral, session: SessionId, events: EventSender) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = sleep(Duration::from_millis(LINK_POLL_DELAY)) => {},
        }

        if !is_connected(&peripheral).await {
            if !cancel.is_cancelled() {
                send_transport_event(&events, TransportEvent::ConnectionStateChanged {
                    session,
                    state: LinkState::Disconnected,
                });
            }
            break 'mainloop;
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, service: Uuid, characteristic: Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|c| c.service_uuid == service && c.uuid == characteristic)
        .ok_or(DeviceError::MissingCharacteristic)
}

async fn forward_notifications(
    cancel: CancellationToken,
    peripheral: Peripheral,
    characteristic: Characteristic,
    session: SessionId,
    events: EventSender,
) -> Result<(), DeviceError> {
    // obtain the stream before subscribing so that no notification is missed
    let mut notification_stream = peripheral.notifications().await?;
    peripheral.subscribe(&characteristic).await?;

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            data = notification_stream.next() => match data {
                Some(data) => {
                    if data.uuid.eq(&characteristic.uuid) {
                        send_transport_event(&events, TransportEvent::CharacteristicChanged {
                            session,
                            characteristic: data.uuid,
                            value: data.value,
                        });
                    }
                },
                None => {
                    debug!("Notification stream ended");
                    break 'mainloop;
                },
            },
        }
    }

    Ok(())
}

async fn write_descriptor(peripheral: &Peripheral, service: Uuid, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<(), DeviceError> {
    let characteristic = find_characteristic(peripheral, service, characteristic)?;
    let descriptor = characteristic.descriptors
        .iter()
        .find(|d| d.uuid == descriptor)
        .ok_or(DeviceError::MissingDescriptor)?;

    match timeout(Duration::from_millis(WRITE_DEADLINE), peripheral.write_descriptor(descriptor, value)).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!("Writing to descriptor {} took too long", descriptor.uuid);
            Err(DeviceError::Btle { source: btleplug::Error::TimedOut(Duration::from_millis(WRITE_DEADLINE)) })
        },
    }
}

fn send_transport_event(events: &EventSender, event: TransportEvent) {
    send_event(events, MachineEvent::Transport(event));
}

fn to_gatt_services(peripheral: &Peripheral) -> Vec<GattService> {
    peripheral.services()
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service.characteristics
                .into_iter()
                .map(|characteristic| GattCharacteristic {
                    uuid: characteristic.uuid,
                    descriptors: characteristic.descriptors.iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        })
        .collect()
}

struct SlotState<P> {
    released: bool,
    peripheral: Option<P>,
}

/// Hands the connected peripheral from the connect task to `release`. Whichever side comes
/// second owns the disconnect, so it happens exactly once.
struct SessionSlot<P> {
    state: Mutex<SlotState<P>>,
}

impl<P: Clone> SessionSlot<P> {
    fn new() -> Self {
        SessionSlot { state: Mutex::new(SlotState { released: false, peripheral: None }) }
    }

    /// Stores the connected peripheral. Gives it back if the session was released already, in
    /// which case the caller must disconnect it.
    fn store(&self, peripheral: P) -> Result<(), P> {
        let mut state = self.state.lock().expect("Failed to lock session slot");
        if state.released {
            return Err(peripheral);
        }
        state.peripheral = Some(peripheral);
        Ok(())
    }

    /// Marks the session released and takes the stored peripheral, if any.
    fn release(&self) -> Option<P> {
        let mut state = self.state.lock().expect("Failed to lock session slot");
        state.released = true;
        state.peripheral.take()
    }

    fn get(&self) -> Option<P> {
        self.state.lock().expect("Failed to lock session slot").peripheral.clone()
    }
}

struct SessionLink {
    cancel: CancellationToken,
    slot: Arc<SessionSlot<Peripheral>>,
}

/// `GattTransport` on top of btleplug. Every request runs in its own tokio task and reports
/// back through the event queue.
pub struct BtleTransport {
    adapters: Vec<Adapter>,
    events: EventSender,
    permissions: PermissionFlag,
    sessions: HashMap<SessionId, SessionLink>,
}

impl BtleTransport {
    pub fn new(adapters: Vec<Adapter>, events: EventSender, permissions: PermissionFlag) -> Self {
        BtleTransport {
            adapters,
            events,
            permissions,
            sessions: HashMap::new(),
        }
    }

    fn link(&self, session: SessionId) -> Option<(Peripheral, CancellationToken)> {
        let link = self.sessions.get(&session)?;
        let peripheral = link.slot.get()?;
        Some((peripheral, link.cancel.clone()))
    }

    fn failure(&self, err: &DeviceError) -> TransportFailure {
        if err.is_permission_denied() {
            self.permissions.set(false);
        }
        TransportFailure::from(err)
    }
}

impl GattTransport for BtleTransport {
    fn connect(&mut self, session: SessionId, target: &DeviceTarget) {
        let cancel = CancellationToken::new();
        let slot = Arc::new(SessionSlot::new());
        self.sessions.insert(session, SessionLink { cancel: cancel.clone(), slot: slot.clone() });

        let adapters = self.adapters.clone();
        let events = self.events.clone();
        let permissions = self.permissions.clone();
        let address = target.address.clone();

        spawn(async move {
            // only resolving is raced against the release, an issued connect request always
            // runs to completion so that its link can be closed again
            let resolved = tokio::select! {
                _ = cancel.cancelled() => return,
                result = resolve_peripheral(&adapters, &address) => result,
            };

            let result = match resolved {
                Ok(peripheral) => {
                    info!("Connecting to peripheral {}...", address);
                    peripheral.connect().await.map(|_| peripheral).map_err(DeviceError::from)
                },
                Err(err) => Err(err),
            };

            let peripheral = match result {
                Ok(peripheral) => peripheral,
                Err(err) => {
                    warn!("Connecting to peripheral failed: {:?}", err);
                    if err.is_permission_denied() {
                        permissions.set(false);
                    }
                    send_transport_event(&events, TransportEvent::ConnectFailed { session, failure: TransportFailure::from(&err) });
                    return;
                },
            };

            if let Err(peripheral) = slot.store(peripheral.clone()) {
                // released while connecting; nobody else will disconnect this peripheral
                if let Err(err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect released peripheral: {:?}", err);
                }
                return;
            }

            send_transport_event(&events, TransportEvent::ConnectionStateChanged { session, state: LinkState::Connected });
            watch_link(cancel, peripheral, session, events).await;
        });
    }

    fn discover_services(&mut self, session: SessionId) {
        let events = self.events.clone();
        let (peripheral, cancel) = match self.link(session) {
            Some(link) => link,
            None => {
                let failure = self.failure(&DeviceError::NotConnected);
                send_transport_event(&events, TransportEvent::DiscoveryFailed { session, failure });
                return;
            },
        };
        let permissions = self.permissions.clone();

        spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = peripheral.discover_services() => result,
            };

            match result {
                Ok(()) => {
                    let services = to_gatt_services(&peripheral);
                    send_transport_event(&events, TransportEvent::ServicesDiscovered { session, services });
                },
                Err(err) => {
                    let err = DeviceError::from(err);
                    if err.is_permission_denied() {
                        permissions.set(false);
                    }
                    send_transport_event(&events, TransportEvent::DiscoveryFailed { session, failure: TransportFailure::from(&err) });
                },
            }
        });
    }

    fn enable_notifications(&mut self, session: SessionId, service: Uuid, characteristic: Uuid) {
        let events = self.events.clone();
        let (peripheral, cancel) = match self.link(session) {
            Some(link) => link,
            None => {
                let failure = self.failure(&DeviceError::NotConnected);
                send_transport_event(&events, TransportEvent::NotificationsFailed { session, failure });
                return;
            },
        };

        let characteristic = match find_characteristic(&peripheral, service, characteristic) {
            Ok(characteristic) => characteristic,
            Err(err) => {
                let failure = self.failure(&err);
                send_transport_event(&events, TransportEvent::NotificationsFailed { session, failure });
                return;
            },
        };
        let permissions = self.permissions.clone();

        spawn(async move {
            if let Err(err) = forward_notifications(cancel, peripheral, characteristic, session, events.clone()).await {
                warn!("Reading notifications failed: {:?}", err);
                if err.is_permission_denied() {
                    permissions.set(false);
                }
                send_transport_event(&events, TransportEvent::NotificationsFailed { session, failure: TransportFailure::from(&err) });
            }
        });
    }

    fn write_descriptor(&mut self, session: SessionId, service: Uuid, characteristic: Uuid, descriptor: Uuid, value: &[u8]) {
        let events = self.events.clone();
        let (peripheral, cancel) = match self.link(session) {
            Some(link) => link,
            None => {
                let failure = self.failure(&DeviceError::NotConnected);
                send_transport_event(&events, TransportEvent::DescriptorWritten { session, descriptor, result: Err(failure) });
                return;
            },
        };
        let permissions = self.permissions.clone();
        let value = value.to_vec();

        spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = write_descriptor(&peripheral, service, characteristic, descriptor, &value) => result,
            };

            let result = result.map_err(|err| {
                if err.is_permission_denied() {
                    permissions.set(false);
                }
                TransportFailure::from(&err)
            });
            send_transport_event(&events, TransportEvent::DescriptorWritten { session, descriptor, result });
        });
    }

    fn release(&mut self, session: SessionId) {
        let link = match self.sessions.remove(&session) {
            Some(link) => link,
            None => {
                debug!("Session {} was already released", session);
                return;
            },
        };

        link.cancel.cancel();
        let peripheral = link.slot.release();
        info!("Released session {}", session);

        if let Some(peripheral) = peripheral {
            spawn(async move {
                if let Err(err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect peripheral: {:?}", err);
                }
            });
        }
    }
}
