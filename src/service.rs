use futures::StreamExt;
use log::info;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::action::dispatcher::ActionDispatcher;
use crate::device::connection::{send_event, EventReceiver, EventSender, GattStateMachine};
use crate::device::transport::{GattTransport, PermissionGate};
use crate::device::types::{DeviceTarget, MachineEvent};
use crate::status::{StatusPublisher, StatusStream};

fn run_machine<T, P, D>(
    cancel: CancellationToken,
    mut machine: GattStateMachine<T, P, D>,
    mut receiver: EventReceiver,
) -> JoinHandle<()>
    where T: GattTransport + 'static, P: PermissionGate + 'static, D: ActionDispatcher + 'static
{
    return spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = receiver.next() => match event {
                    Some(event) => machine.handle(event),
                    None => break 'mainloop,
                },
            }
        }

        // whatever is still queued has been requested before the stop
        while let Ok(Some(event)) = receiver.try_next() {
            machine.handle(event);
        }

        machine.teardown();
        info!("State machine task stopped");
    });
}

/// The entry point of the host: owns the event queue and the task that runs the
/// `GattStateMachine`.
pub struct BleService {
    events: EventSender,
    status: StatusPublisher,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BleService {
    /// Spawns the state machine task. `events` must be the sender half of `receiver`; the
    /// transport inside `machine` is expected to hold a clone of it as well.
    pub fn spawn<T, P, D>(
        cancel: CancellationToken,
        machine: GattStateMachine<T, P, D>,
        events: EventSender,
        receiver: EventReceiver,
    ) -> Self
        where T: GattTransport + 'static, P: PermissionGate + 'static, D: ActionDispatcher + 'static
    {
        let status = machine.status().clone();
        let handle = run_machine(cancel.clone(), machine, receiver);

        BleService { events, status, cancel, handle }
    }

    /// Requests a connection to `target`. Ignored if a session is already live.
    pub fn start(&self, target: DeviceTarget) {
        send_event(&self.events, MachineEvent::Start(target));
    }

    pub fn teardown(&self) {
        send_event(&self.events, MachineEvent::Teardown);
    }

    pub fn status(&self) -> &StatusPublisher {
        &self.status
    }

    pub fn subscribe(&self) -> StatusStream {
        self.status.subscribe()
    }

    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Stops the state machine task after the events already queued, tearing down the live
    /// session.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.await.expect("Failed to join state machine task");
    }
}
