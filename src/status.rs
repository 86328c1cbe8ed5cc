use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    PermissionDenied,
    ConnectionFailed,
    ServiceNotFound,
    DescriptorWriteFailed,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ErrorReason::PermissionDenied => "Permission Denied",
            ErrorReason::ConnectionFailed => "Connection Failed",
            ErrorReason::ServiceNotFound => "Service Not Found",
            ErrorReason::DescriptorWriteFailed => "Descriptor Write Failed",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Inactive,
    PermissionRequired,
    Connecting,
    Connected,
    ServicesDiscovered,
    NotificationsEnabled,
    Disconnected,
    Error(ErrorReason),
}

// The published string is what the surrounding application shows to the user
impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Inactive => write!(f, "Inactive"),
            ConnectionStatus::PermissionRequired => write!(f, "Permission Required"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::ServicesDiscovered => write!(f, "Services Discovered"),
            ConnectionStatus::NotificationsEnabled => write!(f, "Notifications Enabled"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

pub type StatusStream = UnboundedReceiver<ConnectionStatus>;

enum Observer {
    Callback(Box<dyn FnMut(ConnectionStatus) + Send>),
    Stream(UnboundedSender<ConnectionStatus>),
}

impl Observer {
    // returns false if the observer has gone away
    fn notify(&mut self, status: ConnectionStatus) -> bool {
        match self {
            Observer::Callback(callback) => {
                callback(status);
                true
            },
            Observer::Stream(sender) => sender.unbounded_send(status).is_ok(),
        }
    }
}

struct StatusInner {
    current: ConnectionStatus,
    observers: Vec<Observer>,
}

/// Holds the current `ConnectionStatus` and fans every change out to the registered
/// observers. Cloning yields another handle to the same status.
///
/// Observers are notified while the status lock is held, so every observer sees publishes in
/// the same order. An observer must not call back into the publisher. An observer that panics
/// unwinds through the publishing call; the status itself stays usable afterwards.
#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<Mutex<StatusInner>>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        StatusPublisher {
            inner: Arc::new(Mutex::new(StatusInner {
                current: ConnectionStatus::Inactive,
                observers: Vec::new(),
            })),
        }
    }

    // a poisoned lock only means an observer panicked, the status and observer list are intact
    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> ConnectionStatus {
        let inner = self.lock();
        inner.current
    }

    pub fn publish(&self, status: ConnectionStatus) {
        let mut inner = self.lock();
        debug!("Publishing status {}", status);
        inner.current = status;
        inner.observers.retain_mut(|observer| observer.notify(status));
    }

    /// Puts the status back to `Inactive`, notifying observers like any other publish.
    pub fn reset(&self) {
        self.publish(ConnectionStatus::Inactive);
    }

    /// Registers a callback. It is invoked right away with the current status, then once per
    /// publish, on the publishing thread.
    pub fn observe<F>(&self, callback: F)
        where F: FnMut(ConnectionStatus) + Send + 'static
    {
        let mut inner = self.lock();
        let mut observer = Observer::Callback(Box::new(callback));
        observer.notify(inner.current);
        inner.observers.push(observer);
    }

    /// Returns a stream that yields the current status first, then every later publish.
    pub fn subscribe(&self) -> StatusStream {
        let mut inner = self.lock();
        let (tx, rx) = unbounded::<ConnectionStatus>();
        let mut observer = Observer::Stream(tx);
        observer.notify(inner.current);
        inner.observers.push(observer);
        rx
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
