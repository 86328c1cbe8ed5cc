use std::sync::{Arc, Mutex};
use log::{info, warn};
use open;
use tokio::spawn;
use tokio::task::spawn_blocking;

use crate::action::interpreter::Command;
use crate::config::types::ActionConfig;
use crate::error::ActionError;

/// Performs the local effect of a recognized `Command`. Fire-and-forget: implementations must
/// not block the caller until the effect completes.
pub trait ActionDispatcher: Send {
    fn dispatch(&self, command: Command);
}

pub async fn launch(target: &str) -> Result<(), ActionError> {
    let target = target.to_string();

    spawn_blocking(move || {
        open::that(&target).map_err(|source| ActionError::Launch { target, source })
    }).await.expect("Failed to join launch task")?;

    Ok(())
}

/// Opens the configured URI or application for each command with the desktop's default
/// handler.
pub struct OpenActionDispatcher {
    actions: ActionConfig,
}

impl OpenActionDispatcher {
    pub fn new(actions: ActionConfig) -> Self {
        OpenActionDispatcher { actions }
    }

    pub fn target(&self, command: Command) -> Result<Option<&str>, ActionError> {
        match command {
            Command::Call => Ok(Some(self.actions.call.as_str())),
            Command::OpenApp => match &self.actions.open_app {
                Some(app) => Ok(Some(app.as_str())),
                None => Err(ActionError::NotConfigured { command: command.name() }),
            },
            Command::Unrecognized => Ok(None),
        }
    }
}

impl ActionDispatcher for OpenActionDispatcher {
    fn dispatch(&self, command: Command) {
        let target = match self.target(command) {
            Ok(Some(target)) => target.to_string(),
            Ok(None) => return,
            Err(err) => {
                warn!("Not dispatching {}: {}", command, err);
                return;
            },
        };

        info!("Dispatching {} to {}", command, target);
        spawn(async move {
            if let Err(err) = launch(&target).await {
                warn!("Failed to dispatch command: {}", err);
            }
        });
    }
}

/// Keeps every dispatched command in memory instead of acting on it. Used by the `--dry-run`
/// flag and by tests.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    commands: Arc<Mutex<Vec<Command>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("Failed to lock RecordingDispatcher commands").clone()
    }
}

impl ActionDispatcher for RecordingDispatcher {
    fn dispatch(&self, command: Command) {
        info!("Received {} (not dispatched)", command);
        self.commands.lock().expect("Failed to lock RecordingDispatcher commands").push(command);
    }
}
