use std::env;
use std::path::PathBuf;
use btleplug::platform::Manager;
use clap::Parser;
use futures::StreamExt;
use log::{info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::action::dispatcher::{ActionDispatcher, OpenActionDispatcher, RecordingDispatcher};
use crate::config::io::ConfigIO;
use crate::device::btle::{probe_adapters, BtleTransport};
use crate::device::connection::{event_queue, GattStateMachine};
use crate::device::transport::PermissionFlag;
use crate::device::types::DeviceTarget;
use crate::error::{AppRunError, ConfigError};
use crate::service::BleService;
use crate::status::{ConnectionStatus, StatusPublisher};

pub mod action;
pub mod config;
pub mod device;
pub mod error;
pub mod service;
pub mod status;

#[derive(Parser, Debug)]
#[command(version, about = "Connects to a BLE peripheral and turns its notifications into local actions")]
pub struct Args {
    /// Config file to use instead of the portable or per-user one
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Peripheral address, overrides the config file
    #[arg(long)]
    pub address: Option<String>,

    /// Log received commands instead of launching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // btleplug is very chatty at debug level
        .level_for("btleplug", log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn wait_for_status(status: &StatusPublisher, cancel: &CancellationToken) {
    let mut stream = status.subscribe();
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(value) = stream.next() => {
                info!("Service Status: {}", value);
                match value {
                    ConnectionStatus::PermissionRequired
                    | ConnectionStatus::Disconnected
                    | ConnectionStatus::Error(_) => break 'mainloop,
                    _ => {},
                }
            },
        }
    }
}

async fn run_service<D>(target: DeviceTarget, dispatcher: D) -> Result<(), AppRunError>
    where D: ActionDispatcher + 'static
{
    let manager = Manager::new().await.map_err(|source| AppRunError::DeviceError { source: source.into() })?;
    let permissions = PermissionFlag::new(true);
    let adapters = match probe_adapters(&manager).await {
        Ok(adapters) => adapters,
        Err(err) => {
            warn!("Listing bluetooth adapters failed: {}", err);
            if err.is_permission_denied() {
                permissions.set(false);
            }
            Vec::new()
        },
    };

    let cancel = CancellationToken::new();
    let status = StatusPublisher::new();
    let (events, receiver) = event_queue();
    let transport = BtleTransport::new(adapters, events.clone(), permissions.clone());
    let machine = GattStateMachine::new(transport, permissions, dispatcher, status.clone());
    let service = BleService::spawn(cancel.clone(), machine, events, receiver);

    service.start(target);

    let session_end = CancellationToken::new();
    tokio::select! {
        _ = wait_for_status(&status, &session_end) => {},
        result = signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("Failed to listen for ctrl-c: {}", err);
            }
            info!("Interrupted");
        },
    }
    session_end.cancel();

    service.shutdown().await;
    info!("Final status: {}", status.current());
    Ok(())
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let mut config_io = match &args.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| AppRunError::Runtime { source })?;

    runtime.block_on(async {
        let mut config = config_io.read_or_init().await?;
        if let Some(address) = &args.address {
            config.device.address = address.clone();
        }
        let target = config.device_target();

        if args.dry_run {
            run_service(target, RecordingDispatcher::new()).await
        } else {
            run_service(target, OpenActionDispatcher::new(config.actions)).await
        }
    })
}

pub fn is_already_running(err: &AppRunError) -> bool {
    matches!(err, AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } })
}
