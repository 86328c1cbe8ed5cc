use clap::Parser;
use log::{error, info};
use ble_command_bridge::{init_logging, is_already_running, run, Args};
use ble_command_bridge::error::AppRunError;

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!(concat!("BLE Command Bridge ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(err) if is_already_running(&err) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
