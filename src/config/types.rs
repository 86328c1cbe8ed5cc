use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{make_command_characteristic_uuid, make_command_service_uuid, PERIPHERAL_ADDRESS};
use crate::device::types::DeviceTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub address: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            address: PERIPHERAL_ADDRESS.to_string(),
            service_uuid: make_command_service_uuid(),
            characteristic_uuid: make_command_characteristic_uuid(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    /// URI opened for the "tel" command. The default opens the system dialer.
    pub call: String,
    /// Application, file or URI opened for the "msg" command.
    #[serde(default)]
    pub open_app: Option<String>,
}

impl Default for ActionConfig {
    fn default() -> Self {
        ActionConfig {
            call: "tel:".to_string(),
            open_app: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub actions: ActionConfig,
}

impl Config {
    /// The address is only trimmed here. A malformed one is reported by the connection
    /// state machine as a failed connection.
    pub fn device_target(&self) -> DeviceTarget {
        DeviceTarget {
            address: self.device.address.trim().to_string(),
            service_id: self.device.service_uuid,
            characteristic_id: self.device.characteristic_uuid,
        }
    }
}
