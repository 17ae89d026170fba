//! Vehicle status record and the closed set of actions that can mutate it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The vehicle the demo scripts and the seed row use.
pub const DEFAULT_VEHICLE_ID: &str = "demo-vehicle-01";

/// Charging state as stored in the `charging_status` column.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargingStatus {
    Connected,
    Disconnected,
    Charging,
    /// Any label this build does not know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChargingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChargingStatus::Connected => "CONNECTED",
            ChargingStatus::Disconnected => "DISCONNECTED",
            ChargingStatus::Charging => "CHARGING",
            ChargingStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Status of a single vehicle, one record per `vehicle_id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VehicleStatus {
    pub vehicle_id: String,
    /// State of charge, in percent.
    pub battery_level: u8,
    pub ac_is_on: bool,
    /// Cabin temperature in degrees Celsius.
    pub cabin_temperature: f64,
    pub is_locked: bool,
    pub charging_status: ChargingStatus,
}

impl VehicleStatus {
    /// The deterministic record served whenever no live data is available.
    ///
    /// Every field except `vehicle_id` is fixed so that scripted conversations
    /// play out the same way whether or not the backend is reachable.
    pub fn fallback(vehicle_id: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            battery_level: 68,
            ac_is_on: false,
            cabin_temperature: 22.5,
            is_locked: true,
            charging_status: ChargingStatus::Disconnected,
        }
    }
}

/// A mutation the assistant may request on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleAction {
    /// Turn the air conditioning on (`true`) or off.
    SetAc(bool),
    /// Lock (`true`) or unlock the doors.
    SetLock(bool),
}

impl VehicleAction {
    /// The wire name of this action (`set_ac`, `set_lock`).
    pub fn name(&self) -> &'static str {
        match self {
            VehicleAction::SetAc(_) => "set_ac",
            VehicleAction::SetLock(_) => "set_lock",
        }
    }

    /// The column this action writes and the value written to it.
    pub fn column(&self) -> (&'static str, bool) {
        match *self {
            VehicleAction::SetAc(on) => ("ac_is_on", on),
            VehicleAction::SetLock(locked) => ("is_locked", locked),
        }
    }
}
