use crate::prelude::*;

use nom_derive::{Nom, Parse};
use num_enum::TryFromPrimitive;
use serde::Serialize;
use std::collections::BTreeSet;
use std::convert::TryFrom;

fn nom_failure(what: &str, err: nom::Err<nom::error::Error<&[u8]>>) -> RenogyError {
    RenogyError::Protocol(format!("failed to decode {}: {:?}", what, err))
}

// SystemInfo {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum ProductType {
    Controller = 0,
    Inverter = 1,
}

/// Static system information; fetched once per session and then cached.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    /// 12/24/36/48/96 V, 0xFF means automatic recognition of system voltage.
    pub max_voltage: u8,
    pub rated_charging_current: u8,
    pub rated_discharging_current: u8,
    pub product_type: Option<ProductType>,
    pub product_model: String,
    pub software_version: String,
    pub hardware_version: String,
    /// 4 bytes as hex, e.g. `1501ffff`: the 65535th unit produced in Jan. 2015.
    pub serial_number: String,
}

impl SystemInfo {
    /// Builds the record out of the raw reads at 0x0A (4 bytes), 0x0C (16 bytes),
    /// 0x14 (8 bytes) and 0x18 (4 bytes).
    pub fn decode(
        ratings: &[u8],
        model: &[u8],
        versions: &[u8],
        serial: &[u8],
    ) -> Result<Self, RenogyError> {
        if ratings.len() < 4 || versions.len() < 8 || serial.len() < 4 {
            return Err(RenogyError::Protocol(format!(
                "SystemInfo::decode short input: ratings={} versions={} serial={}",
                ratings.len(),
                versions.len(),
                serial.len()
            )));
        }

        Ok(Self {
            max_voltage: ratings[0],
            rated_charging_current: ratings[1],
            rated_discharging_current: ratings[2],
            product_type: ProductType::try_from(ratings[3]).ok(),
            product_model: Utils::ascii_string(model).trim().to_string(),
            software_version: format!("V{}.{}.{}", versions[1], versions[2], versions[3]),
            hardware_version: format!("V{}.{}.{}", versions[5], versions[6], versions[7]),
            serial_number: Utils::to_hex(&serial[0..4]),
        })
    }
} // }}}

// PowerStatus {{{
/// Current state of the battery, load and panels; register 0x100, 20 bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Nom)]
#[nom(BigEndian)]
#[serde(rename_all = "camelCase")]
pub struct PowerStatus {
    /// 0..100 %
    #[serde(rename = "batterySOC")]
    pub battery_soc: u16,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub battery_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub charging_current_to_battery: f64,
    pub controller_temp: i8,
    pub battery_temp: i8,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub load_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub load_current: f64,
    pub load_power: u16,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub solar_panel_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub solar_panel_current: f64,
    pub solar_panel_power: u16,
}

impl PowerStatus {
    pub fn decode(data: &[u8]) -> Result<Self, RenogyError> {
        Self::parse(data)
            .map(|(_, r)| r)
            .map_err(|err| nom_failure("PowerStatus", err))
    }
} // }}}

// DailyStats {{{
/// Statistics of the current day as kept by the device; register 0x10B, 20 bytes.
///
/// The device zeroes these at an arbitrary time of day rather than at midnight, see
/// [`crate::renogy::fix_daily_stats`].
#[derive(Clone, Debug, PartialEq, Serialize, Nom)]
#[nom(BigEndian)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    #[nom(Parse = "Utils::be_u16_div10")]
    pub battery_min_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub battery_max_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub max_charging_current: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub max_discharging_current: f64,
    pub max_charging_power: u16,
    pub max_discharging_power: u16,
    pub charging_ah: u16,
    pub discharging_ah: u16,
    // the manual says kWh/10000 but the values only make sense as Wh
    pub power_generation_wh: u16,
    pub power_consumption_wh: u16,
}

impl DailyStats {
    pub fn decode(data: &[u8]) -> Result<Self, RenogyError> {
        Self::parse(data)
            .map(|(_, r)| r)
            .map_err(|err| nom_failure("DailyStats", err))
    }
} // }}}

// HistoricalData {{{
#[derive(Clone, Debug, PartialEq, Serialize, Nom)]
#[nom(BigEndian)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalData {
    pub days_up: u16,
    pub battery_over_discharge_count: u16,
    pub battery_full_charge_count: u16,
    #[serde(rename = "totalChargingBatteryAH")]
    pub total_charging_battery_ah: u32,
    #[serde(rename = "totalDischargingBatteryAH")]
    pub total_discharging_battery_ah: u32,
    #[serde(rename = "cumulativePowerGenerationWH")]
    pub cumulative_power_generation_wh: u32,
    #[serde(rename = "cumulativePowerConsumptionWH")]
    pub cumulative_power_consumption_wh: u32,
}

impl HistoricalData {
    pub fn decode(data: &[u8]) -> Result<Self, RenogyError> {
        Self::parse(data)
            .map(|(_, r)| r)
            .map_err(|err| nom_failure("HistoricalData", err))
    }
} // }}}

// RenogyStatus {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChargingState {
    /// No current/voltage from the panels: night, or the array is disconnected.
    Deactivated,
    Activated,
    /// Bulk charging, constant current.
    MpptCharging,
    Equalizing,
    /// Constant voltage stage, by default held for 2 hours.
    Boost,
    Floating,
    /// Overpower.
    CurrentLimiting,
    Unknown(u8),
}

impl ChargingState {
    pub fn from_modbus(value: u8) -> Self {
        use ChargingState::*;
        match value {
            0 => Deactivated,
            1 => Activated,
            2 => MpptCharging,
            3 => Equalizing,
            4 => Boost,
            5 => Floating,
            6 => CurrentLimiting,
            other => Unknown(other),
        }
    }

    pub fn value(self) -> u8 {
        use ChargingState::*;
        match self {
            Deactivated => 0,
            Activated => 1,
            MpptCharging => 2,
            Equalizing => 3,
            Boost => 4,
            Floating => 5,
            CurrentLimiting => 6,
            Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for ChargingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargingState::Unknown(_) => write!(f, "Unknown"),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Controller faults; the discriminant is the bit in the 32-bit fault word.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TryFromPrimitive,
)]
#[repr(u8)]
pub enum ControllerFault {
    BatteryOverDischarge = 16,
    BatteryOverVoltage = 17,
    BatteryUnderVoltageWarning = 18,
    LoadShortCircuit = 19,
    LoadOverpowerOrLoadOverCurrent = 20,
    ControllerTemperatureTooHigh = 21,
    AmbientTemperatureTooHigh = 22,
    PhotovoltaicInputOverpower = 23,
    PhotovoltaicInputSideShortCircuit = 24,
    PhotovoltaicInputSideOverVoltage = 25,
    SolarPanelCounterCurrent = 26,
    SolarPanelWorkingPointOverVoltage = 27,
    SolarPanelReverselyConnected = 28,
    AntiReverseMosShort = 29,
    ChargeMosShortCircuit = 30,
}

impl ControllerFault {
    pub fn from_modbus(word: u32) -> BTreeSet<Self> {
        (16u8..=30)
            .filter(|bit| word & (1u32 << bit) != 0)
            .filter_map(|bit| Self::try_from(bit).ok())
            .collect()
    }

    pub fn bit(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenogyStatus {
    pub street_light_on: bool,
    /// 0..100 %
    pub street_light_brightness: u8,
    pub charging_state: ChargingState,
    /// Empty if there are no faults.
    pub faults: BTreeSet<ControllerFault>,
}

impl RenogyStatus {
    /// Register 0x120, 6 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, RenogyError> {
        if data.len() < 6 {
            return Err(RenogyError::Protocol(format!(
                "RenogyStatus::decode expected 6 bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            street_light_on: data[0] & 0x80 != 0,
            street_light_brightness: data[0] & 0x7f,
            charging_state: ChargingState::from_modbus(data[1]),
            faults: ControllerFault::from_modbus(Utils::u32ify(data, 2)),
        })
    }

    /// Fault names joined with commas; `None` when there are no faults.
    pub fn faults_string(&self) -> Option<String> {
        if self.faults.is_empty() {
            None
        } else {
            Some(
                self.faults
                    .iter()
                    .map(|f| format!("{:?}", f))
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }
} // }}}

/// One complete sample; this is what the sinks get.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenogyData {
    pub system_info: SystemInfo,
    pub power_status: PowerStatus,
    pub daily_stats: DailyStats,
    pub historical_data: HistoricalData,
    pub status: RenogyStatus,
}

impl RenogyData {
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}
