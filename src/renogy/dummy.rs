use crate::prelude::*;

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::time::Instant;

/// Fakes a controller so the rest of the pipeline can run without hardware (`device: dummy`).
///
/// Panel power swings slowly between 0 and ~250 W; daily and cumulative generation grow from
/// that power over the real time elapsed between polls.
pub struct DummyRenogyClient {
    started: Instant,
    last_sampled: Instant,
    samples: u64,
    generation_wh: f64,
    cumulative_wh: f64,
}

impl DummyRenogyClient {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_sampled: now,
            samples: 0,
            generation_wh: 0.0,
            cumulative_wh: 2000.0,
        }
    }

    pub fn system_info() -> SystemInfo {
        SystemInfo {
            max_voltage: 24,
            rated_charging_current: 40,
            rated_discharging_current: 40,
            product_type: Some(ProductType::Controller),
            product_model: "RENOGY ROVER".to_string(),
            software_version: "V1.2.3".to_string(),
            hardware_version: "V4.5.6".to_string(),
            serial_number: "1501ffff".to_string(),
        }
    }

    fn power_status(&self) -> PowerStatus {
        // one full swing every ten minutes
        let phase = self.started.elapsed().as_secs_f64() / 600.0 * std::f64::consts::TAU;
        let swing = (phase.sin() + 1.0) / 2.0;

        let solar_panel_voltage = Utils::round(17.0 + swing * 3.5, 1);
        let solar_panel_current = Utils::round(swing * 12.5, 2);
        let solar_panel_power = (solar_panel_voltage * solar_panel_current) as u16;
        let battery_voltage = Utils::round(12.4 + swing * 1.8, 1);

        PowerStatus {
            battery_soc: (60.0 + swing * 40.0) as u16,
            battery_voltage,
            charging_current_to_battery: Utils::round(solar_panel_power as f64 / battery_voltage, 2),
            controller_temp: 23,
            battery_temp: 21,
            load_voltage: 0.0,
            load_current: 0.0,
            load_power: 0,
            solar_panel_voltage,
            solar_panel_current,
            solar_panel_power,
        }
    }
}

impl Default for DummyRenogyClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenogyClient for DummyRenogyClient {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError> {
        Ok(Self::system_info())
    }

    async fn get_all_data(
        &mut self,
        cached_system_info: Option<&SystemInfo>,
    ) -> Result<RenogyData, RenogyError> {
        let power_status = self.power_status();

        let now = Instant::now();
        let hours = now.duration_since(self.last_sampled).as_secs_f64() / 3600.0;
        self.last_sampled = now;
        self.samples += 1;
        self.generation_wh += power_status.solar_panel_power as f64 * hours;
        self.cumulative_wh += power_status.solar_panel_power as f64 * hours;

        let daily_stats = DailyStats {
            battery_min_voltage: 12.4,
            battery_max_voltage: power_status.battery_voltage.max(12.4),
            max_charging_current: power_status.charging_current_to_battery,
            max_discharging_current: 0.0,
            max_charging_power: power_status.solar_panel_power,
            max_discharging_power: 0,
            charging_ah: (self.generation_wh / 12.4) as u16,
            discharging_ah: 0,
            power_generation_wh: self.generation_wh as u16,
            power_consumption_wh: 0,
        };

        let historical_data = HistoricalData {
            days_up: 20 + (self.started.elapsed().as_secs() / 86400) as u16,
            battery_over_discharge_count: 1,
            battery_full_charge_count: 20,
            total_charging_battery_ah: (self.cumulative_wh / 12.4) as u32,
            total_discharging_battery_ah: 0,
            cumulative_power_generation_wh: self.cumulative_wh as u32,
            cumulative_power_consumption_wh: 0,
        };

        let charging_state = if power_status.solar_panel_power == 0 {
            ChargingState::Deactivated
        } else {
            ChargingState::MpptCharging
        };

        trace!("dummy sample #{}", self.samples);

        Ok(RenogyData {
            system_info: cached_system_info
                .cloned()
                .unwrap_or_else(Self::system_info),
            power_status,
            daily_stats,
            historical_data,
            status: RenogyStatus {
                street_light_on: false,
                street_light_brightness: 0,
                charging_state,
                faults: BTreeSet::new(),
            },
        })
    }
}

impl std::fmt::Display for DummyRenogyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DummyRenogyClient")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn generation_grows_over_time() -> Result<()> {
        let mut client = DummyRenogyClient::new();
        let first = client.get_all_data(None).await?;
        assert_eq!(first.system_info, DummyRenogyClient::system_info());
        assert_eq!(first.daily_stats.power_generation_wh, 0);

        tokio::time::advance(Duration::from_secs(3600)).await;
        let second = client.get_all_data(None).await?;
        assert!(second.daily_stats.power_generation_wh > 0);
        assert!(
            second.historical_data.cumulative_power_generation_wh
                > first.historical_data.cumulative_power_generation_wh
        );
        Ok(())
    }
}
