//! The device resets its daily counters not at midnight but at some arbitrary time during the
//! day (9:17am on one unit). Between midnight and that reset the daily values still belong to
//! yesterday, so we compute them ourselves and carry the generation over once the device
//! finally zeroes them.

use crate::prelude::*;

use async_trait::async_trait;
use chrono::NaiveDate;
use enum_dispatch::*;

#[enum_dispatch]
pub trait DailyStatsStrategy {
    /// Returns the corrected daily stats for `data`.
    fn process(&mut self, data: &RenogyData) -> DailyStats;
}

/// Outside the untrusted window: the device values are fine, except the generation which needs
/// whatever was produced during the window added back.
#[derive(Clone, Debug, PartialEq)]
pub struct PassThrough {
    pub carry_offset_wh: u16,
}

impl DailyStatsStrategy for PassThrough {
    fn process(&mut self, data: &RenogyData) -> DailyStats {
        let mut stats = data.daily_stats.clone();
        stats.power_generation_wh = stats
            .power_generation_wh
            .saturating_add(self.carry_offset_wh);
        stats
    }
}

/// From midnight until the device performs its own reset.
#[derive(Clone, Debug, PartialEq)]
pub struct DontTrustPeriod {
    /// The device's daily generation when the period began.
    pub generation_at_entry_wh: u16,
    pub battery_min_voltage: f64,
    pub battery_max_voltage: f64,
    pub max_charging_current: f64,
    pub max_charging_power: u16,
}

impl DontTrustPeriod {
    pub fn new(entry: &RenogyData) -> Self {
        let power = &entry.power_status;
        Self {
            generation_at_entry_wh: entry.daily_stats.power_generation_wh,
            battery_min_voltage: power.battery_voltage,
            battery_max_voltage: power.battery_voltage,
            max_charging_current: power.charging_current_to_battery,
            max_charging_power: power.solar_panel_power,
        }
    }

    fn update(&mut self, power: &PowerStatus) {
        self.battery_min_voltage = self.battery_min_voltage.min(power.battery_voltage);
        self.battery_max_voltage = self.battery_max_voltage.max(power.battery_voltage);
        self.max_charging_current = self
            .max_charging_current
            .max(power.charging_current_to_battery);
        self.max_charging_power = self.max_charging_power.max(power.solar_panel_power);
    }
}

impl DailyStatsStrategy for DontTrustPeriod {
    fn process(&mut self, data: &RenogyData) -> DailyStats {
        self.update(&data.power_status);

        DailyStats {
            battery_min_voltage: self.battery_min_voltage,
            battery_max_voltage: self.battery_max_voltage,
            max_charging_current: self.max_charging_current,
            max_charging_power: self.max_charging_power,
            charging_ah: 0,
            power_generation_wh: data
                .daily_stats
                .power_generation_wh
                .saturating_sub(self.generation_at_entry_wh),
            ..data.daily_stats.clone()
        }
    }
}

#[enum_dispatch(DailyStatsStrategy)]
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    PassThrough(PassThrough),
    DontTrustPeriod(DontTrustPeriod),
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::PassThrough(s) => write!(f, "PassThrough(carry_offset_wh={})", s.carry_offset_wh),
            Strategy::DontTrustPeriod(s) => write!(
                f,
                "DontTrustPeriod(generation_at_entry_wh={})",
                s.generation_at_entry_wh
            ),
        }
    }
}

pub type Today = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct FixDailyStatsClient<C: RenogyClient> {
    delegate: C,
    strategy: Strategy,
    prev_generation_wh: Option<u16>,
    last_sampled_day: NaiveDate,
    today: Today,
}

impl<C: RenogyClient> FixDailyStatsClient<C> {
    pub fn new(delegate: C) -> Self {
        Self::with_clock(delegate, Box::new(|| chrono::Local::now().date_naive()))
    }

    /// `today` supplies the local calendar day; tests pass a fake clock.
    pub fn with_clock(delegate: C, today: Today) -> Self {
        let strategy = Strategy::PassThrough(PassThrough { carry_offset_wh: 0 });
        info!("starting with daily stats {}", strategy);
        let last_sampled_day = today();

        Self {
            delegate,
            strategy,
            prev_generation_wh: None,
            last_sampled_day,
            today,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn delegate(&self) -> &C {
        &self.delegate
    }

    fn fix(&mut self, mut data: RenogyData) -> RenogyData {
        let device_generation = data.daily_stats.power_generation_wh;

        let today = (self.today)();
        let crossed_midnight = self.last_sampled_day != today;
        if crossed_midnight {
            let last = self.last_sampled_day;
            self.last_sampled_day = today;
            self.strategy = Strategy::DontTrustPeriod(DontTrustPeriod::new(&data));
            info!(
                "midnight (last data sampled {}, now {}): activating {}",
                last, today, self.strategy
            );
        }

        if let Some(prev) = self.prev_generation_wh {
            if prev > device_generation {
                let carry_offset_wh = match &self.strategy {
                    Strategy::DontTrustPeriod(period) if !crossed_midnight => {
                        prev.saturating_sub(period.generation_at_entry_wh)
                    }
                    Strategy::DontTrustPeriod(_) => 0,
                    Strategy::PassThrough(_) => {
                        info!("device reset its daily stats outside of a DontTrustPeriod");
                        0
                    }
                };
                self.strategy = Strategy::PassThrough(PassThrough { carry_offset_wh });
                info!(
                    "device reset its daily stats (generation prev={} now={}): {}",
                    prev, device_generation, self.strategy
                );
            }
        }
        self.prev_generation_wh = Some(device_generation);

        data.daily_stats = self.strategy.process(&data);
        data
    }
}

#[async_trait]
impl<C: RenogyClient> RenogyClient for FixDailyStatsClient<C> {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError> {
        self.delegate.get_system_info().await
    }

    async fn get_all_data(
        &mut self,
        cached_system_info: Option<&SystemInfo>,
    ) -> Result<RenogyData, RenogyError> {
        let data = self.delegate.get_all_data(cached_system_info).await?;
        Ok(self.fix(data))
    }

    async fn close(&mut self) {
        self.delegate.close().await
    }
}

impl<C: RenogyClient> std::fmt::Display for FixDailyStatsClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixDailyStatsClient({})", self.delegate)
    }
}
