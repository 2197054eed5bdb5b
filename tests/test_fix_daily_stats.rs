mod common;
use common::*;
use renogy_bridge::prelude::*;
use renogy_bridge::renogy::fix_daily_stats::{
    DailyStatsStrategy, DontTrustPeriod, FixDailyStatsClient, PassThrough, Strategy,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued samples.
#[derive(Clone, Default)]
struct ScriptedClient {
    samples: Arc<Mutex<VecDeque<RenogyData>>>,
}

#[async_trait]
impl RenogyClient for ScriptedClient {
    async fn get_system_info(&mut self) -> Result<SystemInfo, RenogyError> {
        Ok(sample_data().system_info)
    }

    async fn get_all_data(&mut self, _: Option<&SystemInfo>) -> Result<RenogyData, RenogyError> {
        self.samples
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RenogyError::Timeout("no more samples".to_string()))
    }
}

impl std::fmt::Display for ScriptedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScriptedClient")
    }
}

struct Harness {
    day: Arc<Mutex<NaiveDate>>,
    samples: ScriptedClient,
    client: FixDailyStatsClient<ScriptedClient>,
}

impl Harness {
    fn new() -> Self {
        let day = Arc::new(Mutex::new(NaiveDate::from_ymd_opt(2022, 9, 10).unwrap()));
        let clock = day.clone();
        let samples = ScriptedClient::default();
        let client =
            FixDailyStatsClient::with_clock(samples.clone(), Box::new(move || *clock.lock().unwrap()));
        Self {
            day,
            samples,
            client,
        }
    }

    fn next_day(&self) {
        let mut day = self.day.lock().unwrap();
        *day = day.succ_opt().unwrap();
    }

    /// Polls once with the device reporting `generation_wh` and `battery_voltage`.
    async fn sample(&mut self, generation_wh: u16, battery_voltage: f64) -> DailyStats {
        let mut data = sample_data();
        data.daily_stats.power_generation_wh = generation_wh;
        data.power_status.battery_voltage = battery_voltage;
        self.samples.samples.lock().unwrap().push_back(data);

        self.client.get_all_data(None).await.unwrap().daily_stats
    }

    fn strategy(&self) -> Strategy {
        self.client.strategy().clone()
    }
}

#[tokio::test]
async fn passes_through_during_the_day() {
    let mut harness = Harness::new();

    let stats = harness.sample(100, 25.0).await;
    assert_eq!(stats, DailyStats { power_generation_wh: 100, ..sample_data().daily_stats });

    let stats = harness.sample(150, 25.0).await;
    assert_eq!(stats.power_generation_wh, 150);
    assert_eq!(stats.charging_ah, sample_data().daily_stats.charging_ah);
    assert_eq!(harness.strategy(), Strategy::PassThrough(PassThrough { carry_offset_wh: 0 }));
}

#[tokio::test]
async fn carries_generation_over_the_late_reset() {
    let mut harness = Harness::new();
    harness.sample(500, 25.0).await;

    // midnight; the device still counts yesterday
    harness.next_day();
    let stats = harness.sample(520, 25.0).await;
    assert_eq!(stats.power_generation_wh, 0);
    assert_eq!(stats.charging_ah, 0);
    assert!(matches!(harness.strategy(), Strategy::DontTrustPeriod(_)));

    let stats = harness.sample(600, 25.0).await;
    assert_eq!(stats.power_generation_wh, 80);

    // the device finally zeroes its counters
    let stats = harness.sample(0, 25.0).await;
    assert_eq!(stats.power_generation_wh, 80);
    assert_eq!(harness.strategy(), Strategy::PassThrough(PassThrough { carry_offset_wh: 80 }));

    let stats = harness.sample(10, 25.0).await;
    assert_eq!(stats.power_generation_wh, 90);
    assert_eq!(stats.charging_ah, sample_data().daily_stats.charging_ah);
}

#[tokio::test]
async fn tracks_battery_voltage_while_untrusted() {
    let mut harness = Harness::new();
    harness.sample(500, 25.0).await;
    harness.next_day();

    harness.sample(500, 25.0).await;
    harness.sample(500, 24.1).await;
    let stats = harness.sample(500, 26.3).await;

    assert_eq!(stats.battery_min_voltage, 24.1);
    assert_eq!(stats.battery_max_voltage, 26.3);
    assert_eq!(stats.max_charging_current, sample_data().power_status.charging_current_to_battery);
    assert_eq!(stats.max_charging_power, sample_data().power_status.solar_panel_power);
    // untouched fields come straight from the device
    assert_eq!(stats.power_consumption_wh, sample_data().daily_stats.power_consumption_wh);
}

#[tokio::test]
async fn reset_outside_the_window_carries_nothing() {
    let mut harness = Harness::new();
    harness.sample(300, 25.0).await;

    let stats = harness.sample(5, 25.0).await;

    assert_eq!(stats.power_generation_wh, 5);
    assert_eq!(harness.strategy(), Strategy::PassThrough(PassThrough { carry_offset_wh: 0 }));
}

#[tokio::test]
async fn reset_right_at_midnight_carries_nothing() {
    let mut harness = Harness::new();
    harness.sample(300, 25.0).await;

    // the device reset at midnight sharp
    harness.next_day();
    let stats = harness.sample(0, 25.0).await;

    assert_eq!(stats.power_generation_wh, 0);
    assert_eq!(harness.strategy(), Strategy::PassThrough(PassThrough { carry_offset_wh: 0 }));

    let stats = harness.sample(40, 25.0).await;
    assert_eq!(stats.power_generation_wh, 40);
}

#[tokio::test]
async fn failures_pass_through() {
    let mut harness = Harness::new();
    let err = harness.client.get_all_data(None).await.unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn untrusted_generation_never_goes_negative() {
    let mut data = sample_data();
    data.daily_stats.power_generation_wh = 200;
    let mut period = DontTrustPeriod {
        generation_at_entry_wh: 500,
        ..DontTrustPeriod::new(&data)
    };

    let stats = period.process(&data);
    assert_eq!(stats.power_generation_wh, 0);
    assert_eq!(stats.charging_ah, 0);
}
