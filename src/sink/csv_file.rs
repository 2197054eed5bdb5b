use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub const HEADER: [&str; 22] = [
    "DateTime",
    "BatterySOC",
    "BatteryVoltage",
    "ChargingCurrentToBattery",
    "BatteryTemp",
    "ControllerTemp",
    "SolarPanelVoltage",
    "SolarPanelCurrent",
    "SolarPanelPower",
    "Daily.BatteryMinVoltage",
    "Daily.BatteryMaxVoltage",
    "Daily.MaxChargingCurrent",
    "Daily.MaxChargingPower",
    "Daily.ChargingAmpHours",
    "Daily.PowerGeneration",
    "Stats.DaysUp",
    "Stats.BatteryOverDischargeCount",
    "Stats.BatteryFullChargeCount",
    "Stats.TotalChargingBatteryAH",
    "Stats.CumulativePowerGenerationWH",
    "ChargingState",
    "Faults",
];

fn timestamp(sampled_at: DateTime<Utc>, utc: bool) -> String {
    if utc {
        sampled_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    } else {
        sampled_at
            .with_timezone(&Local)
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string()
    }
}

pub fn row(data: &RenogyData, sampled_at: DateTime<Utc>, utc: bool) -> Vec<String> {
    let power = &data.power_status;
    let daily = &data.daily_stats;
    let stats = &data.historical_data;

    vec![
        timestamp(sampled_at, utc),
        power.battery_soc.to_string(),
        power.battery_voltage.to_string(),
        power.charging_current_to_battery.to_string(),
        power.battery_temp.to_string(),
        power.controller_temp.to_string(),
        power.solar_panel_voltage.to_string(),
        power.solar_panel_current.to_string(),
        power.solar_panel_power.to_string(),
        daily.battery_min_voltage.to_string(),
        daily.battery_max_voltage.to_string(),
        daily.max_charging_current.to_string(),
        daily.max_charging_power.to_string(),
        daily.charging_ah.to_string(),
        daily.power_generation_wh.to_string(),
        stats.days_up.to_string(),
        stats.battery_over_discharge_count.to_string(),
        stats.battery_full_charge_count.to_string(),
        stats.total_charging_battery_ah.to_string(),
        stats.cumulative_power_generation_wh.to_string(),
        data.status.charging_state.to_string(),
        data.status.faults_string().unwrap_or_default(),
    ]
}

fn writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(out)
}

// CsvSink {{{
/// Appends rows to a CSV file; the header is written only when the file is created.
pub struct CsvSink {
    path: PathBuf,
    utc: bool,
    writer: Mutex<Option<csv::Writer<std::fs::File>>>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, utc: bool) -> Self {
        Self {
            path: path.into(),
            utc,
            writer: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn init(&self) -> Result<()> {
        let exists = self.path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| anyhow!("failed to open {}: {}", self.path.display(), err))?;

        let mut csv = writer(file);
        if !exists {
            debug!("creating {}", self.path.display());
            csv.write_record(HEADER)?;
            csv.flush()?;
        }

        *self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))? = Some(csv);
        Ok(())
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))?;
        let Some(csv) = guard.as_mut() else {
            bail!("{} not initialized", self);
        };

        csv.write_record(row(data, sampled_at, self.utc))?;
        csv.flush()?;
        Ok(())
    }

    async fn delete_records_older_than(&self, _days: u32) -> Result<()> {
        // rewriting a large CSV file is too slow to be worth it
        info!("record cleanup not implemented for CSV");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))?;
        if let Some(mut csv) = guard.take() {
            csv.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Display for CsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CsvSink({}, utc={})", self.path.display(), self.utc)
    }
} // }}}

// StdoutCsvSink {{{
/// Prints rows to stdout; header at `init`.
pub struct StdoutCsvSink {
    utc: bool,
    writer: Mutex<csv::Writer<Box<dyn Write + Send>>>,
}

impl StdoutCsvSink {
    pub fn new(utc: bool) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), utc)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, utc: bool) -> Self {
        Self {
            utc,
            writer: Mutex::new(writer(out)),
        }
    }

    fn write(&self, record: Vec<String>) -> Result<()> {
        let mut csv = self
            .writer
            .lock()
            .map_err(|_| anyhow!("stdout writer lock poisoned"))?;
        csv.write_record(record)?;
        csv.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Sink for StdoutCsvSink {
    async fn init(&self) -> Result<()> {
        self.write(HEADER.iter().map(|h| h.to_string()).collect())
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        self.write(row(data, sampled_at, self.utc))
    }

    async fn delete_records_older_than(&self, _days: u32) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Display for StdoutCsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StdoutCsvSink(utc={})", self.utc)
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn utc_timestamps() {
        let at = Utc.with_ymd_and_hms(2023, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(timestamp(at, true), "2023-03-01T10:15:00.000Z");
    }
}
