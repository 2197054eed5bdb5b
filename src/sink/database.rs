use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{any::AnyConnectOptions, Any, Pool};
use std::sync::RwLock;

enum DatabaseType {
    MySQL,
    Postgres,
    SQLite,
}

const COLUMNS: [&str; 22] = [
    "DateTime",
    "BatterySOC",
    "BatteryVoltage",
    "ChargingCurrentToBattery",
    "BatteryTemp",
    "ControllerTemp",
    "SolarPanelVoltage",
    "SolarPanelCurrent",
    "SolarPanelPower",
    "Daily_BatteryMinVoltage",
    "Daily_BatteryMaxVoltage",
    "Daily_MaxChargingCurrent",
    "Daily_MaxChargingPower",
    "Daily_ChargingAmpHours",
    "Daily_PowerGeneration",
    "Stats_DaysUp",
    "Stats_BatteryOverDischargeCount",
    "Stats_BatteryFullChargeCount",
    "Stats_TotalChargingBatteryAH",
    "Stats_CumulativePowerGenerationWH",
    "ChargingState",
    "Faults",
];

/// Logs samples into a `log` table of an sqlite, postgres or mysql database. Rows are keyed
/// by the sample time in unix seconds; a second sample within the same second overwrites the
/// first.
pub struct DatabaseSink {
    config: config::Database,
    pool: RwLock<Option<Pool<Any>>>,
}

impl DatabaseSink {
    pub fn new(config: config::Database) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    fn database(&self) -> Result<DatabaseType> {
        let prefix: Vec<&str> = self.config.url().splitn(2, ':').collect();
        match prefix[0] {
            "sqlite" => Ok(DatabaseType::SQLite),
            "mysql" => Ok(DatabaseType::MySQL),
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            _ => Err(anyhow!("unsupported database {}", self.config.url())),
        }
    }

    async fn connect(&self) -> Result<()> {
        sqlx::any::install_default_drivers();

        let options = AnyConnectOptions::from_str(self.config.url())?;
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(2)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;
        *self
            .pool
            .write()
            .map_err(|_| anyhow!("failed to acquire write lock"))? = Some(pool);
        Ok(())
    }

    pub fn connection(&self) -> Result<Pool<Any>> {
        match &*self
            .pool
            .read()
            .map_err(|_| anyhow!("failed to acquire read lock"))?
        {
            Some(pool) => Ok(pool.clone()),
            None => Err(anyhow!("{} not connected", self)),
        }
    }

    fn create_table() -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS log ({} bigint primary key not null, {}, ChargingState smallint, Faults text)",
            COLUMNS[0],
            COLUMNS[1..20]
                .iter()
                .map(|c| {
                    let kind = if Self::is_real(c) { "double precision" } else { "bigint" };
                    format!("{} {} not null", c, kind)
                })
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn is_real(column: &str) -> bool {
        column.ends_with("Voltage") || column.ends_with("Current") || column.ends_with("CurrentToBattery")
    }

    fn placeholders(&self) -> Result<Vec<String>> {
        Ok(match self.database()? {
            DatabaseType::MySQL => COLUMNS.iter().map(|_| "?".to_string()).collect(),
            _ => (1..=COLUMNS.len()).map(|i| format!("${}", i)).collect(),
        })
    }

    fn insert_query(&self) -> Result<String> {
        let updates = match self.database()? {
            DatabaseType::MySQL => format!(
                "ON DUPLICATE KEY UPDATE {}",
                COLUMNS[1..]
                    .iter()
                    .map(|c| format!("{} = VALUES({})", c, c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => format!(
                "ON CONFLICT (DateTime) DO UPDATE SET {}",
                COLUMNS[1..]
                    .iter()
                    .map(|c| format!("{} = excluded.{}", c, c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };

        Ok(format!(
            "INSERT INTO log ({}) VALUES ({}) {}",
            COLUMNS.join(", "),
            self.placeholders()?.join(", "),
            updates
        ))
    }

    fn delete_query(&self) -> Result<&'static str> {
        Ok(match self.database()? {
            DatabaseType::MySQL => "DELETE FROM log WHERE DateTime <= ?",
            _ => "DELETE FROM log WHERE DateTime <= $1",
        })
    }
}

#[async_trait]
impl Sink for DatabaseSink {
    async fn init(&self) -> Result<()> {
        info!("initializing database {}", self);
        self.connect().await?;

        let pool = self.connection()?;
        sqlx::query(&Self::create_table()).execute(&pool).await?;

        Ok(())
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        let pool = self.connection()?;
        let query = self.insert_query()?;

        let power = &data.power_status;
        let daily = &data.daily_stats;
        let stats = &data.historical_data;

        sqlx::query(&query)
            .bind(sampled_at.timestamp())
            .bind(power.battery_soc as i64)
            .bind(power.battery_voltage)
            .bind(power.charging_current_to_battery)
            .bind(power.battery_temp as i64)
            .bind(power.controller_temp as i64)
            .bind(power.solar_panel_voltage)
            .bind(power.solar_panel_current)
            .bind(power.solar_panel_power as i64)
            .bind(daily.battery_min_voltage)
            .bind(daily.battery_max_voltage)
            .bind(daily.max_charging_current)
            .bind(daily.max_charging_power as i64)
            .bind(daily.charging_ah as i64)
            .bind(daily.power_generation_wh as i64)
            .bind(stats.days_up as i64)
            .bind(stats.battery_over_discharge_count as i64)
            .bind(stats.battery_full_charge_count as i64)
            .bind(stats.total_charging_battery_ah as i64)
            .bind(stats.cumulative_power_generation_wh as i64)
            .bind(data.status.charging_state.value() as i64)
            .bind(data.status.faults_string())
            .execute(&pool)
            .await?;

        Ok(())
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        let pool = self.connection()?;
        let older_than = Utils::utc().timestamp() - days as i64 * 86400;
        debug!("deleting records with DateTime <= {}", older_than);

        let result = sqlx::query(self.delete_query()?)
            .bind(older_than)
            .execute(&pool)
            .await?;
        info!("deleted {} records from {}", result.rows_affected(), self);

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let pool = self
            .pool
            .write()
            .map_err(|_| anyhow!("failed to acquire write lock"))?
            .take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }

    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        sink::is_recoverable(err)
            || err
                .chain()
                .any(|cause| matches!(cause.downcast_ref::<sqlx::Error>(), Some(sqlx::Error::PoolTimedOut)))
    }
}

impl std::fmt::Display for DatabaseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // strip credentials
        let url = match url::Url::parse(self.config.url()) {
            Ok(mut url) => {
                let _ = url.set_password(None);
                url.to_string()
            }
            Err(_) => self.config.url().to_string(),
        };
        write!(f, "DatabaseSink({})", url)
    }
}
