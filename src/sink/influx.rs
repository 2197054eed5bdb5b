use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static MEASUREMENT: &str = "renogy";

/// Error body returned by InfluxDB 2 alongside a non-2xx status.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct InfluxErrorBody {
    /// e.g. `internal error`
    pub code: String,
    /// e.g. `unexpected error writing points to database: timeout`
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("InfluxDB request failed with HTTP {status}: {code}: {message}")]
pub struct InfluxFailure {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl InfluxFailure {
    pub fn parse(status: u16, body: &str) -> Self {
        match serde_json::from_str::<InfluxErrorBody>(body) {
            Ok(err) => Self {
                status,
                code: err.code,
                message: err.message,
            },
            Err(err) => {
                debug!("failed to deserialize {}: {}", body, err);
                Self {
                    status,
                    code: "unknown".to_string(),
                    message: body.to_string(),
                }
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status == 500 && self.code == "internal error" && self.message.contains("timeout")
    }

    /// A proxy in front of a restarting InfluxDB answers 502.
    pub fn is_bad_gateway(&self) -> bool {
        self.status == 502
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeleteRequest {
    pub start: String,
    pub stop: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// Writes samples into an InfluxDB 2 bucket over its HTTP API.
pub struct InfluxSink {
    config: config::Influx,
    client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(config: config::Influx) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(self.config.url())?.join(path)?;
        url.query_pairs_mut()
            .append_pair("org", self.config.org())
            .append_pair("bucket", self.config.bucket());
        Ok(url)
    }

    /// One line of line protocol: `renogy Field=value,... <ns timestamp>`
    pub fn line(data: &RenogyData, sampled_at: DateTime<Utc>) -> String {
        use FieldValue::*;

        let power = &data.power_status;
        let daily = &data.daily_stats;
        let stats = &data.historical_data;

        let mut fields: Vec<(&str, FieldValue)> = vec![
            ("BatterySOC", Integer(power.battery_soc as i64)),
            ("BatteryVoltage", Float(power.battery_voltage)),
            ("ChargingCurrentToBattery", Float(power.charging_current_to_battery)),
            ("BatteryTemp", Integer(power.battery_temp as i64)),
            ("ControllerTemp", Integer(power.controller_temp as i64)),
            ("SolarPanelVoltage", Float(power.solar_panel_voltage)),
            ("SolarPanelCurrent", Float(power.solar_panel_current)),
            ("SolarPanelPower", Integer(power.solar_panel_power as i64)),
            ("Daily_BatteryMinVoltage", Float(daily.battery_min_voltage)),
            ("Daily_BatteryMaxVoltage", Float(daily.battery_max_voltage)),
            ("Daily_MaxChargingCurrent", Float(daily.max_charging_current)),
            ("Daily_MaxChargingPower", Integer(daily.max_charging_power as i64)),
            ("Daily_ChargingAmpHours", Integer(daily.charging_ah as i64)),
            ("Daily_PowerGeneration", Integer(daily.power_generation_wh as i64)),
            ("Stats_DaysUp", Integer(stats.days_up as i64)),
            ("Stats_BatteryOverDischargeCount", Integer(stats.battery_over_discharge_count as i64)),
            ("Stats_BatteryFullChargeCount", Integer(stats.battery_full_charge_count as i64)),
            ("Stats_TotalChargingBatteryAH", Integer(stats.total_charging_battery_ah as i64)),
            (
                "Stats_CumulativePowerGenerationWH",
                Integer(stats.cumulative_power_generation_wh as i64),
            ),
            ("ChargingState", Integer(data.status.charging_state.value() as i64)),
        ];
        if let Some(faults) = data.status.faults_string() {
            fields.push(("Faults", Text(faults)));
        }

        let fields = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        let nanos = sampled_at.timestamp_millis() * 1_000_000;

        format!("{} {} {}\n", MEASUREMENT, fields, nanos)
    }

    async fn post(&self, url: url::Url, content_type: &str, body: String) -> Result<()> {
        debug!("POSTing {}", body);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.config.token()))
            .header("Content-Type", content_type)
            .header("Accept", "application/json")
            .body(body.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let failure = InfluxFailure::parse(status.as_u16(), &text);
            return Err(anyhow::Error::new(failure).context(format!("failed to POST {}", body.trim())));
        }

        Ok(())
    }
}

#[async_trait]
impl Sink for InfluxSink {
    async fn init(&self) -> Result<()> {
        debug!("logging into {}", self);
        Ok(())
    }

    async fn append(&self, data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        let mut url = self.endpoint("api/v2/write")?;
        url.query_pairs_mut().append_pair("precision", "ns");

        self.post(url, "text/plain; charset=utf-8", Self::line(data, sampled_at))
            .await?;
        debug!("data posted to {}", self);
        Ok(())
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        let stop = chrono::Local::now().date_naive() - chrono::Duration::days(days as i64);
        let request = DeleteRequest {
            start: "2000-01-01T00:00:00Z".to_string(),
            stop: format!("{}T00:00:00Z", stop.format("%Y-%m-%d")),
            predicate: Some(format!("_measurement=\"{}\"", MEASUREMENT)),
        };

        let url = self.endpoint("api/v2/delete")?;
        self.post(url, "application/json", serde_json::to_string(&request)?)
            .await
    }

    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        sink::is_recoverable(err)
            || err.chain().any(|cause| {
                cause
                    .downcast_ref::<InfluxFailure>()
                    .map(|f| f.is_bad_gateway())
                    .unwrap_or(false)
            })
    }
}

impl std::fmt::Display for InfluxSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InfluxSink(url={}, org={}, bucket={})",
            self.config.url(),
            self.config.org(),
            self.config.bucket()
        )
    }
}
