#![allow(dead_code)]

use renogy_bridge::prelude::*;
use renogy_bridge::renogy::io::{Io, IoOpener};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn hex(s: &str) -> Vec<u8> {
    Utils::from_hex(s).unwrap()
}

// Buffer {{{
#[derive(Debug, Default)]
pub struct BufferState {
    /// Bytes the client can read right now.
    pub readable: VecDeque<u8>,
    /// One canned response per expected request, released when the request is written.
    pub responses: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
}

/// In-memory pipe standing in for the serial port. Responses only become readable once the
/// client writes a request, so draining on open can't eat them.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    pub state: Arc<Mutex<BufferState>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, hex_response: &str) {
        self.state.lock().unwrap().responses.push_back(hex(hex_response));
    }

    /// Makes bytes readable immediately, e.g. garbage left in the port.
    pub fn preload(&self, bytes: &[u8]) {
        self.state.lock().unwrap().readable.extend(bytes);
    }

    pub fn written_hex(&self) -> String {
        Utils::to_hex(&self.state.lock().unwrap().written)
    }

    pub fn readable_len(&self) -> usize {
        self.state.lock().unwrap().readable.len()
    }
}

#[async_trait]
impl Io for Buffer {
    async fn read(&mut self, bytes: usize, timeout: Duration) -> Result<Vec<u8>, RenogyError> {
        let mut state = self.state.lock().unwrap();
        if state.readable.len() < bytes {
            // a real port hands out what it got before the deadline
            let got = state.readable.drain(..).count();
            return Err(RenogyError::Timeout(format!(
                "timeout reading data; expected to read {} bytes within {:?} but got {}",
                bytes, timeout, got
            )));
        }
        Ok(state.readable.drain(..bytes).collect())
    }

    async fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), RenogyError> {
        let mut state = self.state.lock().unwrap();
        state.written.extend_from_slice(bytes);
        if let Some(response) = state.responses.pop_front() {
            state.readable.extend(response);
        }
        Ok(())
    }
}

/// Hands out clones of the same [`Buffer`] and counts how often it was asked to.
#[derive(Clone, Default)]
pub struct BufferOpener {
    pub buffer: Buffer,
    pub opened: Arc<AtomicUsize>,
}

impl BufferOpener {
    pub fn new(buffer: Buffer) -> Self {
        Self {
            buffer,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl std::fmt::Display for BufferOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer")
    }
}

#[async_trait]
impl IoOpener for BufferOpener {
    async fn open(&self) -> Result<Box<dyn Io>, RenogyError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.buffer.clone()))
    }
} // }}}

// responses {{{
pub const PRODUCT_MODEL_RESPONSE: &str = "010310202020204d5434383330202020202020ee98";
pub const DAILY_STATS_RESPONSE: &str = "0103140070008400d80000000a00000608081000700084ebde";

/// Full, valid response to a read of `byte_count` bytes of `data`.
pub fn response(device_address: u8, data: &[u8]) -> String {
    let mut frame = vec![device_address, 0x03, data.len() as u8];
    frame.extend_from_slice(data);
    let crc = Utils::crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Utils::to_hex(&frame)
}

/// Queues everything `get_all_data(None)` reads, in order.
pub fn respond_all_data(buffer: &Buffer) {
    buffer.respond(&response(1, &hex("181e3200")));
    buffer.respond(&response(1, b"    MT4830      "));
    buffer.respond(&response(1, &hex("0001020300040506")));
    buffer.respond(&response(1, &hex("1501ffff")));
    buffer.respond(&response(1, &hex("0064010000e6f91700000000000002680070001e")));
    buffer.respond(DAILY_STATS_RESPONSE);
    buffer.respond(&response(1, &hex("00140001001400000fa000000000000007d000000000")));
    buffer.respond(&response(1, &hex("000200000000")));
} // }}}

// data {{{
pub fn sample_data() -> RenogyData {
    RenogyData {
        system_info: SystemInfo {
            max_voltage: 24,
            rated_charging_current: 30,
            rated_discharging_current: 50,
            product_type: Some(ProductType::Controller),
            product_model: "MT4830".to_string(),
            software_version: "V1.2.3".to_string(),
            hardware_version: "V4.5.6".to_string(),
            serial_number: "1501ffff".to_string(),
        },
        power_status: PowerStatus {
            battery_soc: 100,
            battery_voltage: 25.6,
            charging_current_to_battery: 2.3,
            controller_temp: -7,
            battery_temp: 23,
            load_voltage: 0.0,
            load_current: 0.0,
            load_power: 0,
            solar_panel_voltage: 61.6,
            solar_panel_current: 1.12,
            solar_panel_power: 30,
        },
        daily_stats: DailyStats {
            battery_min_voltage: 11.2,
            battery_max_voltage: 13.2,
            max_charging_current: 2.16,
            max_discharging_current: 0.0,
            max_charging_power: 10,
            max_discharging_power: 0,
            charging_ah: 1544,
            discharging_ah: 2064,
            power_generation_wh: 112,
            power_consumption_wh: 132,
        },
        historical_data: HistoricalData {
            days_up: 20,
            battery_over_discharge_count: 1,
            battery_full_charge_count: 20,
            total_charging_battery_ah: 4000,
            total_discharging_battery_ah: 0,
            cumulative_power_generation_wh: 2000,
            cumulative_power_consumption_wh: 0,
        },
        status: RenogyStatus {
            street_light_on: false,
            street_light_brightness: 0,
            charging_state: ChargingState::MpptCharging,
            faults: BTreeSet::new(),
        },
    }
}

pub fn sampled_at() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2022-09-11T21:00:00.000Z")
        .unwrap()
        .with_timezone(&Utc)
} // }}}

// sinks {{{
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Init,
    Append(DateTime<Utc>),
    Delete(u32),
    Close,
}

/// Records every call; appends fail with the queued errors first.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub name: String,
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub failures: Arc<Mutex<VecDeque<anyhow::Error>>>,
    pub close_fails: bool,
    pub hang: Option<Duration>,
    /// Treats every failure as fatal.
    pub strict: bool,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn fail_with(&self, err: anyhow::Error) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn appends(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Append(_)))
            .count()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn init(&self) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Init);
        Ok(())
    }

    async fn append(&self, _data: &RenogyData, sampled_at: DateTime<Utc>) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Append(sampled_at));
        if let Some(hang) = self.hang {
            tokio::time::sleep(hang).await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_records_older_than(&self, days: u32) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Delete(days));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Close);
        if self.close_fails {
            bail!("{} refuses to close", self.name);
        }
        Ok(())
    }

    fn is_recoverable(&self, err: &anyhow::Error) -> bool {
        !self.strict && renogy_bridge::sink::is_recoverable(err)
    }
}

impl std::fmt::Display for RecordingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordingSink({})", self.name)
    }
}

pub fn connection_refused() -> anyhow::Error {
    anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
} // }}}
