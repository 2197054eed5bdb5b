use crate::prelude::*;

use nom::number::complete::be_u16;
use nom::IResult;

pub struct Utils;

impl Utils {
    // nom helpers for the fixed-point register fields {{{
    pub fn be_u16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, value) = be_u16(input)?;
        Ok((input, value as f64 / 10.0))
    }

    pub fn be_u16_div100(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, value) = be_u16(input)?;
        Ok((input, value as f64 / 100.0))
    } // }}}

    /// CRC16/MODBUS: initial register 0xFFFF, transmitted low byte first.
    pub fn crc16(data: &[u8]) -> u16 {
        crc16::State::<crc16::MODBUS>::calculate(data)
    }

    pub fn u16ify(array: &[u8], offset: usize) -> u16 {
        u16::from_be_bytes([array[offset], array[offset + 1]])
    }

    pub fn u32ify(array: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([
            array[offset],
            array[offset + 1],
            array[offset + 2],
            array[offset + 3],
        ])
    }

    /// Formats bytes as lowercase hex without separators, e.g. `02ff35`.
    pub fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Vec<u8>> {
        if hex.len() % 2 != 0 {
            bail!("{} must be an even-length string", hex);
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map_err(|err| anyhow!("invalid hex {}: {}", &hex[i..i + 2], err))
            })
            .collect()
    }

    /// Interprets every byte as a char; no UTF-8 decoding is attempted.
    pub fn ascii_string(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }

    pub fn utc() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    pub fn round(x: f64, decimals: u32) -> f64 {
        let y = 10i32.pow(decimals) as f64;
        (x * y).round() / y
    }
}
