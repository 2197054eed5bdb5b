mod common;
use common::*;
use renogy_bridge::prelude::*;
use renogy_bridge::renogy::modbus::RenogyModbusClient;

use std::time::Duration;

fn client(buffer: &Buffer) -> RenogyModbusClient<Buffer> {
    RenogyModbusClient::new(buffer.clone(), Duration::from_secs(1), 1).unwrap()
}

#[tokio::test]
async fn reads_a_register() -> Result<()> {
    let buffer = Buffer::new();
    buffer.respond("010302181e324c");

    let data = client(&buffer).read_register(0x0a, 2).await?;

    assert_eq!(buffer.written_hex(), "0103000a0001a408");
    assert_eq!(Utils::to_hex(&data), "181e");
    Ok(())
}

#[tokio::test]
async fn reads_the_product_model() -> Result<()> {
    let buffer = Buffer::new();
    buffer.respond(PRODUCT_MODEL_RESPONSE);

    let data = client(&buffer).read_register(0x0c, 16).await?;

    assert_eq!(buffer.written_hex(), "0103000c0008840f");
    assert_eq!(Utils::ascii_string(&data).trim(), "MT4830");
    Ok(())
}

#[tokio::test]
async fn reads_daily_stats() -> Result<()> {
    let buffer = Buffer::new();
    buffer.respond(DAILY_STATS_RESPONSE);

    let stats = client(&buffer).get_daily_stats().await?;

    assert_eq!(buffer.written_hex(), "0103010b000ab5f3");
    assert_eq!(stats, sample_data().daily_stats);
    Ok(())
}

#[tokio::test]
async fn reads_all_data() -> Result<()> {
    let buffer = Buffer::new();
    respond_all_data(&buffer);

    let data = client(&buffer).get_all_data(None).await?;

    assert_eq!(data, sample_data());
    assert_eq!(buffer.readable_len(), 0);
    Ok(())
}

#[tokio::test]
async fn cached_system_info_skips_the_reads() -> Result<()> {
    let buffer = Buffer::new();
    respond_all_data(&buffer);
    // drop the four system info responses
    buffer.state.lock().unwrap().responses.drain(..4);

    let cached = sample_data().system_info;
    let data = client(&buffer).get_all_data(Some(&cached)).await?;

    assert_eq!(data, sample_data());
    assert!(buffer.written_hex().starts_with("010301000"));
    Ok(())
}

#[tokio::test]
async fn device_error() {
    let buffer = Buffer::new();
    buffer.respond("018302c0f1");

    let err = client(&buffer).read_register(0x0a, 2).await.unwrap_err();

    match &err {
        RenogyError::Device { code } => assert_eq!(*code, 2),
        other => panic!("unexpected {:?}", other),
    }
    assert!(err.to_string().contains("PDU start address is not correct"));
    assert!(err.is_protocol());
}

#[tokio::test]
async fn checksum_mismatch() {
    let buffer = Buffer::new();
    buffer.respond("010302181e324d");

    let err = client(&buffer).read_register(0x0a, 2).await.unwrap_err();

    assert!(matches!(err, RenogyError::Checksum { .. }), "{:?}", err);
}

#[tokio::test]
async fn wrong_device_address() {
    let buffer = Buffer::new();
    buffer.respond(&response(2, &hex("181e")));

    let err = client(&buffer).read_register(0x0a, 2).await.unwrap_err();

    assert!(matches!(err, RenogyError::Protocol(_)), "{:?}", err);
    assert!(err.to_string().contains("expected device address 1 but got 2"));
}

#[tokio::test]
async fn wrong_data_length() {
    let buffer = Buffer::new();
    buffer.respond(&response(1, &hex("181e3200")));

    let err = client(&buffer).read_register(0x0a, 2).await.unwrap_err();

    assert!(err.is_protocol(), "{:?}", err);
}

#[tokio::test]
async fn silence_is_a_timeout() {
    let buffer = Buffer::new();

    let err = client(&buffer).read_register(0x0a, 2).await.unwrap_err();

    assert!(err.is_timeout(), "{:?}", err);
    assert_eq!(buffer.written_hex(), "0103000a0001a408");
}

#[tokio::test]
async fn rejects_bad_arguments_without_writing() {
    let buffer = Buffer::new();
    let mut client = client(&buffer);

    assert!(client.read_register(0x0a, 3).await.unwrap_err().is_protocol());
    assert!(client.read_register(0x0a, 0).await.unwrap_err().is_protocol());
    assert!(client.read_register(0x0a, 0x100).await.unwrap_err().is_protocol());
    assert!(client.read_register(0x1001, 2).await.unwrap_err().is_protocol());
    assert_eq!(buffer.written_hex(), "");
}

#[test]
fn rejects_broadcast_address() {
    assert!(RenogyModbusClient::new(Buffer::new(), Duration::from_secs(1), 0).is_err());
    assert!(RenogyModbusClient::new(Buffer::new(), Duration::from_secs(1), 0xf8).is_err());
}
