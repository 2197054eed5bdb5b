mod common;
use common::*;
use renogy_bridge::prelude::*;
use renogy_bridge::renogy::retry_on_timeout::RetryOnTimeoutClient;

use std::time::Duration;

fn client(opener: &BufferOpener) -> RetryOnTimeoutClient {
    RetryOnTimeoutClient::new(Box::new(opener.clone()), Duration::from_secs(1), 1).unwrap()
}

#[tokio::test]
async fn opens_lazily_and_keeps_the_pipe() -> Result<()> {
    let opener = BufferOpener::new(Buffer::new());
    let mut client = client(&opener);
    assert!(!client.is_open());
    assert_eq!(opener.opened(), 0);

    respond_all_data(&opener.buffer);
    assert_eq!(client.get_all_data(None).await?, sample_data());
    assert!(client.is_open());

    respond_all_data(&opener.buffer);
    assert_eq!(client.get_all_data(None).await?, sample_data());
    assert_eq!(opener.opened(), 1);

    Ok(())
}

#[tokio::test]
async fn drains_on_open() -> Result<()> {
    let buffer = Buffer::new();
    buffer.preload(&[0xde, 0xad, 0xbe, 0xef]);
    let opener = BufferOpener::new(buffer);
    let mut client = client(&opener);

    respond_all_data(&opener.buffer);
    assert_eq!(client.get_all_data(None).await?, sample_data());

    Ok(())
}

#[tokio::test]
async fn reopens_after_timeout() -> Result<()> {
    let opener = BufferOpener::new(Buffer::new());
    let mut client = client(&opener);

    let err = client.get_system_info().await.unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);
    assert!(!client.is_open());
    assert_eq!(opener.opened(), 1);

    respond_all_data(&opener.buffer);
    assert_eq!(client.get_all_data(None).await?, sample_data());
    assert_eq!(opener.opened(), 2);

    Ok(())
}

#[tokio::test]
async fn protocol_errors_keep_the_pipe() -> Result<()> {
    let opener = BufferOpener::new(Buffer::new());
    let mut client = client(&opener);

    opener.buffer.respond("010302181e324d");
    let err = client.get_system_info().await.unwrap_err();
    assert!(matches!(err, RenogyError::Checksum { .. }), "{:?}", err);
    assert!(client.is_open());
    assert_eq!(opener.buffer.readable_len(), 0);

    respond_all_data(&opener.buffer);
    assert_eq!(client.get_all_data(None).await?, sample_data());
    assert_eq!(opener.opened(), 1);

    Ok(())
}

#[tokio::test]
async fn close_is_idempotent() -> Result<()> {
    let opener = BufferOpener::new(Buffer::new());
    let mut client = client(&opener);

    client.close().await;

    respond_all_data(&opener.buffer);
    client.get_all_data(None).await?;
    client.close().await;
    client.close().await;
    assert!(!client.is_open());

    Ok(())
}

#[test]
fn rejects_invalid_address() {
    let opener = BufferOpener::new(Buffer::new());
    assert!(RetryOnTimeoutClient::new(Box::new(opener), Duration::from_secs(1), 0).is_err());
}
