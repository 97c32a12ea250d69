//! Integration tests against a live FreeSWITCH instance.
//!
//! These tests require FreeSWITCH ESL on 127.0.0.1:8022 with password ClueCon.
//! Run with: cargo test --test live_freeswitch -- --ignored
//!
//! Set `RUST_LOG=freeswitch_call_control=debug` to see the session log.

use freeswitch_call_control::{
    ConnectionState, EslConnectOptions, EslConnection, EslError, EventFormat, EventKind,
    SwitchConfig, SwitchSession,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

const ESL_HOST: &str = "127.0.0.1";
const ESL_PORT: u16 = 8022;
const ESL_PASSWORD: &str = "ClueCon";

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> SwitchConfig {
    SwitchConfig {
        host: ESL_HOST.into(),
        esl_port: ESL_PORT,
        esl_password: ESL_PASSWORD.into(),
        command_timeout_ms: Some(10_000),
        reconnect_delay_ms: 500,
        ..Default::default()
    }
}

async fn connect() -> SwitchSession {
    init_logging();
    let session = SwitchSession::new(config()).expect("valid config");
    session
        .connect()
        .await
        .expect("failed to connect to FreeSWITCH");
    session
}

#[tokio::test]
#[ignore]
async fn live_connect_and_status() {
    let session = connect().await;
    assert!(session.is_connected());

    let body = session
        .api("status")
        .await
        .unwrap();
    assert!(body.contains("UP"), "expected UP in status: {}", body);
    session.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn live_bad_password_is_rejected() {
    init_logging();
    let session = SwitchSession::new(SwitchConfig {
        esl_password: "definitely-wrong".into(),
        ..config()
    })
    .unwrap();
    let err = session
        .connect()
        .await
        .unwrap_err();
    assert!(matches!(err, EslError::AuthFailed { .. }), "got {:?}", err);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.reconnect_pending());
    session.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn live_unknown_command_is_err() {
    let session = connect().await;
    let err = session
        .execute("no_such_command_here")
        .await
        .unwrap_err();
    match err {
        EslError::CommandFailed { reply_text } => assert!(reply_text.starts_with("-ERR")),
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    session.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn live_exists_on_unknown_uuid() {
    let session = connect().await;
    assert!(!session
        .exists("00000000-0000-0000-0000-000000000000")
        .await
        .unwrap());
    let err = session
        .hangup("00000000-0000-0000-0000-000000000000")
        .await
        .unwrap_err();
    assert!(matches!(err, EslError::CommandFailed { .. }));
    session.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn live_status_queries() {
    let session = connect().await;

    // an idle test switch has no calls; either form must decode
    let calls = session
        .get_active_calls()
        .await
        .unwrap();
    assert!(calls
        .iter()
        .all(|c| !c.uuid.is_empty()));

    let listing = session
        .get_registrations()
        .await
        .unwrap();
    assert!(!listing.is_empty());
    assert!(
        !session
            .get_extension_registration("no-such-user")
            .await
            .registered
    );
    session.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn live_loopback_call_produces_cdr() {
    let session = connect().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    session.on_call_end(move |cdr| {
        tx.send(cdr.clone())?;
        Ok(())
    });

    let uuid = session
        .execute("originate loopback/9664 &park()")
        .await
        .unwrap();
    assert!(!uuid.is_empty());
    assert!(session
        .exists(&uuid)
        .await
        .unwrap());

    session
        .hangup_with_cause(&uuid, "NORMAL_CLEARING")
        .await
        .unwrap();

    let cdr = timeout(Duration::from_secs(10), async {
        loop {
            let cdr = rx
                .recv()
                .await
                .expect("subscriber channel closed");
            if cdr.uuid == uuid {
                return cdr;
            }
        }
    })
    .await
    .expect("no CDR for the loopback call");
    assert_eq!(cdr.hangup_cause.as_deref(), Some("NORMAL_CLEARING"));
    session.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn live_raw_connection_heartbeat() {
    init_logging();
    let (conn, mut events) =
        EslConnection::connect(ESL_HOST, ESL_PORT, ESL_PASSWORD, EslConnectOptions::default())
            .await
            .expect("failed to connect to FreeSWITCH");

    conn.subscribe_events(EventFormat::Plain, &[EventKind::Heartbeat])
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(25), events.recv())
        .await
        .expect("timeout waiting for heartbeat")
        .expect("channel closed")
        .expect("event error");

    assert_eq!(event.kind(), Some(EventKind::Heartbeat));
    assert!(event
        .header("Core-UUID")
        .is_some());
    conn.disconnect()
        .await
        .unwrap();
}
