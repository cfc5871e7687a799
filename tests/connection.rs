// MIT License - Copyright (c) 2026 Peter Wright
// Connection behaviour against a scripted device

mod common;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use common::{Answer, FakeWattBox, config, standard_answer};
use wattbox_client::{
    ClientEvent, Command, Connection, ConnectionState, EventReceiver, WattBoxError,
};

/// Collect state transitions until `until` is reached (or the wait expires).
async fn transitions_until(
    events: &mut EventReceiver,
    until: ConnectionState,
    wait: Duration,
) -> Vec<(ConnectionState, ConnectionState)> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(wait, async {
        while let Ok(event) = events.recv().await {
            if let ClientEvent::StateChanged { from, to } = event {
                seen.push((from, to));
                if to == until {
                    break;
                }
            }
        }
    })
    .await;
    seen
}

#[tokio::test]
async fn test_first_login_reaches_ready() {
    let device = FakeWattBox::standard();
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(device.logins(), 1);
    assert_eq!(conn.query("Firmware", &[]).await.unwrap(), vec!["2.4.0.1"]);
    conn.close().await;
}

#[tokio::test]
async fn test_concurrent_commands_are_matched_in_order() {
    // Every outlet answers with its own number so a mismatch is visible.
    let device = FakeWattBox::new(|line, _| match line.strip_prefix("?OutletPowerStatus=") {
        Some(n) => Answer::After(
            Duration::from_millis(1),
            vec![format!("?OutletPowerStatus={},{}.0,0.10,120.0", n, n)],
        ),
        None => standard_answer(line),
    });
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for outlet in 1..=24u32 {
        let conn = conn.clone();
        tasks.spawn(async move {
            let reply = conn
                .execute(Command::OutletPowerStatus { outlet })
                .await
                .unwrap();
            (outlet, reply.into_values())
        });
    }
    while let Some(result) = tasks.join_next().await {
        let (outlet, fields) = result.unwrap();
        assert_eq!(fields[0], outlet.to_string());
        assert_eq!(fields[1], format!("{}.0", outlet));
    }

    // Sent strictly one at a time, each exactly once.
    let mut sent = device.received();
    assert_eq!(sent.len(), 24);
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 24);
    conn.close().await;
}

#[tokio::test]
async fn test_repeated_query_is_idempotent() {
    let device = FakeWattBox::standard();
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    let first = conn.query("OutletStatus", &[]).await.unwrap();
    for _ in 0..5 {
        assert_eq!(conn.query("OutletStatus", &[]).await.unwrap(), first);
    }
    assert_eq!(conn.state(), ConnectionState::Ready);
    conn.close().await;
}

#[tokio::test]
async fn test_device_error_keeps_connection_ready() {
    let device = FakeWattBox::standard();
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    let err = conn.control("OutletModeSet", &["1", "9"]).await.unwrap_err();
    match err {
        WattBoxError::Device { command } => assert_eq!(command, "!OutletModeSet=1,9"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.query("Model", &[]).await.unwrap(), vec!["WB-800VPS-IPVM-18"]);
    conn.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_degrades_connection() {
    let device = FakeWattBox::new(|line, session| match line {
        "?Firmware" if session == 1 => Answer::Silent,
        other => standard_answer(other),
    });
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();
    let mut events = conn.subscribe();

    let start = Instant::now();
    let err = conn
        .execute_with_timeout(Command::Firmware, Duration::from_secs(1))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, WattBoxError::Timeout { .. }), "{:?}", err);
    assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(1100), "{:?}", elapsed);

    let seen = transitions_until(&mut events, ConnectionState::Ready, Duration::from_secs(10)).await;
    assert_eq!(seen[0], (ConnectionState::Ready, ConnectionState::Degraded));
    assert_eq!(seen.last().map(|t| t.1), Some(ConnectionState::Ready));

    // The replacement session answers normally.
    assert_eq!(conn.query("Firmware", &[]).await.unwrap(), vec!["2.4.0.1"]);
    assert_eq!(device.connects(), 2);
    conn.close().await;
}

#[tokio::test]
async fn test_rejected_login_fails_queued_commands() {
    let device = FakeWattBox::standard().with_password("not-the-password");
    let conn = Connection::spawn_with_connector(config(), device.connector());

    let queued = conn.query("Firmware", &[]).await.unwrap_err();
    assert!(matches!(queued, WattBoxError::Auth { attempts: 3 }), "{:?}", queued);
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(device.logins(), 3);
    assert!(device.received().is_empty());

    // Later calls report the same cause without touching the device.
    let err = conn.query("Model", &[]).await.unwrap_err();
    assert!(matches!(err, WattBoxError::Auth { .. }));
    assert_eq!(device.connects(), 1);
}

#[tokio::test]
async fn test_connect_reports_auth_failure() {
    let device = FakeWattBox::standard().with_password("other");
    let err = Connection::connect_with_connector(config(), device.connector())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WattBoxError::Auth { attempts: 3 }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unsolicited_line_does_not_resolve_command() {
    let device = FakeWattBox::new(|line, _| match line {
        "?OutletStatus" => Answer::Lines(vec![
            "~OutletStatus=0,1,0,1".to_string(),
            "?OutletStatus=1,1,0,1".to_string(),
        ]),
        other => standard_answer(other),
    });
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _guard = conn.on_unsolicited(move |msg| {
        let _ = tx.send(msg);
    });

    let fields = conn.query("OutletStatus", &[]).await.unwrap();
    assert_eq!(fields, vec!["1", "1", "0", "1"]);

    let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.name, "OutletStatus");
    assert_eq!(msg.outlet_states(), Some(vec![false, true, false, true]));
    conn.close().await;
}

#[tokio::test]
async fn test_reconnects_after_device_hangs_up() {
    let device = FakeWattBox::standard();
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();
    let mut events = conn.subscribe();

    // The device drops the session after accepting the reboot.
    conn.execute(Command::Reboot).await.unwrap();

    let seen = transitions_until(&mut events, ConnectionState::Ready, Duration::from_secs(5)).await;
    assert_eq!(
        seen,
        vec![
            (ConnectionState::Ready, ConnectionState::Disconnected),
            (ConnectionState::Disconnected, ConnectionState::Reconnecting),
            (ConnectionState::Reconnecting, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Authenticating),
            (ConnectionState::Authenticating, ConnectionState::Ready),
        ]
    );
    assert_eq!(device.logins(), 2);
    assert_eq!(conn.query("Hostname", &[]).await.unwrap(), vec!["rack-pdu"]);
    conn.close().await;
}

#[tokio::test]
async fn test_commands_queued_during_outage_are_served_in_order() {
    let device = FakeWattBox::new(|line, session| match line {
        "?Hostname" if session == 1 => Answer::HangUp,
        other => standard_answer(other),
    });
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    let lost = conn.clone();
    let in_flight = tokio::spawn(async move { lost.query("Hostname", &[]).await });
    tokio::task::yield_now().await;
    let model = conn.query("Model", &[]);
    let firmware = conn.query("Firmware", &[]);
    let (model, firmware) = tokio::join!(model, firmware);

    // The command on the wire when the session died fails; the rest wait.
    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.is_retryable(), "{:?}", err);
    assert_eq!(model.unwrap(), vec!["WB-800VPS-IPVM-18"]);
    assert_eq!(firmware.unwrap(), vec!["2.4.0.1"]);
    assert_eq!(device.received(), vec!["?Hostname", "?Model", "?Firmware"]);
    conn.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_then_caps() {
    let device = FakeWattBox::standard().refuse_first(6);
    let cfg = wattbox_client::ClientConfig {
        reconnect_base_delay: Duration::from_secs(1),
        max_reconnect_backoff: Duration::from_secs(8),
        connect_timeout: Duration::from_secs(120),
        ..config()
    };
    let conn = Connection::spawn_with_connector(cfg, device.connector());
    let mut events = conn.subscribe();

    conn.ensure_ready(Duration::from_secs(120)).await.unwrap();

    let times = device.connect_times();
    assert_eq!(times.len(), 7);
    let gaps: Vec<u64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis() as u64)
        .collect();
    let expected = [1000, 2000, 4000, 8000, 8000, 8000];
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(gap.abs_diff(want) < 50, "gaps {:?}", gaps);
    }

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Reconnecting { attempt, delay } = event {
            delays.push((attempt, delay.as_secs()));
        }
    }
    assert_eq!(delays[..3].to_vec(), vec![(1u32, 1u64), (2, 2), (3, 4)]);
    conn.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_connect_attempts_fail() {
    let device = FakeWattBox::standard().refuse_first(usize::MAX);
    let cfg = wattbox_client::ClientConfig {
        max_connect_attempts: Some(3),
        connect_timeout: Duration::from_secs(60),
        ..config()
    };
    let err = Connection::connect_with_connector(cfg, device.connector())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WattBoxError::Connect { .. }), "{:?}", err);
    assert_eq!(device.connects(), 3);
}

#[tokio::test]
async fn test_close_sends_exit() {
    let device = FakeWattBox::standard();
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();
    conn.query("Model", &[]).await.unwrap();

    conn.close().await;

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(device.received().last().map(String::as_str), Some("!Exit"));
    let err = conn.query("Model", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        WattBoxError::NotReady {
            state: ConnectionState::Closed
        }
    ));
}

#[tokio::test]
async fn test_dropped_caller_does_not_desync() {
    let device = FakeWattBox::new(|line, _| match line {
        "?Hostname" => Answer::After(Duration::from_millis(200), vec!["?Hostname=slow".into()]),
        other => standard_answer(other),
    });
    let conn = Connection::connect_with_connector(config(), device.connector())
        .await
        .unwrap();

    // Give up on the slow query while it is on the wire.
    let slow = tokio::time::timeout(Duration::from_millis(50), conn.query("Hostname", &[])).await;
    assert!(slow.is_err());

    // Its late reply is consumed, not handed to the next caller.
    assert_eq!(conn.query("Model", &[]).await.unwrap(), vec!["WB-800VPS-IPVM-18"]);
    assert_eq!(conn.state(), ConnectionState::Ready);
    conn.close().await;
}
