//! End-to-end session tests against an in-process relay.

use std::time::Duration;

use murmur_proto::{InboundFrame, MessageKind, PresenceStatus, RoomId};
use murmur_relay::{RelayConfig, RelayHandle, RelayServer};
use murmur_session::{
    ConnectionState, ConnectionStatus, PresenceTracker, ReconnectConfig, Session, SessionConfig,
    SessionError, SessionEvent, SessionHandle, StaticToken,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

fn room(id: &str) -> RoomId {
    RoomId::new(id).unwrap()
}

async fn start_relay(config: RelayConfig) -> RelayHandle {
    let config = RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..config
    };
    RelayServer::new(config).listen().await.unwrap()
}

fn fast_config(relay: &RelayHandle) -> SessionConfig {
    SessionConfig {
        connect_timeout: Duration::from_secs(2),
        switch_timeout: Duration::from_secs(1),
        drain_interval: Duration::from_millis(10),
        reconnect: ReconnectConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            cap_delay: Duration::from_millis(400),
        },
        ..SessionConfig::with_server(relay.url())
    }
}

/// Spawn a session and collect every event it broadcasts.
fn spawn_session(
    session: Session,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let handle = session.spawn();
    let (tx, rx) = mpsc::unbounded_channel();
    handle.add_message_handler(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    (handle, rx)
}

fn connect_session(
    config: SessionConfig,
    token: &str,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    spawn_session(Session::new(config, StaticToken::new(token)))
}

/// Next event satisfying `pred`, skipping the rest.
async fn expect_event<F>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("session dropped its subscribers");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event within timeout")
}

/// Poll `check` until it holds.
async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn test_connect_without_room_enters_base_view() {
    let (session, _events) = connect_session(SessionConfig::default(), "alice");

    session.connect(None).await.unwrap();

    assert_eq!(session.state(), ConnectionState::BaseView);
    assert_eq!(session.current_room(), None);
}

#[tokio::test]
async fn test_connect_reports_connected() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");

    session.connect(Some(room("general"))).await.unwrap();

    assert!(session.is_open());
    assert_eq!(session.current_room(), Some(room("general")));
    let event = expect_event(&mut events, |e| matches!(e, SessionEvent::Status(_))).await;
    assert_eq!(
        event,
        SessionEvent::Status(ConnectionStatus::Connected {
            room_id: room("general")
        })
    );
}

#[tokio::test]
async fn test_concurrent_connects_share_one_attempt() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, _events) = connect_session(fast_config(&relay), "alice");

    let (a, b) = tokio::join!(
        session.connect(Some(room("general"))),
        session.connect(Some(room("general")))
    );
    a.unwrap();
    b.unwrap();

    eventually(|| relay.stats().total_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.stats().total_connections, 1);
}

#[tokio::test]
async fn test_watch_state_observes_connected_room() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, _events) = connect_session(fast_config(&relay), "alice");
    let mut state = session.watch_state();

    let connect = session.connect(Some(room("general")));
    let observe = async {
        state
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap()
            .room
            .clone()
    };
    let (connected, seen_room) = tokio::join!(connect, observe);
    connected.unwrap();
    assert_eq!(seen_room, Some(room("general")));
}

#[tokio::test]
async fn test_send_message_echoes_temp_id() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    let temp_id = session
        .send_message("hello", MessageKind::Text, None)
        .unwrap();
    assert!(temp_id.as_str().starts_with("temp-"));

    let event = expect_event(&mut events, |e| {
        matches!(e.inbound(), Some(InboundFrame::Message(_)))
    })
    .await;
    let Some(InboundFrame::Message(message)) = event.inbound() else {
        unreachable!()
    };
    assert_eq!(message.temp_id.as_ref(), Some(&temp_id));
    assert_eq!(message.content, "hello");
    assert_eq!(message.username, "alice");
}

#[tokio::test]
async fn test_switch_to_current_room_sends_nothing() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, _events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.switch_room(room("general")).await.unwrap();

    assert_eq!(relay.stats().frames_of("room_switch"), 0);
    assert_eq!(session.current_room(), Some(room("general")));
}

#[tokio::test]
async fn test_switch_room_round_trip() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.switch_room(room("random")).await.unwrap();

    assert_eq!(session.current_room(), Some(room("random")));
    assert_eq!(session.state(), ConnectionState::Connected);
    let event = expect_event(&mut events, |e| matches!(e, SessionEvent::RoomChanged { .. })).await;
    assert_eq!(
        event,
        SessionEvent::RoomChanged {
            room_id: room("random"),
            late: false
        }
    );
    // Same socket, no second connection.
    assert_eq!(relay.stats().total_connections, 1);
}

#[tokio::test]
async fn test_rapid_switches_coalesce_to_latest() {
    let relay = start_relay(RelayConfig {
        switch_ack_delay: Some(Duration::from_millis(150)),
        ..RelayConfig::default()
    })
    .await;
    let (session, _events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    let (a, b, c) = tokio::join!(
        session.switch_room(room("a")),
        session.switch_room(room("b")),
        session.switch_room(room("c"))
    );

    a.unwrap();
    assert_eq!(
        b,
        Err(SessionError::SwitchSuperseded {
            room: room("b"),
            by: room("c")
        })
    );
    c.unwrap();
    assert_eq!(session.current_room(), Some(room("c")));
    assert_eq!(relay.stats().frames_of("room_switch"), 2);
}

#[tokio::test]
async fn test_rejected_switch_keeps_room() {
    let relay = start_relay(RelayConfig {
        rooms: Some(["general".to_string()].into_iter().collect()),
        ..RelayConfig::default()
    })
    .await;
    let (session, _events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    let result = session.switch_room(room("secret")).await;

    assert_eq!(
        result,
        Err(SessionError::SwitchRejected {
            room: room("secret"),
            message: "Room not found".to_string()
        })
    );
    assert_eq!(session.current_room(), Some(room("general")));
    assert!(session.is_open());
}

#[tokio::test]
async fn test_switch_timeout_then_late_success() {
    let relay = start_relay(RelayConfig {
        switch_ack_delay: Some(Duration::from_millis(400)),
        ..RelayConfig::default()
    })
    .await;
    let config = SessionConfig {
        switch_timeout: Duration::from_millis(100),
        ..fast_config(&relay)
    };
    let (session, mut events) = connect_session(config, "alice");
    session.connect(Some(room("general"))).await.unwrap();

    let result = session.switch_room(room("random")).await;
    assert_eq!(result, Err(SessionError::SwitchTimeout(room("random"))));
    assert_eq!(session.current_room(), Some(room("general")));

    let event = expect_event(&mut events, |e| matches!(e, SessionEvent::RoomChanged { .. })).await;
    assert_eq!(
        event,
        SessionEvent::RoomChanged {
            room_id: room("random"),
            late: true
        }
    );
    assert_eq!(session.current_room(), Some(room("random")));
}

#[tokio::test]
async fn test_abrupt_drop_schedules_reconnect() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();
    eventually(|| relay.stats().active_connections == 1).await;

    relay.drop_all();

    let event = expect_event(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected { .. }))
    })
    .await;
    let SessionEvent::Status(ConnectionStatus::Disconnected {
        code,
        will_reconnect,
        attempt,
        retry_in,
        ..
    }) = event
    else {
        unreachable!()
    };
    assert_eq!(code, Some(1006));
    assert!(will_reconnect);
    assert_eq!(attempt, 1);
    assert_eq!(retry_in, Some(Duration::from_millis(100)));

    expect_event(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Connected { .. }))
    })
    .await;
    assert_eq!(session.current_room(), Some(room("general")));
    eventually(|| relay.stats().total_connections == 2).await;
}

#[tokio::test]
async fn test_reconnect_gives_up_after_budget() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();
    eventually(|| relay.stats().active_connections == 1).await;

    relay.shutdown().await;

    let mut attempts = Vec::new();
    let mut delays = Vec::new();
    let last = loop {
        let event = expect_event(&mut events, |e| {
            matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected { .. }))
        })
        .await;
        let SessionEvent::Status(ConnectionStatus::Disconnected {
            will_reconnect,
            attempt,
            retry_in,
            ..
        }) = event
        else {
            unreachable!()
        };
        attempts.push(attempt);
        delays.push(retry_in);
        if !will_reconnect {
            assert_eq!(retry_in, None);
            break attempt;
        }
    };

    assert_eq!(attempts, vec![1, 2, 3, 3]);
    let ms = |n| Some(Duration::from_millis(n));
    assert_eq!(delays, vec![ms(100), ms(200), ms(400), None]);
    assert_eq!(last, 3);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // No timer left behind.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_timeout_schedules_reconnect() {
    // Accepts TCP but never answers the WebSocket upgrade.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = SessionConfig {
        connect_timeout: Duration::from_millis(200),
        reconnect: ReconnectConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
            cap_delay: Duration::from_millis(400),
        },
        ..SessionConfig::with_server(format!("ws://{addr}"))
    };
    let (session, mut events) = connect_session(config, "alice");

    let result = session.connect(Some(room("general"))).await;
    assert_eq!(
        result,
        Err(SessionError::ConnectTimeout(Duration::from_millis(200)))
    );

    let mut statuses = Vec::new();
    while statuses.len() < 2 {
        let event = expect_event(&mut events, |e| {
            matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected { .. }))
        })
        .await;
        let SessionEvent::Status(ConnectionStatus::Disconnected {
            will_reconnect,
            attempt,
            retry_in,
            ..
        }) = event
        else {
            unreachable!()
        };
        statuses.push((will_reconnect, attempt, retry_in));
    }
    assert_eq!(
        statuses,
        vec![
            (true, 1, Some(Duration::from_millis(100))),
            (false, 1, None),
        ]
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    drop(listener);
}

#[tokio::test]
async fn test_token_with_reserved_characters() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "team/alice?#1");
    session.connect(Some(room("general"))).await.unwrap();

    session
        .send_message("hi", MessageKind::Text, None)
        .unwrap();
    let event = expect_event(&mut events, |e| {
        matches!(e.inbound(), Some(InboundFrame::Message(_)))
    })
    .await;
    let Some(InboundFrame::Message(message)) = event.inbound() else {
        unreachable!()
    };
    assert_eq!(message.username, "team/alice?#1");
    assert_eq!(message.room_id, "general");
}

#[tokio::test]
async fn test_normal_close_from_server_does_not_reconnect() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();
    eventually(|| relay.stats().active_connections == 1).await;

    relay.close_all(1000);

    let event = expect_event(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected { .. }))
    })
    .await;
    let SessionEvent::Status(ConnectionStatus::Disconnected {
        code,
        will_reconnect,
        ..
    }) = event
    else {
        unreachable!()
    };
    assert_eq!(code, Some(1000));
    assert!(!will_reconnect);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(relay.stats().total_connections, 1);
}

#[tokio::test]
async fn test_signed_out_does_not_retry() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) =
        spawn_session(Session::new(fast_config(&relay), StaticToken::signed_out()));

    let result = session.connect(Some(room("general"))).await;

    assert_eq!(result, Err(SessionError::NotAuthenticated));
    let event = expect_event(&mut events, |e| matches!(e, SessionEvent::Status(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Status(ConnectionStatus::Disconnected {
            will_reconnect: false,
            ..
        })
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(relay.stats().total_connections, 0);
}

#[tokio::test]
async fn test_duplicate_frames_delivered_once() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();
    eventually(|| relay.stats().active_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frame = r#"{"type":"message","id":"m-42","content":"once","username":"bob","timestamp":"2024-01-01T00:00:00Z","room_id":"general"}"#;
    relay.inject("general", frame).await;
    relay.inject("general", frame).await;
    relay
        .inject("general", r#"{"type":"message_deleted","message_id":"end"}"#)
        .await;

    let mut copies = 0;
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            match event.inbound() {
                Some(InboundFrame::Message(m)) if m.id == "m-42" => copies += 1,
                Some(InboundFrame::MessageDeleted { message_id }) if message_id == "end" => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(copies, 1);

    let stats = session.session_stats().await.unwrap();
    assert_eq!(stats.duplicates_dropped, 1);
    assert_eq!(stats.inbound_pending, 0);
}

#[tokio::test]
async fn test_empty_read_receipt_sends_nothing() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.send_read_receipt(Vec::new());
    session.send_read_receipt(vec!["m1".to_string()]);

    expect_event(&mut events, |e| {
        matches!(e.inbound(), Some(InboundFrame::ReadReceipt { .. }))
    })
    .await;
    assert_eq!(relay.stats().frames_of("read_receipt"), 1);
}

#[tokio::test]
async fn test_typing_true_is_throttled() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.send_typing_status(true);
    session.send_typing_status(true);
    session.send_typing_status(true);
    session.send_typing_status(false);
    // Frames are handled in order, so this one arriving means the rest did.
    session.send_message_delete("marker");

    expect_event(&mut events, |e| {
        matches!(e.inbound(), Some(InboundFrame::MessageDeleted { .. }))
    })
    .await;
    assert_eq!(relay.stats().frames_of("typing_status"), 2);
}

#[tokio::test]
async fn test_send_while_closed_fails() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");

    let result = session.send_message("lost", MessageKind::Text, None);

    assert_eq!(result, Err(SessionError::NotConnected));
    let event = expect_event(&mut events, |e| matches!(e, SessionEvent::SendFailed { .. })).await;
    let SessionEvent::SendFailed { temp_id, .. } = event else {
        unreachable!()
    };
    assert!(temp_id.as_str().starts_with("temp-"));
    assert_eq!(relay.stats().total_connections, 0);
}

#[tokio::test]
async fn test_heartbeat_probes_while_connected() {
    let relay = start_relay(RelayConfig::default()).await;
    let config = SessionConfig {
        heartbeat_interval: Duration::from_millis(50),
        ..fast_config(&relay)
    };
    let (session, _events) = connect_session(config, "alice");
    session.connect(Some(room("general"))).await.unwrap();

    eventually(|| relay.stats().pings >= 2).await;
    let stats = timeout(WAIT, async {
        loop {
            let stats = session.session_stats().await.unwrap();
            if stats.since_last_ack.is_some() {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no heartbeat ack");
    assert!(stats.heartbeats_sent >= 2);

    session.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pings = relay.stats().pings;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.stats().pings, pings);
}

#[tokio::test]
async fn test_presence_transitions_are_forwarded() {
    let relay = start_relay(RelayConfig::default()).await;
    let tracker = PresenceTracker::new(Duration::from_secs(600));
    let session = Session::new(fast_config(&relay), StaticToken::new("alice")).with_presence(&tracker);
    let (session, _events) = spawn_session(session);
    session.connect(Some(room("general"))).await.unwrap();

    // Current status goes out on open.
    eventually(|| relay.stats().frames_of("presence_update") == 1).await;

    tracker.set_visible(false);
    eventually(|| relay.stats().frames_of("presence_update") == 2).await;

    // Unchanged status publishes nothing.
    tracker.set_visible(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.stats().frames_of("presence_update"), 2);
}

#[tokio::test]
async fn test_explicit_presence_update() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.send_presence(PresenceStatus::Away);

    let event = expect_event(&mut events, |e| {
        matches!(
            e.inbound(),
            Some(InboundFrame::Presence(p)) if p.status == Some(PresenceStatus::Away)
        )
    })
    .await;
    let Some(InboundFrame::Presence(presence)) = event.inbound() else {
        unreachable!()
    };
    assert_eq!(presence.user_id.as_deref(), Some("alice"));
    assert_eq!(relay.stats().frames_of("presence_update"), 1);
}

#[tokio::test]
async fn test_close_keeps_room_for_later_connect() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, mut events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.close().await;

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.current_room(), Some(room("general")));
    expect_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Status(ConnectionStatus::Disconnected {
                code: Some(1000),
                will_reconnect: false,
                ..
            })
        )
    })
    .await;

    session.connect(None).await.unwrap();
    assert!(session.is_open());
    assert_eq!(session.current_room(), Some(room("general")));
}

#[tokio::test]
async fn test_enter_base_view_forgets_room() {
    let relay = start_relay(RelayConfig::default()).await;
    let (session, _events) = connect_session(fast_config(&relay), "alice");
    session.connect(Some(room("general"))).await.unwrap();

    session.enter_base_view().await;

    assert_eq!(session.state(), ConnectionState::BaseView);
    assert_eq!(session.current_room(), None);
    eventually(|| relay.stats().active_connections == 0).await;
}

#[tokio::test]
async fn test_failing_handler_does_not_block_others() {
    let relay = start_relay(RelayConfig::default()).await;
    let session = Session::new(fast_config(&relay), StaticToken::new("alice")).spawn();
    session.add_message_handler(|_| Err("handler broke".into()));
    let (tx, mut events) = mpsc::unbounded_channel();
    session.add_message_handler(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });

    session.connect(Some(room("general"))).await.unwrap();

    expect_event(&mut events, |e| matches!(e, SessionEvent::Status(_))).await;
    let stats = session.subscriber_stats();
    assert_eq!(stats.active_subscribers, 2);
    assert!(stats.failures >= 1);
}
