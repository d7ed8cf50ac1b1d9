//! End-to-end tests over real TCP connections
//!
//! A listening node and a dialing node on loopback, exercising the whole
//! stack: framing, flush tick, sessions, dispatch and RPC correlation.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use cluster_net::core::packet::ServiceKind;
use cluster_net::error::codes::{ERR_CANCEL, ERR_OK, ERR_RPC_FAIL, ERR_SERVICE_SHUTDOWN};
use cluster_net::error::ProtocolError;
use cluster_net::protocol::{ActorId, MessageDispatcher};
use cluster_net::service::{ActorMessageSender, AddressRouter};
use cluster_net::transport::ChannelType;
use common::*;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn adder() -> MessageDispatcher {
    let dispatcher = MessageDispatcher::new();
    dispatcher
        .on_request::<Add, _, _>(|_, add| async move {
            Ok(Sum {
                value: add.a + add.b,
                ..Default::default()
            })
        })
        .unwrap();
    dispatcher
}

async fn round_trip(kind: ServiceKind) {
    let (server, addr) = server(kind, 1, adder());
    let client = client(kind, 1);

    let session = client.connect(addr).unwrap();
    assert_eq!(session.channel_type(), ChannelType::Connect);
    let send_before = session.last_send_time();
    let recv_before = session.last_recv_time();

    let sum = timeout(WAIT, session.call(Add { rpc_id: 0, a: 40, b: 2 }, None))
        .await
        .expect("call timed out")
        .unwrap();
    assert_eq!(sum.value, 42);
    assert_eq!(sum.error, ERR_OK);

    assert!(session.last_send_time() >= send_before);
    assert!(session.last_recv_time() >= recv_before);

    assert!(eventually(|| server.session_count() == 1).await);
    let remote = server.sessions().pop().unwrap();
    assert_eq!(remote.channel_type(), ChannelType::Accept);
    assert!(remote.last_recv_time() >= recv_before);
    assert!(eventually(|| remote.last_send_time() >= remote.last_recv_time()).await);
}

#[tokio::test]
async fn test_inner_request_response() {
    round_trip(ServiceKind::Inner).await;
}

#[tokio::test]
async fn test_outer_request_response() {
    round_trip(ServiceKind::Outer).await;
}

#[tokio::test]
async fn test_many_concurrent_calls_on_one_session() {
    let (_server, addr) = server(ServiceKind::Inner, 1, adder());
    let client = client(ServiceKind::Inner, 1);
    let session = client.connect(addr).unwrap();

    let mut calls = Vec::new();
    for n in 0..50i64 {
        let session = session.clone();
        calls.push(tokio::spawn(async move {
            session.call(Add { rpc_id: 0, a: n, b: n }, None).await
        }));
    }
    for (n, call) in calls.into_iter().enumerate() {
        let sum = timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(sum.value, 2 * n as i64);
    }
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn test_message_fan_out_across_the_wire() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = MessageDispatcher::new();
    let first = tx.clone();
    dispatcher
        .on_message::<Chat, _>(move |_, chat| {
            first.send(format!("a:{}", chat.text)).unwrap();
            Ok(())
        })
        .unwrap();
    dispatcher
        .on_message::<Chat, _>(move |_, chat| {
            tx.send(format!("b:{}", chat.text)).unwrap();
            Ok(())
        })
        .unwrap();

    let (_server, addr) = server(ServiceKind::Outer, 1, dispatcher);
    let client = client(ServiceKind::Outer, 1);
    let session = client.connect(addr).unwrap();
    session
        .send(ActorId::NONE, &Chat { text: "hi".into() })
        .unwrap();

    let a = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let b = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!((a.as_str(), b.as_str()), ("a:hi", "b:hi"));
}

#[tokio::test]
async fn test_handler_error_reaches_caller() {
    let dispatcher = MessageDispatcher::new();
    dispatcher
        .on_request::<Add, _, _>(|_, _| async move {
            Err::<Sum, _>(ProtocolError::Custom("overflow".into()))
        })
        .unwrap();
    let (_server, addr) = server(ServiceKind::Inner, 1, dispatcher);
    let client = client(ServiceKind::Inner, 1);
    let session = client.connect(addr).unwrap();

    let result = timeout(WAIT, session.call(Add { rpc_id: 0, a: 1, b: 1 }, None))
        .await
        .unwrap();
    match result {
        Err(ProtocolError::Rpc { code, message }) => {
            assert_eq!(code, ERR_RPC_FAIL);
            assert!(message.contains("overflow"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

fn stalling() -> MessageDispatcher {
    let dispatcher = MessageDispatcher::new();
    dispatcher
        .on_request::<Add, _, _>(|_, _| async move {
            std::future::pending::<()>().await;
            Ok(Sum::default())
        })
        .unwrap();
    dispatcher
}

#[tokio::test]
async fn test_cancelled_call_returns_cancel_response() {
    let (_server, addr) = server(ServiceKind::Inner, 1, stalling());
    let client = client(ServiceKind::Inner, 1);
    let session = client.connect(addr).unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let sum = timeout(WAIT, session.call(Add { rpc_id: 0, a: 1, b: 1 }, Some(&token)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sum.error, ERR_CANCEL);
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn test_client_shutdown_fails_pending_calls() {
    let (_server, addr) = server(ServiceKind::Inner, 1, stalling());
    let client = client(ServiceKind::Inner, 1);
    let session = client.connect(addr).unwrap();

    let caller = session.clone();
    let call = tokio::spawn(async move { caller.call(Add { rpc_id: 0, a: 1, b: 1 }, None).await });
    assert!(eventually(|| session.pending_calls() == 1).await);

    client.shutdown();
    match timeout(WAIT, call).await.unwrap().unwrap() {
        Err(ProtocolError::SessionDisposed { error, .. }) => assert_eq!(error, ERR_SERVICE_SHUTDOWN),
        other => panic!("unexpected {other:?}"),
    }
    assert!(session.is_disposed());
    assert_eq!(client.session_count(), 0);
}

#[tokio::test]
async fn test_server_going_away_fails_pending_calls() {
    let (server, addr) = server(ServiceKind::Inner, 1, stalling());
    let client = client(ServiceKind::Inner, 1);
    let session = client.connect(addr).unwrap();

    let caller = session.clone();
    let call = tokio::spawn(async move { caller.call(Add { rpc_id: 0, a: 1, b: 1 }, None).await });
    assert!(eventually(|| server.session_count() == 1).await);

    server.shutdown();
    let result = timeout(WAIT, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(ProtocolError::SessionDisposed { .. })));
    assert!(eventually(|| client.session_count() == 0).await);
}

#[tokio::test]
async fn test_get_or_connect_reuses_session() {
    let (_server, addr) = server(ServiceKind::Inner, 1, adder());
    let client = client(ServiceKind::Inner, 1);

    let first = client.get_or_connect(addr).unwrap();
    let second = client.get_or_connect(addr).unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(client.session_count(), 1);
}

#[tokio::test]
async fn test_actor_call_between_processes() {
    const BANK: u32 = 2;
    const GATE: u32 = 1;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let dispatcher = MessageDispatcher::new();
    dispatcher
        .on_request::<Deposit, _, _>(move |ctx, deposit| {
            let seen = seen_tx.clone();
            async move {
                seen.send(ctx.actor_id).unwrap();
                Ok(Balance {
                    total: 100 + deposit.amount,
                    ..Default::default()
                })
            }
        })
        .unwrap();
    let (_bank, bank_addr) = server(ServiceKind::Inner, BANK, dispatcher);

    let gate = client(ServiceKind::Inner, GATE);
    let config = config(ServiceKind::Inner, GATE, false);
    let router = AddressRouter::new(gate.clone()).with_process(BANK, bank_addr);
    let sender = ActorMessageSender::start(&config.actor, &gate, router);

    let account = ActorId::new(BANK, 1_000, 17);
    let balance = timeout(WAIT, sender.call(account, Deposit { rpc_id: 0, amount: 5 }, true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.total, 105);
    assert_eq!(sender.pending_count(), 0);

    // the receiving process sees the id as its own actor
    let seen = seen_rx.recv().await.unwrap();
    assert_eq!(seen, account);
}

#[tokio::test]
async fn test_actor_call_to_unknown_process() {
    let gate = client(ServiceKind::Inner, 1);
    let config = config(ServiceKind::Inner, 1, false);
    let sender = ActorMessageSender::new(&config.actor, &gate, AddressRouter::new(gate.clone()));

    let result = sender
        .call(ActorId::new(77, 1, 1), Deposit { rpc_id: 0, amount: 1 }, true)
        .await;
    assert!(matches!(result, Err(ProtocolError::NoRoute(77))));
}

#[tokio::test]
async fn test_actor_message_is_localized() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = MessageDispatcher::new();
    dispatcher
        .on_message::<Touch, _>(move |ctx, touch| {
            tx.send((ctx.actor_id, touch.marker)).unwrap();
            Ok(())
        })
        .unwrap();
    let (_bank, addr) = server(ServiceKind::Inner, 5, dispatcher);

    let gate = client(ServiceKind::Inner, 3);
    let router = AddressRouter::new(gate.clone()).with_process(5, addr);
    let sender = ActorMessageSender::new(&config(ServiceKind::Inner, 3, false).actor, &gate, router);

    let target = ActorId::new(5, 9, 9);
    sender.send(target, &Touch { marker: 11 }).unwrap();
    let (actor_id, marker) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(marker, 11);
    assert_eq!(actor_id, target);
}

#[tokio::test]
async fn test_metrics_track_traffic() {
    let (server, addr) = server(ServiceKind::Inner, 1, adder());
    let client = client(ServiceKind::Inner, 1);
    let session = client.connect(addr).unwrap();
    timeout(WAIT, session.call(Add { rpc_id: 0, a: 1, b: 2 }, None))
        .await
        .unwrap()
        .unwrap();

    let sent = client.metrics().snapshot();
    assert_eq!(sent.connections_connected, 1);
    assert!(sent.packets_sent >= 1);
    assert_eq!(sent.rpc_calls, 1);

    let received = server.metrics().snapshot();
    assert_eq!(received.connections_accepted, 1);
    assert!(received.packets_received >= 1);
}
