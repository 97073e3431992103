// MIT License - Copyright (c) 2026 rnet contributors

mod common;

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use rnet::{
    BusEvent, Event, HandshakeType, MessageBody, Priority, RequestData, RequestType, RnetMessage,
    RnetPath, SetData,
};

use common::{LOCAL, REMOTE};

fn path(segments: &[u8]) -> RnetPath {
    RnetPath::new(segments).unwrap()
}

fn set_data(source_path: RnetPath, number: u16, count: u16, data: &[u8]) -> RnetMessage {
    RnetMessage::new(
        LOCAL,
        REMOTE,
        SetData {
            target_path: RnetPath::EMPTY,
            source_path,
            packet_number: number,
            packet_count: count,
            data: data.to_vec(),
        },
    )
}

fn expect_request(message: &RnetMessage, path: RnetPath) {
    assert_eq!(message.target, REMOTE);
    assert_eq!(message.source, LOCAL);
    match &message.body {
        MessageBody::RequestData(request) => {
            assert_eq!(request.target_path, path);
            assert_eq!(request.request_type, RequestType::Data);
        }
        other => panic!("expected RequestData, got {other:?}"),
    }
}

fn expect_handshake(message: &RnetMessage, kind: HandshakeType) {
    assert_eq!(message.target, REMOTE);
    assert_eq!(message.source, LOCAL);
    match &message.body {
        MessageBody::Handshake(h) => assert_eq!(h.handshake_type, kind),
        other => panic!("expected {kind:?} handshake, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_read_single_packet_and_acknowledge() {
    let mut h = common::start(common::config().build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[3]));

    let reader = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request().await }
    });

    let request = h.peer.recv().await;
    expect_request(&request, path(&[3]));
    h.peer.send(&set_data(path(&[3]), 0, 1, &[0x41, 0x42])).await;

    assert_eq!(reader.await.unwrap().unwrap(), Some(vec![0x41, 0x42]));
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);
    assert_eq!(handle.cached().unwrap().data, vec![0x41, 0x42]);

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_write_splits_packets_and_reads_back() {
    let mut h = common::start(common::config().build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[5]));
    let value: Vec<u8> = (0..17).collect();

    let writer = tokio::spawn({
        let handle = handle.clone();
        let value = value.clone();
        async move { handle.write(&value).await }
    });

    for (number, expected) in [(0u16, &value[..16]), (1, &value[16..])] {
        let message = h.peer.recv().await;
        assert_eq!(message.target, REMOTE);
        match &message.body {
            MessageBody::SetData(packet) => {
                assert_eq!(packet.target_path, path(&[5]));
                assert_eq!(packet.packet_number, number);
                assert_eq!(packet.packet_count, 2);
                assert_eq!(packet.data, expected);
            }
            other => panic!("expected SetData, got {other:?}"),
        }
        h.peer
            .send(&RnetMessage::handshake(LOCAL, REMOTE, HandshakeType::Data))
            .await;
    }

    let request = h.peer.recv().await;
    expect_request(&request, path(&[5]));
    h.peer.send(&set_data(path(&[5]), 0, 2, &value[..16])).await;
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);
    h.peer.send(&set_data(path(&[5]), 1, 2, &value[16..])).await;

    assert!(writer.await.unwrap().unwrap());
    assert_eq!(handle.cached().unwrap().data, value);

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_is_retransmitted_until_timeout() {
    let mut h = common::start(common::config().build()).await;
    let timing = h.bus.config().timing;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[1]));

    let reader = tokio::spawn(async move { handle.request().await });

    let mut requests = 0;
    while let Some(message) = h.peer.recv_within(timing.request_timeout).await {
        expect_request(&message, path(&[1]));
        requests += 1;
    }

    assert_eq!(reader.await.unwrap().unwrap(), None);
    let floor = (timing.request_timeout.as_millis() / timing.retry_delay.as_millis()) as usize;
    assert!(requests >= floor, "only {requests} attempts");

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_write_fails() {
    let mut h = common::start(common::config().build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[6]));

    let writer = tokio::spawn(async move { handle.write(&[1, 2, 3]).await });
    assert!(matches!(
        h.peer.recv().await.body,
        MessageBody::SetData(_)
    ));
    assert!(!writer.await.unwrap().unwrap());

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reply_for_another_path_is_not_taken() {
    let mut h = common::start(common::config().build()).await;
    let device = h.bus.get_or_create_device(REMOTE).unwrap();
    let handle = device.handle(path(&[3]));

    let reader = tokio::spawn(async move { handle.request().await });
    expect_request(&h.peer.recv().await, path(&[3]));

    // Unrelated value, stored on its own path
    h.peer.send(&set_data(path(&[9]), 0, 1, &[0x10])).await;
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);
    h.peer.send(&set_data(path(&[3]), 0, 1, &[0x20])).await;

    assert_eq!(reader.await.unwrap().unwrap(), Some(vec![0x20]));
    assert_eq!(device.handle(path(&[9])).cached().unwrap().data, vec![0x10]);

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_event_is_acknowledged() {
    let mut h = common::start(common::config().build()).await;
    let mut events = h.bus.subscribe();

    let event = Event {
        target_path: RnetPath::EMPTY,
        source_path: path(&[2, 0]),
        event_code: 0xDC,
        event_timestamp: 12,
        event_data: 1,
        priority: Priority::High,
    };
    h.peer.send(&RnetMessage::new(LOCAL, REMOTE, event.clone())).await;

    expect_handshake(&h.peer.recv().await, HandshakeType::Event);
    loop {
        if let BusEvent::DeviceEvent { device, event: e } = events.recv().await.unwrap() {
            assert_eq!(device, REMOTE);
            assert_eq!(e, event);
            break;
        }
    }

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sent_high_priority_event_waits_for_handshake() {
    let mut h = common::start(common::config().build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[2, 0]));

    let sender = tokio::spawn(async move { handle.send_event(0xCE, 0, 7, Priority::High).await });
    match h.peer.recv().await.body {
        MessageBody::Event(event) => {
            assert_eq!(event.event_code, 0xCE);
            assert_eq!(event.event_data, 7);
            assert_eq!(event.target_path, path(&[2, 0]));
        }
        other => panic!("expected Event, got {other:?}"),
    }
    h.peer
        .send(&RnetMessage::handshake(LOCAL, REMOTE, HandshakeType::Event))
        .await;
    assert!(sender.await.unwrap().unwrap());

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_low_priority_event_is_sent_once() {
    let mut h = common::start(common::config().build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[2, 0]));

    let sender = tokio::spawn(async move { handle.send_event(0x11, 0, 3, Priority::Low).await });
    match h.peer.recv().await.body {
        MessageBody::Event(event) => {
            assert_eq!(event.event_code, 0x11);
            assert_eq!(event.priority, Priority::Low);
        }
        other => panic!("expected Event, got {other:?}"),
    }
    assert!(sender.await.unwrap().unwrap());
    assert!(h.peer.recv_within(Duration::from_secs(5)).await.is_none());

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_returns_early() {
    let mut h = common::start(common::config().build()).await;
    let timing = h.bus.config().timing;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[3]));
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let reader = tokio::spawn({
        let handle = handle.clone();
        let cancel = cancel.clone();
        async move { handle.request_with_cancel(&cancel).await }
    });
    expect_request(&h.peer.recv().await, path(&[3]));
    cancel.cancel();
    assert_eq!(reader.await.unwrap().unwrap(), None);
    assert!(started.elapsed() < timing.request_timeout);

    // The answer that still arrives is stored as unsolicited data
    h.peer.send(&set_data(path(&[3]), 0, 1, &[0x33])).await;
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);
    assert_eq!(handle.cached().unwrap().data, vec![0x33]);

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_write_returns_early() {
    let mut h = common::start(common::config().build()).await;
    let timing = h.bus.config().timing;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[6]));
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let writer = tokio::spawn({
        let handle = handle.clone();
        let cancel = cancel.clone();
        async move { handle.write_with_cancel(&[1, 2, 3], &cancel).await }
    });
    assert!(matches!(h.peer.recv().await.body, MessageBody::SetData(_)));
    cancel.cancel();
    assert!(!writer.await.unwrap().unwrap());
    assert!(started.elapsed() < timing.write_timeout);

    // A late handshake finds nothing waiting; later data is unsolicited
    h.peer
        .send(&RnetMessage::handshake(LOCAL, REMOTE, HandshakeType::Data))
        .await;
    h.peer.send(&set_data(path(&[6]), 0, 1, &[4])).await;
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);
    assert_eq!(handle.cached().unwrap().data, vec![4]);

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resent_last_packet_is_acknowledged_after_read() {
    let mut h = common::start(common::config().build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[4]));

    let reader = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request().await }
    });
    expect_request(&h.peer.recv().await, path(&[4]));
    h.peer.send(&set_data(path(&[4]), 0, 2, &[1; 16])).await;
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);
    h.peer.send(&set_data(path(&[4]), 1, 2, &[2])).await;
    expect_handshake(&h.peer.recv().await, HandshakeType::Data);

    let mut expected = vec![1; 16];
    expected.push(2);
    assert_eq!(reader.await.unwrap().unwrap(), Some(expected.clone()));

    // Our handshake was lost, so the device sends the last packet again
    h.peer.send(&set_data(path(&[4]), 1, 2, &[2])).await;
    let ack = h.peer.recv_within(Duration::from_secs(5)).await.unwrap();
    expect_handshake(&ack, HandshakeType::Data);
    assert_eq!(handle.cached().unwrap().data, expected);

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_local_device_answers_requests() {
    let mut h = common::start(common::config().build()).await;
    let local = h.bus.local_device().unwrap();
    local.write(path(&[1, 4]), &[9, 8, 7]);

    h.peer
        .send(&RnetMessage::new(
            LOCAL,
            REMOTE,
            RequestData {
                target_path: path(&[1, 4]),
                source_path: path(&[6]),
                request_type: RequestType::Data,
            },
        ))
        .await;

    let reply = h.peer.recv().await;
    assert_eq!(reply.target, REMOTE);
    assert_eq!(reply.source, LOCAL);
    match reply.body {
        MessageBody::SetData(packet) => {
            assert_eq!(packet.target_path, path(&[6]));
            assert_eq!(packet.source_path, path(&[1, 4]));
            assert_eq!(packet.data, vec![9, 8, 7]);
            assert!(packet.is_last());
        }
        other => panic!("expected SetData, got {other:?}"),
    }

    // Nothing stored there: no answer at all
    h.peer
        .send(&RnetMessage::new(
            LOCAL,
            REMOTE,
            RequestData {
                target_path: path(&[7]),
                source_path: RnetPath::EMPTY,
                request_type: RequestType::Data,
            },
        ))
        .await;
    assert!(h.peer.recv_within(Duration::from_secs(5)).await.is_none());

    h.bus.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_without_handshakes_nothing_is_acknowledged() {
    let mut h = common::start(common::config().requires_handshake(false).build()).await;
    let handle = h.bus.get_or_create_device(REMOTE).unwrap().handle(path(&[3]));

    let reader = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request().await }
    });
    expect_request(&h.peer.recv().await, path(&[3]));
    h.peer.send(&set_data(path(&[3]), 0, 1, &[1])).await;
    assert_eq!(reader.await.unwrap().unwrap(), Some(vec![1]));

    // A write goes out once per packet and is not waited on
    let writer = tokio::spawn(async move { handle.write(&[2]).await });
    assert!(matches!(h.peer.recv().await.body, MessageBody::SetData(_)));
    expect_request(&h.peer.recv().await, path(&[3]));
    h.peer.send(&set_data(path(&[3]), 0, 1, &[2])).await;
    assert!(writer.await.unwrap().unwrap());

    h.bus.stop().await.unwrap();
}
