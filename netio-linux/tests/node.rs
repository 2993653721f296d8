use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr as UnixSocketAddr, UnixDatagram};
use std::time::Duration;

use netio_core::{Family, MessageKind, SocketKey};
use netio_linux::{Config, Node, NodeError};

fn config() -> Config {
    Config {
        keepalive_interval_ms: 50,
        ..Config::default()
    }
}

fn unique(tag: &str) -> String {
    format!("unix:@netio-test-{}-{}", std::process::id(), tag)
}

/// Let both nodes exchange whatever is in flight.
async fn settle(a: &mut Node, b: &mut Node) {
    for _ in 0..8 {
        a.wait_timeout(Duration::from_millis(10)).await;
        b.wait_timeout(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn abstract_unix_round_trip() {
    let uri = unique("round-trip");
    let mut producer = Node::new(config());
    producer.bind_public(&uri).unwrap();
    let x = producer.create_param("netio:X").unwrap();
    producer.set(x, 4.25).unwrap();

    let mut consumer = Node::new(config());
    let rx = consumer.create_param(&format!("{}#X", uri)).unwrap();
    settle(&mut producer, &mut consumer).await;

    assert!(consumer.is_present(rx));
    assert_eq!(consumer.get(rx).unwrap(), 4.25);

    producer.set(x, -1.5).unwrap();
    settle(&mut producer, &mut consumer).await;
    assert_eq!(consumer.get(rx).unwrap(), -1.5);
}

#[tokio::test]
async fn remote_write_reaches_writable_param_only() {
    let uri = unique("write");
    let mut producer = Node::new(config());
    producer.bind_public(&uri).unwrap();
    let gain = producer.create_param("netio:+gain").unwrap();
    let fixed = producer.create_param("netio:fixed").unwrap();
    producer.set(gain, 1.0).unwrap();
    producer.set(fixed, 1.0).unwrap();

    let mut consumer = Node::new(config());
    let rgain = consumer.create_param(&format!("{}#gain", uri)).unwrap();
    let rfixed = consumer.create_param(&format!("{}#fixed", uri)).unwrap();
    settle(&mut producer, &mut consumer).await;

    consumer.set(rgain, 2.0).unwrap();
    consumer.set(rfixed, 2.0).unwrap();
    settle(&mut producer, &mut consumer).await;

    assert_eq!(producer.get(gain).unwrap(), 2.0);
    assert_eq!(producer.get(fixed).unwrap(), 1.0);
    assert_eq!(consumer.get(rgain).unwrap(), 2.0);
    assert_eq!(consumer.get(rfixed).unwrap(), 1.0);
}

#[tokio::test]
async fn message_and_ack() {
    let uri = unique("msg");
    let mut listener = Node::new(config());
    listener.bind_public(&uri).unwrap();
    let mut sender = Node::new(config());

    let id = sender.send_msg(&uri, "open door").unwrap();
    assert_eq!(id, 1);
    for _ in 0..8 {
        listener.wait_timeout(Duration::from_millis(10)).await;
        if listener.msg_pending() {
            break;
        }
    }
    assert_eq!(listener.msg_queued(), 1);
    assert_eq!(listener.recv_msg().as_deref(), Some("open door"));
    assert_eq!(listener.msg_queued(), 0);
    assert_eq!(listener.msg_id(), id);
    assert_eq!(listener.ack_msg("done").unwrap(), id);
    assert!(listener.ack_msg("twice").is_err());

    for _ in 0..8 {
        sender.wait_timeout(Duration::from_millis(10)).await;
        if sender.msg_pending() {
            break;
        }
    }
    assert_eq!(sender.recv_msg().as_deref(), Some("done"));
    let ack = sender.current_msg().unwrap();
    assert_eq!(ack.kind, MessageKind::Ack);
    assert_eq!(ack.id, id);
}

#[tokio::test]
async fn publisher_loss_marks_params_absent() {
    let uri = unique("loss");
    let mut producer = Node::new(config());
    producer.bind_public(&uri).unwrap();
    let x = producer.create_param("netio:X").unwrap();
    producer.set(x, 7.0).unwrap();

    let mut consumer = Node::new(config());
    let rx = consumer.create_param(&format!("{}#X", uri)).unwrap();
    settle(&mut producer, &mut consumer).await;
    assert!(consumer.is_present(rx));

    drop(producer);
    for _ in 0..30 {
        consumer.wait_timeout(Duration::from_millis(20)).await;
    }
    assert!(!consumer.is_present(rx));
    assert_eq!(consumer.get(rx).unwrap(), 7.0);
}

#[tokio::test]
async fn oversized_datagram_drops_cut_line() {
    let uri = unique("oversized");
    let mut node = Node::new(config());
    node.bind_public(&uri).unwrap();
    let gain = node.create_param("netio:+gain").unwrap();
    node.set(gain, 0.0).unwrap();

    // the receive buffer ends inside the last write: "gain>2.5" of "gain>2.500000"
    let cap = netio_core::MTU * 2;
    let mut dgram = b"gain>1.000000\n".to_vec();
    dgram.resize(cap - "gain>2.5".len(), b'\n');
    dgram.extend_from_slice(b"gain>2.500000\n");
    assert!(dgram.len() > cap);

    let name = uri.trim_start_matches("unix:@");
    let tx = UnixDatagram::unbound().unwrap();
    tx.send_to_addr(&dgram, &UnixSocketAddr::from_abstract_name(name).unwrap())
        .unwrap();
    for _ in 0..4 {
        node.wait_timeout(Duration::from_millis(10)).await;
    }
    assert_eq!(node.get(gain).unwrap(), 1.0);
}

#[tokio::test]
async fn path_socket_ping_and_unlink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pub.sock");
    let uri = format!("unix:{}", path.display());

    let mut target = Node::new(config());
    target.bind_public(&uri).unwrap();
    assert!(path.exists());

    let mut pinger = Node::new(config());
    pinger.probe(&uri).unwrap();
    settle(&mut target, &mut pinger).await;
    let local = pinger
        .local_addr(SocketKey::subscriber(Family::Unix))
        .unwrap()
        .clone();
    assert!(matches!(local, netio_core::NetAddr::Unix(_)));
    let peer = netio_core::resolve(&path.display().to_string(), Some(Family::Unix)).unwrap();
    assert!(pinger
        .engine()
        .find_peer(SocketKey::subscriber(Family::Unix), &peer)
        .is_some());

    drop(target);
    assert!(!path.exists());
}

#[tokio::test]
async fn udp_loopback_round_trip() {
    let mut producer = Node::new(config());
    let local = producer.bind_public("udp4:127.0.0.1:0").unwrap();
    let temp = producer.create_param("netio:temp").unwrap();
    producer.set(temp, 21.5).unwrap();

    let mut consumer = Node::new(config());
    let rtemp = consumer.create_param(&format!("{}#temp", local)).unwrap();
    settle(&mut producer, &mut consumer).await;
    assert_eq!(consumer.get(rtemp).unwrap(), 21.5);
}

#[tokio::test]
async fn one_public_socket_per_family() {
    let mut node = Node::new(config());
    node.bind_public(&unique("dup-a")).unwrap();
    let err = node.bind_public(&unique("dup-b")).unwrap_err();
    assert!(matches!(err, NodeError::Engine(_)));
}

#[tokio::test]
async fn presets_resolve_for_params_and_messages() {
    let uri = unique("preset");
    let mut cfg = config();
    cfg.presets.insert("lamp".into(), "kitchen".into());
    cfg.presets.insert("kitchen".into(), format!("{}#lamp", uri));
    cfg.presets.insert("house".into(), uri.clone());

    let mut producer = Node::new(config());
    producer.bind_public(&uri).unwrap();
    let lamp = producer.create_param("netio:lamp").unwrap();
    producer.set(lamp, 1.0).unwrap();

    let mut consumer = Node::new(cfg);
    let rlamp = consumer.create_param("lamp").unwrap();
    assert_eq!(consumer.send_msg("house", "hello").unwrap(), 1);
    settle(&mut producer, &mut consumer).await;
    assert_eq!(consumer.get(rlamp).unwrap(), 1.0);

    assert!(consumer.create_param("no-such-preset").is_err());
}
