//! §8 scenarios 3-4: tunnel writes reach the peer's receive queue, and a
//! cancelled read completes with a cancellation error instead of hanging
//! or being filled by a reply that arrives afterward.

use std::time::Duration;

use mplex::prelude::*;
use mplex::subframe::{ErrorCode, ReadResult, Value};
use tokio::io::duplex;

#[derive(Default)]
struct NoRegisters;

impl RegisterBackend for NoRegisters {
    fn write(&mut self, _register: u32, _value: Value) -> ErrorCode {
        0
    }

    fn read(&mut self, _register: u32, _type_index: u8) -> ReadResult {
        Err(1)
    }
}

struct DummyCanFd;

impl CanFdIo for DummyCanFd {
    async fn send(&mut self, _dg: &mplex::wire::CanFdDatagram) -> std::io::Result<()> {
        unreachable!()
    }

    async fn recv(&mut self) -> std::io::Result<mplex::wire::CanFdDatagram> {
        unreachable!()
    }
}

#[tokio::test]
async fn tunnel_write_is_delivered_to_the_server_side_receive_queue() {
    let (client_io, server_io) = duplex(4096);
    let server_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(server_io));
    let server = Server::new(ServerConfig::new(2), server_carrier, NoRegisters).unwrap();
    let server_tunnel = server.make_tunnel(3).unwrap();
    let server_task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let client_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(client_io));
    let client = Client::new(ClientConfig::new(0), client_carrier);
    let client_tunnel = client.make_tunnel(2, 3, TunnelOptions { poll_period: Duration::from_millis(5) });

    let written = client_tunnel.write(b"hello").await.unwrap();
    assert_eq!(written, 5);

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_millis(200), server_tunnel.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"hello");

    server_task.abort();
}

#[tokio::test]
async fn cancelling_a_pending_read_completes_it_without_delivering_a_late_reply() {
    let (client_io, server_io) = duplex(4096);
    let server_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(server_io));
    let server = Server::new(ServerConfig::new(2), server_carrier, NoRegisters).unwrap();
    let _server_tunnel = server.make_tunnel(3).unwrap();
    // The server task is never started: no poll reply will ever arrive,
    // simulating a peer that never answers the outstanding poll.

    let client_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(client_io));
    let client = Client::new(ClientConfig::new(0), client_carrier);
    let client_tunnel = client.make_tunnel(2, 3, TunnelOptions { poll_period: Duration::from_millis(5) });

    let mut buf = [0u8; 10];
    let tunnel_for_cancel = client_tunnel.clone();
    let read_task = tokio::spawn(async move { client_tunnel.read(&mut buf).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    tunnel_for_cancel.cancel();

    let result = tokio::time::timeout(Duration::from_millis(200), read_task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
}
