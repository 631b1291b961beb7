//! §8 scenarios 1-2: register write without a reply, and register read
//! with a reply, driven through a live client/server pair over an
//! in-memory byte-stream transport.

use std::collections::HashMap;
use std::time::Duration;

use mplex::prelude::*;
use mplex::subframe::{ReadResult, Value};
use tokio::io::duplex;

#[derive(Default)]
struct MapBackend(HashMap<u32, Value>);

impl RegisterBackend for MapBackend {
    fn write(&mut self, register: u32, value: Value) -> ErrorCode {
        self.0.insert(register, value);
        0
    }

    fn read(&mut self, register: u32, _type_index: u8) -> ReadResult {
        self.0.get(&register).copied().ok_or(5)
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

async fn harness() -> (Server<tokio::io::DuplexStream, DummyCanFd, MapBackend>, Client<tokio::io::DuplexStream, DummyCanFd>) {
    let (client_io, server_io) = duplex(4096);
    let server_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(server_io));
    let server = Server::new(ServerConfig::new(2), server_carrier, MapBackend::default()).unwrap();
    let client_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(client_io));
    let client = Client::new(ClientConfig::new(0), client_carrier);
    (server, client)
}

#[tokio::test]
async fn write_single_with_no_reply_requested_elicits_no_reply() {
    let (server, client) = harness().await;
    let server_task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let batch = vec![(2u8, vec![RegisterRequest::WriteSingle { register: 1, value: Value::Int8(10) }])];
    let replies = client.transmit(&batch, false).await.unwrap();
    assert!(replies.is_empty());

    // The write must have landed even though no reply was requested.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let read_batch = vec![(2u8, vec![RegisterRequest::ReadSingle { register: 1, type_index: 0 }])];
    let replies = client.transmit(&read_batch, true).await.unwrap();
    assert_eq!(replies, vec![(2, 1, Ok(Value::Int8(10)))]);

    server_task.abort();
}

#[tokio::test]
async fn read_single_with_reply_returns_the_backend_value() {
    let (server, client) = harness().await;
    let server_task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let write_batch = vec![(2u8, vec![RegisterRequest::WriteSingle { register: 3, value: Value::Int8(4) }])];
    client.transmit(&write_batch, true).await.unwrap();

    let read_batch = vec![(2u8, vec![RegisterRequest::ReadSingle { register: 3, type_index: 0 }])];
    let replies = client.transmit(&read_batch, true).await.unwrap();
    assert_eq!(replies, vec![(2, 3, Ok(Value::Int8(4)))]);

    server_task.abort();
}

#[tokio::test]
async fn multi_register_batch_reports_errors_without_aborting_the_batch() {
    let (server, client) = harness().await;
    let server_task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let read_batch = vec![(
        2u8,
        vec![
            RegisterRequest::ReadSingle { register: 99, type_index: 0 },
            RegisterRequest::WriteSingle { register: 7, value: Value::Int8(1) },
        ],
    )];
    let replies = client.transmit(&read_batch, true).await.unwrap();
    assert_eq!(replies.len(), 2);
    assert!(replies[0].2.is_err());

    server_task.abort();
}
