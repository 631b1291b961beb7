//! End-to-end: drive a `Server` over an in-memory duplex pipe and talk to
//! it with raw `mux_subframe` request/reply encoding, the way
//! `mux-client` will.

use std::collections::HashMap;
use std::time::Duration;

use mux_server::{Server, ServerConfig};
use mux_subframe::{ErrorCode, ReadResult, RegisterBackend, RegisterRequest, Value};
use mux_wire::{ByteStreamCarrier, Carrier, CarrierError, Frame};
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

impl mux_wire::CanFdIo for DummyCanFd {
    async fn send(&mut self, _dg: &mux_wire::CanFdDatagram) -> std::io::Result<()> {
        unreachable!("this test only drives the byte-stream carrier")
    }

    async fn recv(&mut self) -> std::io::Result<mux_wire::CanFdDatagram> {
        unreachable!("this test only drives the byte-stream carrier")
    }
}

#[tokio::test]
async fn write_then_read_round_trips_through_the_server() {
    let (client_io, server_io) = duplex(4096);
    let server_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(server_io));
    let mut client_carrier = ByteStreamCarrier::new(client_io);

    let server = Server::new(ServerConfig::new(5), server_carrier, MapBackend::default()).unwrap();
    let server_task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let mut payload = Vec::new();
    RegisterRequest::WriteSingle { register: 3, value: Value::Int32(42) }.encode(&mut payload);
    let request = Frame::new(1, 5, true, payload).unwrap();
    client_carrier.write(&request).await.unwrap();
    let write_reply = client_carrier.read(Duration::from_millis(200)).await.unwrap();
    assert_eq!(write_reply.source_id, 5);
    assert_eq!(write_reply.dest_id, 1);
    assert!(write_reply.payload.is_empty());

    let mut payload = Vec::new();
    RegisterRequest::ReadSingle { register: 3, type_index: 2 }.encode(&mut payload);
    let request = Frame::new(1, 5, true, payload).unwrap();
    client_carrier.write(&request).await.unwrap();
    let read_reply = client_carrier.read(Duration::from_millis(200)).await.unwrap();

    let events = mux_subframe::parse_response(&read_reply.payload).unwrap();
    assert_eq!(
        events,
        vec![mux_subframe::ClientEvent::Register(mux_subframe::RegisterReply::Single {
            register: 3,
            value: Value::Int32(42),
        })]
    );

    server_task.abort();
}

#[tokio::test]
async fn broadcast_frame_never_elicits_a_response() {
    let (client_io, server_io) = duplex(4096);
    let server_carrier: Carrier<_, DummyCanFd> = Carrier::ByteStream(ByteStreamCarrier::new(server_io));
    let mut client_carrier = ByteStreamCarrier::new(client_io);

    let server = Server::new(ServerConfig::new(5), server_carrier, MapBackend::default()).unwrap();
    let server_task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    let mut payload = Vec::new();
    RegisterRequest::WriteSingle { register: 1, value: Value::Int8(1) }.encode(&mut payload);
    let request = Frame::new(1, mux_wire::BROADCAST_ID, false, payload).unwrap();
    client_carrier.write(&request).await.unwrap();

    let result = client_carrier.read(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(CarrierError::TimedOut)));

    server_task.abort();
}
