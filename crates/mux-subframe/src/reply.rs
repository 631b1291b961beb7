//! Client-side parsing of a response payload.
//!
//! A single reply frame can interleave register replies and tunnel
//! `ServerToClient` subframes (e.g. a `write_multiple` + tunnel poll sent
//! in one request, per §4.D). Grounded on
//! `mjlib::multiplex::ThreadedClient::Impl::ParseReply`
//! (`original_source/mjlib/multiplex/threaded_client.cc`).

use mux_wire::varint::read_varuint;

use crate::tag;
use crate::value::Value;

/// One register-level outcome reported by a server.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterReply {
    Single { register: u32, value: Value },
    Multiple { start: u32, values: Vec<Value> },
    WriteError { register: u32, error: u32 },
    ReadError { register: u32, error: u32 },
}

/// One subframe found while parsing a response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register(RegisterReply),
    Tunnel { channel: u32, data: Vec<u8> },
}

/// Parse every subframe in a response payload.
///
/// Returns `None` on the first malformed subframe, mirroring the
/// original's "stop parsing, keep whatever we decoded so far is
/// unusable" behavior — callers that need partial results should retry
/// at a coarser granularity (the wire guarantees full frames, so this
/// should only trip on a corrupt implementation on the other end).
pub fn parse_response(payload: &[u8]) -> Option<Vec<ClientEvent>> {
    let mut events = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        let (tag_value, consumed) = read_varuint(&payload[pos..])?;
        pos += consumed;

        match tag_value {
            tag::WRITE_ERROR => {
                let (register, n1) = read_varuint(&payload[pos..])?;
                let (error, n2) = read_varuint(&payload[pos + n1..])?;
                pos += n1 + n2;
                events.push(ClientEvent::Register(RegisterReply::WriteError {
                    register: register as u32,
                    error: error as u32,
                }));
            }
            tag::READ_ERROR => {
                let (register, n1) = read_varuint(&payload[pos..])?;
                let (error, n2) = read_varuint(&payload[pos + n1..])?;
                pos += n1 + n2;
                events.push(ClientEvent::Register(RegisterReply::ReadError {
                    register: register as u32,
                    error: error as u32,
                }));
            }
            tag::SERVER_TO_CLIENT => {
                let (channel, n1) = read_varuint(&payload[pos..])?;
                let (len, n2) = read_varuint(&payload[pos + n1..])?;
                let start = pos + n1 + n2;
                let len = len as usize;
                let data = payload.get(start..start + len)?.to_vec();
                pos = start + len;
                events.push(ClientEvent::Tunnel { channel: channel as u32, data });
            }
            other => {
                let base = tag::base(other);
                let type_index = tag::type_bits(other);
                match base {
                    tag::REPLY_SINGLE_BASE => {
                        let (register, n1) = read_varuint(&payload[pos..])?;
                        let (value, n2) = Value::read(type_index, &payload[pos + n1..])?;
                        pos += n1 + n2;
                        events.push(ClientEvent::Register(RegisterReply::Single {
                            register: register as u32,
                            value,
                        }));
                    }
                    tag::REPLY_MULTIPLE_BASE => {
                        let (start_reg, n1) = read_varuint(&payload[pos..])?;
                        let (count, n2) = read_varuint(&payload[pos + n1..])?;
                        let mut cursor = pos + n1 + n2;
                        let mut values = Vec::with_capacity(count as usize);
                        for _ in 0..count {
                            let (value, consumed) = Value::read(type_index, &payload[cursor..])?;
                            cursor += consumed;
                            values.push(value);
                        }
                        pos = cursor;
                        events.push(ClientEvent::Register(RegisterReply::Multiple {
                            start: start_reg as u32,
                            values,
                        }));
                    }
                    _ => return None,
                }
            }
        }
    }

    Some(events)
}
