//! The subframe engine: walks a frame payload, dispatches register and
//! tunnel subframes, and optionally assembles a response payload.
//!
//! Grounded on `mjlib::multiplex::MicroServer::Impl::ProcessSubframes`
//! (`original_source/mjlib/multiplex/micro_server.cc`). This module is
//! pure — no IO, no async — so both the server (`mux-server`) and tests
//! can drive it directly over in-memory buffers.

use mux_wire::varint::{read_varuint, write_varuint};

use crate::tag;
use crate::value::Value;

/// Extra bytes reserved, on top of the outer frame overhead, when sizing a
/// tunnel response chunk (matches the original's `kExtraPadding`, trimmed
/// to the varuint+size worst case for our tag/channel/length triple).
const TUNNEL_RESPONSE_PADDING: usize = 8;

/// Non-zero register error code. Zero always means success and is never
/// emitted; one is reserved for "no backend installed" (§6).
pub type ErrorCode = u32;
pub const ERROR_NO_BACKEND: ErrorCode = 1;

/// A register value or a non-zero error code.
pub type ReadResult = Result<Value, ErrorCode>;

/// The host-side register table the engine dispatches reads/writes to.
pub trait RegisterBackend {
    fn write(&mut self, register: u32, value: Value) -> ErrorCode;
    fn read(&mut self, register: u32, type_index: u8) -> ReadResult;
}

/// Outcome of delivering `ClientToServer`/`ClientPollServer` bytes to a
/// tunnel channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelDeliverResult {
    Delivered,
    Overrun,
    UnknownChannel,
}

/// The set of live tunnel endpoints the engine dispatches tunnel
/// subframes to. Implemented by the server (`mux-server`) over its fixed
/// pool of channels.
pub trait TunnelBackend {
    /// Append `data` to channel `channel`'s receive queue.
    fn deliver(&mut self, channel: u32, data: &[u8]) -> TunnelDeliverResult;

    /// `true` if a tunnel is allocated for `channel` (used by
    /// `ClientPollServer`/`ClientToServer`, which must fail if not).
    fn has_channel(&self, channel: u32) -> bool;

    /// Remove and return up to `max_bytes` from channel `channel`'s
    /// pending write buffer (the bytes a prior `TunnelStream::write` is
    /// waiting to drain onto the wire). Returns an empty vec if there is
    /// nothing pending or no such channel.
    fn drain_pending_write(&mut self, channel: u32, max_bytes: usize) -> Vec<u8>;
}

/// Per-server/engine rolling statistics (§3 "Server").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub malformed_subframe: u64,
    pub unknown_subframe: u64,
    pub receive_overrun: u64,
}

/// Parse and dispatch every subframe in `payload`.
///
/// `response` is `Some(capacity)` when this frame requested a reply; the
/// engine writes response subframes into `response_out` (which the caller
/// must have cleared) as long as they fit within `capacity` bytes, which
/// the caller has already reduced by the outer frame's own overhead
/// (sentinel + addressing + size varuint + CRC, see
/// `mux_wire::byte_carrier::MAX_FRAME_OVERHEAD`).
pub fn process_payload<B, T>(
    payload: &[u8],
    mut backend: Option<&mut B>,
    tunnels: &mut T,
    response_out: Option<&mut Vec<u8>>,
    response_capacity: usize,
    stats: &mut EngineStats,
) where
    B: RegisterBackend,
    T: TunnelBackend,
{
    let mut pos = 0usize;
    let mut response_out = response_out;

    while pos < payload.len() {
        let Some((tag_value, consumed)) = read_varuint(&payload[pos..]) else {
            stats.malformed_subframe += 1;
            return;
        };
        pos += consumed;

        if tag_value == tag::CLIENT_TO_SERVER {
            match parse_client_to_server(&payload[pos..]) {
                Some((channel, data, consumed)) => {
                    pos += consumed;
                    let result = tunnels.deliver(channel, data);
                    if result == TunnelDeliverResult::Overrun {
                        stats.receive_overrun += 1;
                    }
                    if result == TunnelDeliverResult::UnknownChannel {
                        stats.malformed_subframe += 1;
                        return;
                    }
                    emit_tunnel_response(&mut response_out, response_capacity, tunnels, channel, None);
                }
                None => {
                    stats.malformed_subframe += 1;
                    return;
                }
            }
            continue;
        }

        if tag_value == tag::CLIENT_POLL_SERVER {
            match parse_poll(&payload[pos..]) {
                Some((channel, max_bytes, consumed)) => {
                    pos += consumed;
                    if !tunnels.has_channel(channel) {
                        stats.malformed_subframe += 1;
                        return;
                    }
                    emit_tunnel_response(
                        &mut response_out,
                        response_capacity,
                        tunnels,
                        channel,
                        Some(max_bytes),
                    );
                }
                None => {
                    stats.malformed_subframe += 1;
                    return;
                }
            }
            continue;
        }

        let group_base = tag::base(tag_value);
        let type_index = tag::type_bits(tag_value);
        let handled = match group_base {
            tag::WRITE_SINGLE_BASE => parse_write_single(
                &payload[pos..],
                type_index,
                backend.as_deref_mut(),
                response_out.as_deref_mut(),
            ),
            tag::WRITE_MULTIPLE_BASE => parse_write_multiple(
                &payload[pos..],
                type_index,
                backend.as_deref_mut(),
                response_out.as_deref_mut(),
            ),
            tag::READ_SINGLE_BASE => parse_read_single(
                &payload[pos..],
                type_index,
                backend.as_deref_mut(),
                response_out.as_deref_mut(),
            ),
            tag::READ_MULTIPLE_BASE => parse_read_multiple(
                &payload[pos..],
                type_index,
                backend.as_deref_mut(),
                response_out.as_deref_mut(),
            ),
            _ => {
                stats.unknown_subframe += 1;
                return;
            }
        };

        match handled {
            Some(consumed) => pos += consumed,
            None => {
                stats.malformed_subframe += 1;
                return;
            }
        }
    }
}

fn parse_client_to_server(data: &[u8]) -> Option<(u32, &[u8], usize)> {
    let (channel, n1) = read_varuint(data)?;
    let (len, n2) = read_varuint(&data[n1..])?;
    let len = len as usize;
    let start = n1 + n2;
    let bytes = data.get(start..start + len)?;
    Some((channel as u32, bytes, start + len))
}

fn parse_poll(data: &[u8]) -> Option<(u32, usize, usize)> {
    let (channel, n1) = read_varuint(data)?;
    let (max_bytes, n2) = read_varuint(&data[n1..])?;
    Some((channel as u32, max_bytes as usize, n1 + n2))
}

fn emit_tunnel_response<T: TunnelBackend>(
    response_out: &mut Option<&mut Vec<u8>>,
    response_capacity: usize,
    tunnels: &mut T,
    channel: u32,
    max_bytes_if_poll: Option<usize>,
) {
    let Some(out) = response_out.as_deref_mut() else {
        return;
    };

    let used_so_far = out.len();
    let remaining = response_capacity.saturating_sub(used_so_far);
    let reserve = mux_wire::varint::MAX_VARUINT_SIZE * 3 + TUNNEL_RESPONSE_PADDING;
    let budget = remaining.saturating_sub(reserve);
    let quota = match max_bytes_if_poll {
        Some(m) => budget.min(m),
        None => budget,
    };

    let chunk = tunnels.drain_pending_write(channel, quota);

    write_varuint(out, tag::SERVER_TO_CLIENT);
    write_varuint(out, u64::from(channel));
    write_varuint(out, chunk.len() as u64);
    out.extend_from_slice(&chunk);
}

fn parse_write_single<B: RegisterBackend>(
    data: &[u8],
    type_index: u8,
    backend: Option<&mut B>,
    response: Option<&mut Vec<u8>>,
) -> Option<usize> {
    let (register, n1) = read_varuint(data)?;
    let (value, n2) = Value::read(type_index, &data[n1..])?;
    if let Some(backend) = backend {
        let error = backend.write(register as u32, value);
        if error != 0 {
            emit_write_error(response, register as u32, error);
        }
    }
    Some(n1 + n2)
}

fn parse_write_multiple<B: RegisterBackend>(
    data: &[u8],
    type_index: u8,
    mut backend: Option<&mut B>,
    mut response: Option<&mut Vec<u8>>,
) -> Option<usize> {
    let (start, n1) = read_varuint(data)?;
    let (count, n2) = read_varuint(&data[n1..])?;
    let mut pos = n1 + n2;
    let mut register = start as u32;
    for _ in 0..count {
        let (value, consumed) = Value::read(type_index, &data[pos..])?;
        pos += consumed;
        if let Some(backend) = backend.as_deref_mut() {
            let error = backend.write(register, value);
            if error != 0 {
                emit_write_error(response.as_deref_mut(), register, error);
            }
        }
        register += 1;
    }
    Some(pos)
}

fn parse_read_single<B: RegisterBackend>(
    data: &[u8],
    type_index: u8,
    backend: Option<&mut B>,
    response: Option<&mut Vec<u8>>,
) -> Option<usize> {
    let (register, n1) = read_varuint(data)?;
    if let Some(response) = response {
        let result = match backend {
            Some(backend) => backend.read(register as u32, type_index),
            None => Err(ERROR_NO_BACKEND),
        };
        emit_read_result(response, register as u32, result);
    }
    Some(n1)
}

fn parse_read_multiple<B: RegisterBackend>(
    data: &[u8],
    type_index: u8,
    backend: Option<&mut B>,
    response: Option<&mut Vec<u8>>,
) -> Option<usize> {
    let (start, n1) = read_varuint(data)?;
    let (count, n2) = read_varuint(&data[n1..])?;
    let pos = n1 + n2;

    let Some(response) = response else {
        return Some(pos);
    };

    let mark = response.len();
    write_varuint(response, tag::REPLY_MULTIPLE_BASE | u64::from(type_index));
    write_varuint(response, start);
    write_varuint(response, count);

    let mut register = start as u32;
    let mut backend = backend;
    for _ in 0..count {
        let result = match backend.as_deref_mut() {
            Some(b) => b.read(register, type_index),
            None => Err(ERROR_NO_BACKEND),
        };
        match result {
            Ok(value) => value.write(response),
            Err(error) => {
                response.truncate(mark);
                emit_read_error(response, register, error);
                return Some(pos);
            }
        }
        register += 1;
    }

    Some(pos)
}

fn emit_write_error(response: Option<&mut Vec<u8>>, register: u32, error: ErrorCode) {
    let Some(response) = response else { return };
    write_varuint(response, tag::WRITE_ERROR);
    write_varuint(response, u64::from(register));
    write_varuint(response, u64::from(error));
}

fn emit_read_error(response: &mut Vec<u8>, register: u32, error: ErrorCode) {
    write_varuint(response, tag::READ_ERROR);
    write_varuint(response, u64::from(register));
    write_varuint(response, u64::from(error));
}

fn emit_read_result(response: &mut Vec<u8>, register: u32, result: ReadResult) {
    match result {
        Ok(value) => {
            write_varuint(response, tag::REPLY_SINGLE_BASE | u64::from(value.type_index()));
            write_varuint(response, u64::from(register));
            value.write(response);
        }
        Err(error) => emit_read_error(response, register, error),
    }
}
