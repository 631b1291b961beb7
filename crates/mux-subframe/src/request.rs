//! Client-side encoding of register operations into a frame payload.
//!
//! Grounded on `mjlib::multiplex::threaded_client.cc`'s frame-building
//! helpers (`EncodeRegisterRequest` and friends), reshaped into values
//! that `mux-client` composes into a batch before handing the payload to
//! the wire carrier.

use mux_wire::varint::write_varuint;

use crate::tag;
use crate::value::Value;

/// One register operation to encode into a request payload (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterRequest {
    WriteSingle { register: u32, value: Value },
    WriteMultiple { start: u32, values: Vec<Value> },
    ReadSingle { register: u32, type_index: u8 },
    ReadMultiple { start: u32, count: u32, type_index: u8 },
}

impl RegisterRequest {
    /// Append this operation's subframe encoding to `out`.
    ///
    /// # Panics
    /// Panics if `WriteMultiple` is given an empty `values` or values of
    /// mixed type (both are caller bugs, never produced by `mux-client`).
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RegisterRequest::WriteSingle { register, value } => {
                write_varuint(out, tag::WRITE_SINGLE_BASE | u64::from(value.type_index()));
                write_varuint(out, u64::from(*register));
                value.write(out);
            }
            RegisterRequest::WriteMultiple { start, values } => {
                assert!(!values.is_empty(), "write_multiple requires at least one value");
                let type_index = values[0].type_index();
                assert!(
                    values.iter().all(|v| v.type_index() == type_index),
                    "write_multiple requires a uniform value type"
                );
                write_varuint(out, tag::WRITE_MULTIPLE_BASE | u64::from(type_index));
                write_varuint(out, u64::from(*start));
                write_varuint(out, values.len() as u64);
                for value in values {
                    value.write(out);
                }
            }
            RegisterRequest::ReadSingle { register, type_index } => {
                write_varuint(out, tag::READ_SINGLE_BASE | u64::from(*type_index));
                write_varuint(out, u64::from(*register));
            }
            RegisterRequest::ReadMultiple { start, count, type_index } => {
                write_varuint(out, tag::READ_MULTIPLE_BASE | u64::from(*type_index));
                write_varuint(out, u64::from(*start));
                write_varuint(out, u64::from(*count));
            }
        }
    }
}

/// Append a tunnel `ClientToServer` subframe carrying `data` for
/// `channel`.
pub fn encode_client_to_server(out: &mut Vec<u8>, channel: u32, data: &[u8]) {
    write_varuint(out, tag::CLIENT_TO_SERVER);
    write_varuint(out, u64::from(channel));
    write_varuint(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// Append a tunnel `ClientPollServer` subframe requesting up to
/// `max_bytes` of pending outbound tunnel data for `channel`.
pub fn encode_client_poll_server(out: &mut Vec<u8>, channel: u32, max_bytes: u32) {
    write_varuint(out, tag::CLIENT_POLL_SERVER);
    write_varuint(out, u64::from(channel));
    write_varuint(out, u64::from(max_bytes));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_single_matches_hand_encoding() {
        let mut out = Vec::new();
        RegisterRequest::WriteSingle { register: 1, value: Value::Int8(5) }.encode(&mut out);
        assert_eq!(out, vec![tag::WRITE_SINGLE_BASE as u8, 1, 5]);
    }

    #[test]
    fn read_multiple_matches_hand_encoding() {
        let mut out = Vec::new();
        RegisterRequest::ReadMultiple { start: 0, count: 3, type_index: 2 }.encode(&mut out);
        assert_eq!(out, vec![(tag::READ_MULTIPLE_BASE | 2) as u8, 0, 3]);
    }

    #[test]
    fn client_to_server_frames_length_prefixed_payload() {
        let mut out = Vec::new();
        encode_client_to_server(&mut out, 2, b"hi");
        assert_eq!(out, vec![tag::CLIENT_TO_SERVER as u8, 2, 2, b'h', b'i']);
    }
}
