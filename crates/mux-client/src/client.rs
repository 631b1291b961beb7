//! Client core (§4.D): serializes multi-device traffic over one bus and
//! delivers typed replies.
//!
//! Grounded on `mjlib::multiplex::ThreadedClient::Impl` — in particular
//! `CommandCycle` (fast no-reply path) and `ProcessReply` (correlation
//! loop) in `original_source/mjlib/multiplex/threaded_client.cc`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use mux_subframe::{ClientEvent, RegisterReply, RegisterRequest, Value};
use mux_wire::{CanFdIo, Carrier, CarrierError, Frame};

use crate::config::{ClientConfig, TunnelOptions};
use crate::error::ClientError;
use crate::queue::RequestQueue;
use crate::tunnel::ClientTunnel;

/// One register operation's outcome, as reported by `transmit`.
pub type ReplyItem = (u8, u32, Result<Value, u32>);

pub struct Client<S, T> {
    config: ClientConfig,
    carrier: Arc<AsyncMutex<Carrier<S, T>>>,
    queue: Arc<RequestQueue>,
    max_payload: usize,
}

impl<S, T> Clone for Client<S, T> {
    fn clone(&self) -> Self {
        Client {
            config: self.config.clone(),
            carrier: self.carrier.clone(),
            queue: self.queue.clone(),
            max_payload: self.max_payload,
        }
    }
}

impl<S, T> Client<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: CanFdIo + 'static,
{
    pub fn new(config: ClientConfig, carrier: Carrier<S, T>) -> Self {
        let max_payload = carrier.max_payload();
        Client { config, carrier: Arc::new(AsyncMutex::new(carrier)), queue: Arc::new(RequestQueue::new()), max_payload }
    }

    /// Execute a batch of per-device register requests (§4.D).
    ///
    /// When `want_reply` is `false` every device's frame is sent in a
    /// single `write_multiple` call and this returns immediately. When
    /// `true`, each device is written to and read from in turn, with
    /// replies correlated by `(source_id, dest_id)`.
    pub async fn transmit(
        &self,
        batch: &[(u8, Vec<RegisterRequest>)],
        want_reply: bool,
    ) -> Result<Vec<ReplyItem>, ClientError> {
        let nonce = self.queue.issue_nonce();
        let config = self.config.clone();
        let carrier = self.carrier.clone();
        let batch = batch.to_vec();

        self.queue
            .run(nonce, move || async move {
                if !want_reply {
                    let frames: Vec<Frame> = batch
                        .iter()
                        .map(|(id, ops)| Frame::new(config.source_id, *id, false, encode_ops(ops)))
                        .collect::<Result<_, _>>()?;
                    carrier.lock().await.write_multiple(&frames).await?;
                    return Ok(Vec::new());
                }

                let mut replies = Vec::new();
                for (id, ops) in &batch {
                    let request = Frame::new(config.source_id, *id, true, encode_ops(ops))?;
                    let reply = write_and_await_reply(&carrier, &request, *id, config.source_id, config.default_timeout)
                        .await?;
                    let events = mux_subframe::parse_response(&reply.payload)
                        .ok_or(ClientError::MalformedReply)?;
                    for event in events {
                        if let ClientEvent::Register(register_reply) = event {
                            flatten_into(*id, register_reply, &mut replies);
                        }
                    }
                }
                Ok(replies)
            })
            .await?
    }

    /// Allocate a shared, reference-counted tunnel handle (§4.D).
    pub fn make_tunnel(&self, id: u8, channel: u32, options: TunnelOptions) -> Arc<ClientTunnel<S, T>> {
        Arc::new(ClientTunnel::new(self.clone(), id, channel, options))
    }

    pub(crate) fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub(crate) fn carrier(&self) -> &Arc<AsyncMutex<Carrier<S, T>>> {
        &self.carrier
    }

    pub(crate) fn source_id(&self) -> u8 {
        self.config.source_id
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    pub(crate) fn carrier_max_payload(&self) -> usize {
        self.max_payload
    }
}

/// Write `request`, then read frames until one whose `(source_id,
/// dest_id)` matches `(expect_source, expect_dest)` arrives, silently
/// discarding mismatches, until `deadline` elapses (§4.D).
pub(crate) async fn write_and_await_reply<S, T>(
    carrier: &Arc<AsyncMutex<Carrier<S, T>>>,
    request: &Frame,
    expect_source: u8,
    expect_dest: u8,
    deadline: Duration,
) -> Result<Frame, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    T: CanFdIo,
{
    let mut carrier = carrier.lock().await;
    carrier.write(request).await?;

    let stop_at = Instant::now() + deadline;
    loop {
        let remaining = stop_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ClientError::TimedOut);
        }
        match carrier.read(remaining).await {
            Ok(frame) if frame.source_id == expect_source && frame.dest_id == expect_dest => {
                return Ok(frame);
            }
            Ok(_) => continue,
            Err(CarrierError::TimedOut) => return Err(ClientError::TimedOut),
            Err(e) => return Err(e.into()),
        }
    }
}

fn encode_ops(ops: &[RegisterRequest]) -> Vec<u8> {
    let mut payload = Vec::new();
    for op in ops {
        op.encode(&mut payload);
    }
    payload
}

fn flatten_into(id: u8, reply: RegisterReply, out: &mut Vec<ReplyItem>) {
    match reply {
        RegisterReply::Single { register, value } => out.push((id, register, Ok(value))),
        RegisterReply::WriteError { register, error } | RegisterReply::ReadError { register, error } => {
            out.push((id, register, Err(error)));
        }
        RegisterReply::Multiple { start, values } => {
            for (offset, value) in values.into_iter().enumerate() {
                out.push((id, start + offset as u32, Ok(value)));
            }
        }
    }
}
