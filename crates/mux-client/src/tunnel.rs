//! Client-side tunnel handle (§4.D, §4.E).
//!
//! Unlike the server's tunnel pool, the client holds no persistent
//! receive queue: every byte moved is driven by an explicit poll or
//! write request through the shared request queue. The client owns the
//! canonical per-channel bookkeeping (here, none beyond id/channel/
//! options); `ClientTunnel` itself is a thin, non-owning handle that
//! delegates back into the client on every call.
//!
//! Grounded on `mjlib::multiplex::ThreadedClient::Impl::CycleTunnel`
//! (`original_source/mjlib/multiplex/threaded_client.cc`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use mux_subframe::{encode_client_poll_server, encode_client_to_server, ClientEvent};
use mux_wire::{CanFdIo, Frame};

use crate::client::{write_and_await_reply, Client};
use crate::config::TunnelOptions;
use crate::error::ClientError;

/// Reserved bytes subtracted from the carrier's max payload when sizing
/// a `ClientToServer` chunk: tag + channel + length varuints (§4.D).
const CHUNK_OVERHEAD: usize = 3 * mux_wire::varint::MAX_VARUINT_SIZE;

pub struct ClientTunnel<S, T> {
    client: Client<S, T>,
    id: u8,
    channel: u32,
    options: TunnelOptions,
    cancelled: AtomicBool,
}

impl<S, T> ClientTunnel<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: CanFdIo + 'static,
{
    pub(crate) fn new(client: Client<S, T>, id: u8, channel: u32, options: TunnelOptions) -> Self {
        ClientTunnel { client, id, channel, options, cancelled: AtomicBool::new(false) }
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Cancel any in-flight `read`/`write` loop on this handle (§4.D).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Poll the server for up to `buf.len()` bytes, blocking until at
    /// least one byte is delivered or the tunnel is cancelled (§4.D).
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, ClientError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(ClientError::Cancelled);
            }
            let quota = buf.len().min(self.max_chunk());
            let data = self.poll_once(quota as u32).await?;
            if !data.is_empty() {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok(n);
            }
            tokio::time::sleep(self.options.poll_period).await;
        }
    }

    /// Send `data`, chunked to the carrier's frame size, returning once
    /// every chunk has been written. Zero-length writes are a no-op
    /// that generates no wire traffic (§4.E).
    pub async fn write(&self, data: &[u8]) -> Result<usize, ClientError> {
        if data.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.max_chunk();
        for chunk in data.chunks(chunk_size) {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(ClientError::Cancelled);
            }
            let nonce = self.client.queue().issue_nonce();
            let client = self.client.clone();
            let id = self.id;
            let channel = self.channel;
            let chunk = chunk.to_vec();
            self.client
                .queue()
                .run(nonce, move || async move {
                    let mut payload = Vec::new();
                    encode_client_to_server(&mut payload, channel, &chunk);
                    let frame = Frame::new(client.source_id(), id, false, payload)?;
                    client.carrier().lock().await.write(&frame).await?;
                    Ok::<(), ClientError>(())
                })
                .await??;
        }
        Ok(data.len())
    }

    /// One poll cycle: send `ClientPollServer`, wait (with retry on
    /// timeout) for a correlated reply, and extract this tunnel's
    /// `ServerToClient` payload, if any (§4.D step 1-3).
    async fn poll_once(&self, max_bytes: u32) -> Result<Vec<u8>, ClientError> {
        let nonce = self.client.queue().issue_nonce();
        let client = self.client.clone();
        let id = self.id;
        let channel = self.channel;
        let timeout = client.default_timeout();

        let outcome = self
            .client
            .queue()
            .run(nonce, move || async move {
                let mut payload = Vec::new();
                encode_client_poll_server(&mut payload, channel, max_bytes);
                let frame = Frame::new(client.source_id(), id, true, payload)?;
                match write_and_await_reply(client.carrier(), &frame, id, client.source_id(), timeout).await {
                    Ok(reply) => {
                        let events = mux_subframe::parse_response(&reply.payload).ok_or(ClientError::MalformedReply)?;
                        for event in events {
                            if let ClientEvent::Tunnel { channel: c, data } = event {
                                if c == channel {
                                    return Ok(data);
                                }
                            }
                        }
                        Ok(Vec::new())
                    }
                    Err(ClientError::TimedOut) => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            })
            .await??;

        Ok(outcome)
    }

    fn max_chunk(&self) -> usize {
        self.client.carrier_max_payload().saturating_sub(CHUNK_OVERHEAD).max(1)
    }
}
