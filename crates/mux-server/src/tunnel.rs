//! Server-side tunnel endpoints (§3 "Tunnel", §4.E).
//!
//! Each endpoint owns a bounded receive queue fed by the subframe engine
//! and a single pending write buffer drained into outbound
//! `ServerToClient` subframes. Grounded on
//! `mjlib::multiplex::MicroServer`'s `tunnel_` array
//! (`original_source/mjlib/multiplex/micro_server.cc`), reshaped around
//! `tokio::sync::Notify` instead of the original's interrupt-driven
//! polling loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Notify;

use mux_subframe::{TunnelBackend, TunnelDeliverResult};

/// Default receive-queue depth per tunnel, matching the original's fixed
/// 128-byte buffer.
pub const DEFAULT_RECV_CAPACITY: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TunnelError {
    #[error("tunnel operation cancelled")]
    Cancelled,
}

struct Slot {
    channel: u32,
    recv_queue: Mutex<VecDeque<u8>>,
    recv_capacity: usize,
    pending_write: Mutex<Option<Vec<u8>>>,
    data_ready: Notify,
    write_drained: Notify,
    cancelled: AtomicBool,
    cancel_signal: Notify,
}

/// A server-side handle to one tunnel endpoint. Clones share the same
/// underlying queues (the pool retains its own clone so the engine can
/// keep dispatching even after every public handle is dropped).
#[derive(Clone)]
pub struct TunnelStream {
    inner: Arc<Slot>,
}

impl TunnelStream {
    pub fn channel(&self) -> u32 {
        self.inner.channel
    }

    /// Copy up to `buf.len()` bytes out of the receive queue, blocking
    /// until at least one byte is available. May complete partially.
    /// Zero-length reads complete immediately with `Ok(0)`.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.inner.cancelled.load(Ordering::Acquire) {
                return Err(TunnelError::Cancelled);
            }
            {
                let mut queue = self.inner.recv_queue.lock().unwrap();
                if !queue.is_empty() {
                    let n = buf.len().min(queue.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = queue.pop_front().expect("checked non-empty");
                    }
                    return Ok(n);
                }
            }
            tokio::select! {
                () = self.inner.data_ready.notified() => {}
                () = self.inner.cancel_signal.notified() => {}
            }
        }
    }

    /// Hand `data` to the tunnel for outbound delivery, completing once
    /// every byte has drained onto the wire. Zero-length writes complete
    /// immediately with `Ok(0)` and generate no wire traffic.
    pub async fn write(&self, data: &[u8]) -> Result<usize, TunnelError> {
        if data.is_empty() {
            return Ok(0);
        }
        {
            let mut pending = self.inner.pending_write.lock().unwrap();
            *pending = Some(data.to_vec());
        }
        loop {
            if self.inner.cancelled.load(Ordering::Acquire) {
                return Err(TunnelError::Cancelled);
            }
            {
                let pending = self.inner.pending_write.lock().unwrap();
                if pending.is_none() {
                    return Ok(data.len());
                }
            }
            tokio::select! {
                () = self.inner.write_drained.notified() => {}
                () = self.inner.cancel_signal.notified() => {}
            }
        }
    }

    /// Cancel any in-flight `read`/`write` on this handle (or any clone
    /// of it — cancellation is shared state).
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.cancel_signal.notify_waiters();
    }
}

/// The server's fixed-size tunnel pool, and the `TunnelBackend`
/// implementation the subframe engine dispatches against.
pub struct TunnelPool {
    slots: Vec<Option<Arc<Slot>>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MakeTunnelError {
    #[error("channel 0 is reserved and cannot be tunneled")]
    ChannelZeroReserved,
    #[error("channel {0} already has a tunnel allocated")]
    AlreadyAllocated(u32),
    #[error("tunnel pool exhausted")]
    PoolExhausted,
}

impl TunnelPool {
    pub fn new(capacity: usize) -> Self {
        TunnelPool { slots: (0..capacity).map(|_| None).collect() }
    }

    pub fn make_tunnel(&mut self, channel_id: u32) -> Result<TunnelStream, MakeTunnelError> {
        if channel_id == 0 {
            return Err(MakeTunnelError::ChannelZeroReserved);
        }
        if self.slots.iter().flatten().any(|s| s.channel == channel_id) {
            return Err(MakeTunnelError::AlreadyAllocated(channel_id));
        }
        let free = self.slots.iter_mut().find(|s| s.is_none()).ok_or(MakeTunnelError::PoolExhausted)?;
        let inner = Arc::new(Slot {
            channel: channel_id,
            recv_queue: Mutex::new(VecDeque::with_capacity(DEFAULT_RECV_CAPACITY)),
            recv_capacity: DEFAULT_RECV_CAPACITY,
            pending_write: Mutex::new(None),
            data_ready: Notify::new(),
            write_drained: Notify::new(),
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
        });
        *free = Some(inner.clone());
        Ok(TunnelStream { inner })
    }

    fn find(&self, channel: u32) -> Option<&Arc<Slot>> {
        self.slots.iter().flatten().find(|s| s.channel == channel)
    }
}

impl TunnelBackend for TunnelPool {
    fn deliver(&mut self, channel: u32, data: &[u8]) -> TunnelDeliverResult {
        let Some(slot) = self.find(channel) else {
            return TunnelDeliverResult::UnknownChannel;
        };
        let mut queue = slot.recv_queue.lock().unwrap();
        let room = slot.recv_capacity.saturating_sub(queue.len());
        let accepted = room.min(data.len());
        queue.extend(data[..accepted].iter().copied());
        slot.data_ready.notify_waiters();
        if accepted < data.len() {
            TunnelDeliverResult::Overrun
        } else {
            TunnelDeliverResult::Delivered
        }
    }

    fn has_channel(&self, channel: u32) -> bool {
        self.find(channel).is_some()
    }

    fn drain_pending_write(&mut self, channel: u32, max_bytes: usize) -> Vec<u8> {
        let Some(slot) = self.find(channel) else {
            return Vec::new();
        };
        let mut pending = slot.pending_write.lock().unwrap();
        let Some(buf) = pending.as_mut() else {
            return Vec::new();
        };
        let take = max_bytes.min(buf.len());
        let chunk: Vec<u8> = buf.drain(..take).collect();
        if buf.is_empty() {
            *pending = None;
            slot.write_drained.notify_waiters();
        }
        chunk
    }
}
