//! Server core (§4.C): ties the frame codec, subframe engine, register
//! backend, and tunnel pool into a single reactive object.
//!
//! Grounded on `mjlib::multiplex::MicroServer::Impl::Poll`
//! (`original_source/mjlib/multiplex/micro_server.cc`), reshaped from the
//! original's cooperative-scheduling `AsyncCallback` chain into a tokio
//! receive loop over a shared, mutex-guarded carrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use mux_subframe::{EngineStats, RegisterBackend};
use mux_wire::{CanFdIo, Carrier, CarrierError, Frame, BROADCAST_ID, MAX_FRAME_OVERHEAD};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::stats::Stats;
use crate::tunnel::{MakeTunnelError, TunnelPool, TunnelStream};

/// Depth of the queue handed to `read_unknown` subscribers (§4.C).
const UNKNOWN_QUEUE_CAPACITY: usize = 16;

/// Out-of-band handle onto the server's carrier, serialized against the
/// receive loop's own response writes by sharing the same mutex.
pub struct RawWriter<S, T> {
    carrier: Arc<AsyncMutex<Carrier<S, T>>>,
}

impl<S, T> RawWriter<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    T: CanFdIo,
{
    pub async fn write(&self, frame: &Frame) -> Result<(), CarrierError> {
        self.carrier.lock().await.write(frame).await
    }
}

impl<S, T> Clone for RawWriter<S, T> {
    fn clone(&self) -> Self {
        RawWriter { carrier: self.carrier.clone() }
    }
}

pub struct Server<S, T, B> {
    config: ServerConfig,
    carrier: Arc<AsyncMutex<Carrier<S, T>>>,
    backend: Arc<Mutex<B>>,
    tunnels: Arc<Mutex<TunnelPool>>,
    stats: Arc<Mutex<Stats>>,
    write_outstanding: Arc<AtomicBool>,
    unknown_tx: mpsc::Sender<Frame>,
    unknown_rx: Arc<Mutex<Option<mpsc::Receiver<Frame>>>>,
}

impl<S, T, B> Clone for Server<S, T, B> {
    fn clone(&self) -> Self {
        Server {
            config: self.config.clone(),
            carrier: self.carrier.clone(),
            backend: self.backend.clone(),
            tunnels: self.tunnels.clone(),
            stats: self.stats.clone(),
            write_outstanding: self.write_outstanding.clone(),
            unknown_tx: self.unknown_tx.clone(),
            unknown_rx: self.unknown_rx.clone(),
        }
    }
}

impl<S, T, B> Server<S, T, B>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: CanFdIo + 'static,
    B: RegisterBackend + Send + 'static,
{
    /// The Rust-idiomatic rendering of `configure(id, register_backend)`:
    /// construction, rather than post-construction mutation, since `id`
    /// and the backend never change for the life of a `Server`.
    pub fn new(config: ServerConfig, carrier: Carrier<S, T>, backend: B) -> Result<Self, ServerError> {
        if config.id > BROADCAST_ID {
            return Err(ServerError::IdOutOfRange(config.id));
        }
        let (unknown_tx, unknown_rx) = mpsc::channel(UNKNOWN_QUEUE_CAPACITY);
        Ok(Server {
            tunnels: Arc::new(Mutex::new(TunnelPool::new(config.tunnel_pool_size))),
            carrier: Arc::new(AsyncMutex::new(carrier)),
            backend: Arc::new(Mutex::new(backend)),
            stats: Arc::new(Mutex::new(Stats::default())),
            write_outstanding: Arc::new(AtomicBool::new(false)),
            unknown_tx,
            unknown_rx: Arc::new(Mutex::new(Some(unknown_rx))),
            config,
        })
    }

    /// Allocate a tunnel endpoint from the fixed pool.
    pub fn make_tunnel(&self, channel_id: u32) -> Result<TunnelStream, MakeTunnelError> {
        self.tunnels.lock().unwrap().make_tunnel(channel_id)
    }

    /// Take the receiver side of the `read_unknown` queue. Returns `None`
    /// if already taken — only one subscriber is supported at a time.
    pub fn take_unknown_receiver(&self) -> Option<mpsc::Receiver<Frame>> {
        self.unknown_rx.lock().unwrap().take()
    }

    /// An out-of-band write handle, serialized against the receive
    /// loop's own response emission via the shared carrier mutex.
    pub fn raw_write_stream(&self) -> RawWriter<S, T> {
        RawWriter { carrier: self.carrier.clone() }
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock().unwrap()
    }

    /// Run the receive loop until a fatal I/O error occurs.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut response = Vec::with_capacity(self.config.response_capacity);

        loop {
            let frame = {
                let mut carrier = self.carrier.lock().await;
                match carrier.read(self.config.recv_idle_timeout).await {
                    Ok(frame) => frame,
                    Err(CarrierError::TimedOut) => continue,
                    Err(e) => return Err(e.into()),
                }
            };

            if frame.dest_id != self.config.id && frame.dest_id != BROADCAST_ID {
                self.stats.lock().unwrap().wrong_id_frames += 1;
                self.forward_unknown(frame);
                continue;
            }

            if frame.dest_id == BROADCAST_ID {
                self.forward_unknown(frame.clone());
            }

            let wants_reply = frame.request_reply && frame.dest_id != BROADCAST_ID;
            let can_respond = wants_reply && !self.write_outstanding.swap(true, Ordering::AcqRel);

            response.clear();
            let mut engine_stats = EngineStats::default();
            {
                let mut backend = self.backend.lock().unwrap();
                let mut tunnels = self.tunnels.lock().unwrap();
                mux_subframe::process_payload(
                    &frame.payload,
                    Some(&mut *backend),
                    &mut *tunnels,
                    if can_respond { Some(&mut response) } else { None },
                    self.config.response_capacity,
                    &mut engine_stats,
                );
            }
            self.stats.lock().unwrap().absorb_engine(engine_stats);

            if can_respond {
                let reply = frame.reply_with(response.clone());
                let carrier = self.carrier.clone();
                let write_outstanding = self.write_outstanding.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    if let Err(error) = carrier.lock().await.write(&reply).await {
                        warn!(%error, "server response write failed");
                        stats.lock().unwrap().write_errors += 1;
                    }
                    write_outstanding.store(false, Ordering::Release);
                });
            }
        }
    }

    fn forward_unknown(&self, frame: Frame) {
        // Best-effort: a full queue means no subscriber is keeping up,
        // and dropping the frame is preferable to stalling the bus.
        let _ = self.unknown_tx.try_send(frame);
    }
}
