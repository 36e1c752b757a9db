use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use replymatch_core::{
    completion, CodecStage, Completion, Inbound, MatchRegistry, Message, MessageCodec,
    ReadContext, Session, SessionHandle, SessionId, SessionInfo, Sweeper, WriteContext,
};
use replymatch_packet::{Packet, PacketConfig, PacketError, PacketReader, PacketWriter};
use tracing::{debug, info, trace, warn};

use crate::error::{PeerError, Result};
use crate::transport::Transport;

/// Inbound messages buffered for [`Connection::recv`] by default.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Connection behavior.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reply timeout for [`Connection::request`].
    ///
    /// `None` leaves the choice to the stage, which uses
    /// [`replymatch_core::DEFAULT_TIMEOUT`].
    pub request_timeout: Option<Duration>,
    /// Inbound messages kept for `recv`. Once full, the oldest is dropped.
    pub inbox_capacity: usize,
    /// Keep the stage's registry swept so overdue requests expire.
    ///
    /// Connections on one registry share a single sweeper thread. Turn this
    /// off when the registry is already swept elsewhere.
    pub sweep_expired: bool,
    pub packet: PacketConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            sweep_expired: true,
            packet: PacketConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_packet_config(mut self, packet: PacketConfig) -> Self {
        self.packet = packet;
        self
    }

    pub fn without_sweeper(mut self) -> Self {
        self.sweep_expired = false;
        self
    }
}

/// One duplex stream driven through a [`CodecStage`].
///
/// All methods take `&self`; a connection can be shared between threads that
/// issue requests concurrently. Dropping it closes the stream.
pub struct Connection<T, C, S: Transport> {
    session: SessionHandle,
    stage: Arc<CodecStage<T, C>>,
    registry: Arc<MatchRegistry<T, T>>,
    writer: Mutex<PacketWriter<S>>,
    control: S,
    inbox: Receiver<Inbound<T>>,
    closed: AtomicBool,
    reader_done: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<Arc<Sweeper>>>,
}

impl<T, C, S> Connection<T, C, S>
where
    T: Message + Default + Clone + Send + Sync + 'static,
    C: MessageCodec<T> + 'static,
    S: Transport,
{
    /// Take ownership of `stream` and start the reader thread.
    ///
    /// Each connection is its own correlation session; several connections
    /// may share one stage.
    pub fn spawn(
        stream: S,
        stage: Arc<CodecStage<T, C>>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let mut info = SessionInfo::new();
        info.timeout = config.request_timeout;
        let session = info.into_handle();
        let id = session.id();

        stream.set_write_timeout(config.packet.write_timeout)?;
        let read_half = stream.try_clone()?;
        // A read timeout makes an idle connection tear itself down.
        read_half.set_read_timeout(config.packet.read_timeout)?;
        let control = stream.try_clone()?;
        let transport = stream.transport_name();

        let sweeper = if config.sweep_expired {
            Some(Sweeper::shared(stage.registry())?)
        } else {
            None
        };

        let (tx, inbox) = crossbeam_channel::bounded(config.inbox_capacity.max(1));
        let reader_done = Arc::new(AtomicBool::new(false));
        let read_loop = ReadLoop {
            reader: PacketReader::with_config(read_half, config.packet.clone()),
            stage: Arc::clone(&stage),
            session: Arc::clone(&session),
            inbox: tx,
            overflow: inbox.clone(),
            done: Arc::clone(&reader_done),
        };
        let reader = thread::Builder::new()
            .name(format!("replymatch-{id}"))
            .spawn(move || read_loop.run())?;

        info!(session = %id, transport, "connection established");

        Ok(Self {
            registry: Arc::clone(stage.registry()),
            session,
            stage,
            writer: Mutex::new(PacketWriter::with_config(stream, config.packet)),
            control,
            inbox,
            closed: AtomicBool::new(false),
            reader_done,
            reader: Mutex::new(Some(reader)),
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Write `message` without expecting a reply.
    ///
    /// A message the codec cannot encode is silently skipped.
    pub fn send(&self, message: T) -> Result<()> {
        self.ensure_open()?;
        let mut ctx = WriteContext::new(Arc::clone(&self.session));
        match self.stage.write(&mut ctx, message) {
            Some(packet) => self.write_packet(&packet),
            None => {
                trace!(session = %self.session.id(), "nothing encoded, skipping send");
                Ok(())
            }
        }
    }

    /// Write `message` and return a handle that resolves with its reply.
    ///
    /// The request is registered before any byte hits the socket, so a fast
    /// reply cannot slip past. If the write fails the registration is
    /// withdrawn and the error returned. The completion fails with
    /// [`MatchError::Timeout`](replymatch_core::MatchError::Timeout) when no
    /// reply arrives in time, or
    /// [`MatchError::ConnectionClosed`](replymatch_core::MatchError::ConnectionClosed)
    /// when the connection goes down first.
    pub fn request(&self, message: T) -> Result<Completion<T>> {
        self.ensure_open()?;
        let (completer, completion) = completion();
        let mut ctx = WriteContext::expecting_reply(Arc::clone(&self.session), completer);
        let packet = self.stage.write(&mut ctx, message);

        // The reader may have torn down between the open check and registration.
        if self.reader_done.load(Ordering::Acquire) {
            self.registry.cancel_session(self.session.id());
        }
        if let Some(packet) = packet {
            if let Err(err) = self.write_packet(&packet) {
                // Nothing reached the peer, so no reply can ever arrive.
                if let Some(seq) = ctx.registered() {
                    self.registry.cancel(self.session.id(), seq);
                }
                return Err(err);
            }
        }
        Ok(completion)
    }

    /// [`request`](Self::request) and block for the reply.
    pub fn call(&self, message: T) -> Result<T> {
        Ok(self.request(message)?.wait()?)
    }

    /// Next inbound message, blocking until one arrives.
    ///
    /// Replies that resolved a request are delivered here too. Once the
    /// stream is gone and the inbox drained this returns
    /// [`PeerError::Disconnected`].
    pub fn recv(&self) -> Result<Inbound<T>> {
        self.inbox.recv().map_err(|_| self.disconnected())
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Inbound<T>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(inbound) => Ok(inbound),
            Err(RecvTimeoutError::Timeout) => Err(PeerError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    pub fn try_recv(&self) -> Option<Inbound<T>> {
        self.inbox.try_recv().ok()
    }

    pub fn stage(&self) -> &Arc<CodecStage<T, C>> {
        &self.stage
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_packet(packet)?;
        Ok(())
    }
}

impl<T, C, S: Transport> Connection<T, C, S> {
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Requests on this connection still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.registry.pending(self.session.id())
    }

    /// Whether the connection was closed locally or by the peer.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.reader_done.load(Ordering::Acquire)
    }

    /// Shut the stream down and fail every pending request with
    /// `ConnectionClosed`. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let id = self.session.id();
        if let Err(err) = self.control.shutdown() {
            trace!(session = %id, error = %err, "shutdown on already-closed stream");
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            let _ = reader.join();
        }
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let cancelled = self.registry.cancel_session(id);
        debug!(session = %id, cancelled, "connection closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.disconnected());
        }
        Ok(())
    }

    fn disconnected(&self) -> PeerError {
        PeerError::Disconnected(format!("{} is closed", self.session.id()))
    }
}

impl<T, C, S: Transport> Drop for Connection<T, C, S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T, C, S: Transport> std::fmt::Debug for Connection<T, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session.id())
            .field("transport", &self.control.transport_name())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

/// State owned by the reader thread.
struct ReadLoop<T, C, S> {
    reader: PacketReader<S>,
    stage: Arc<CodecStage<T, C>>,
    session: SessionHandle,
    inbox: Sender<Inbound<T>>,
    overflow: Receiver<Inbound<T>>,
    done: Arc<AtomicBool>,
}

impl<T, C, S> ReadLoop<T, C, S>
where
    T: Message + Default + Clone + Send + Sync + 'static,
    C: MessageCodec<T>,
    S: Transport,
{
    fn run(mut self) {
        let id = self.session.id();
        let reason = loop {
            let packet = match self.reader.read_packet() {
                Ok(packet) => packet,
                Err(PacketError::ConnectionClosed) => break "stream closed",
                Err(err) => {
                    warn!(session = %id, error = %err, "read failed, tearing down connection");
                    break "read error";
                }
            };

            let mut ctx = ReadContext::new(Arc::clone(&self.session));
            let inbound = self.stage.read(&mut ctx, &packet);
            self.deliver(inbound);
            if let Some(decoded) = ctx.message().cloned() {
                self.stage.read_complete(&mut ctx, &decoded);
            }
        };

        self.done.store(true, Ordering::Release);
        let cancelled = self.stage.registry().cancel_session(id);
        debug!(session = %id, reason, cancelled, "reader stopped");
    }

    fn deliver(&self, mut inbound: Inbound<T>) {
        loop {
            match self.inbox.try_send(inbound) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.overflow.try_recv();
                    warn!(
                        session = %self.session.id(),
                        "inbox full, dropped oldest inbound message"
                    );
                    inbound = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}
