// ABOUTME: Per-connection engine: lifecycle, reader task, dispatch, request/response APIs
// ABOUTME: Either peer may originate requests and must answer requests addressed to it

use crate::codec::Encodable;
use crate::correlator::Correlator;
use crate::error::Error;
use crate::frame::Frame;
use crate::message::{Request, Response, StatusCode};
use crate::registry::MethodRegistry;
use crate::shutdown::Shutdown;
use crate::transport::{FrameReader, FrameWriter};
use bytes::Bytes;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

/// One end of an established SRFC session.
///
/// Symmetric: each peer can send requests with [`send_request`] and answers
/// incoming requests through handlers registered with [`add_method`]. A
/// connection is either *deferred* (transport attached, reader not yet
/// started) or live; handlers are installed during the deferred phase, then
/// [`invoke_deferred`] starts the reader with a snapshot of the registry.
///
/// After [`shutdown`] the connection may be connected again; the background
/// tasks are respawned for the new transport.
///
/// Dropping a live connection signals its background tasks to stop; the
/// transport is half-closed on the way out.
///
/// [`send_request`]: Connection::send_request
/// [`add_method`]: Connection::add_method
/// [`invoke_deferred`]: Connection::invoke_deferred
/// [`shutdown`]: Connection::shutdown
#[derive(Debug, Default)]
pub struct Connection {
    registry: MethodRegistry,
    shared: Arc<Shared>,

    /// Transport adopted but reader not yet started (the deferred phase).
    pending_reader: Option<FrameReader<OwnedReadHalf>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    notify_shutdown: Option<broadcast::Sender<()>>,

    response_timeout: Option<Duration>,
}

/// State shared with the reader/writer tasks and spawned pipelines.
#[derive(Debug, Default)]
struct Shared {
    connected: AtomicBool,
    correlator: Correlator,
    write_queue: Mutex<Option<mpsc::UnboundedSender<WriteJob>>>,
}

/// One serialized frame queued for the writer task.
#[derive(Debug)]
struct WriteJob {
    frame: Bytes,
    /// Present for caller-observed sends; `None` for fire-and-forget
    /// responses from the dispatch pipeline.
    done: Option<oneshot::Sender<crate::Result<()>>>,
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Enqueue a frame for the writer task. False when the queue is gone,
    /// i.e. the connection is down.
    fn send_job(&self, job: WriteJob) -> bool {
        let queue = self.write_queue.lock().unwrap();
        match queue.as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    fn install_queue(&self, tx: mpsc::UnboundedSender<WriteJob>) {
        *self.write_queue.lock().unwrap() = Some(tx);
    }

    fn clear_queue(&self) {
        *self.write_queue.lock().unwrap() = None;
    }

    /// The reader's half of shutdown, used when the peer closes orderly:
    /// flips the flag, releases the writer, and wakes every awaiter with
    /// `connection_error`.
    fn disconnect_local(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.clear_queue();
        self.correlator.disconnect();
    }
}

impl Connection {
    /// Create a connection with no transport and no reader.
    pub fn new() -> Connection {
        Connection::default()
    }

    /// Establish a TCP transport to `addr`.
    ///
    /// Unless `deferred`, the reader starts immediately. Fails with
    /// `InvalidState` if already connected.
    pub async fn connect<T: ToSocketAddrs>(&mut self, addr: T, deferred: bool) -> crate::Result<()> {
        if self.is_connected() {
            return Err(Error::invalid_state("already connected"));
        }
        let stream = TcpStream::connect(addr).await?;
        self.adopt(stream, deferred)
    }

    /// Adopt a pre-established stream, as the listener does for accepted
    /// connections. Same semantics as [`connect`](Connection::connect).
    pub fn adopt(&mut self, stream: TcpStream, deferred: bool) -> crate::Result<()> {
        if self.is_connected() {
            return Err(Error::invalid_state("already connected"));
        }

        let (read_half, write_half) = stream.into_split();
        let (notify_tx, _) = broadcast::channel(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        self.shared.install_queue(queue_tx);
        self.writer_task = Some(tokio::spawn(run_writer(
            FrameWriter::new(write_half),
            queue_rx,
            Shutdown::new(notify_tx.subscribe()),
        )));
        self.pending_reader = Some(FrameReader::new(read_half));
        self.notify_shutdown = Some(notify_tx);

        self.shared.correlator.reconnect();
        self.shared.connected.store(true, Ordering::SeqCst);

        if !deferred {
            self.invoke_deferred()?;
        }
        Ok(())
    }

    /// Start the reader on the adopted transport.
    ///
    /// A no-op when the reader is already running; fails with `InvalidState`
    /// when no transport has been attached.
    pub fn invoke_deferred(&mut self) -> crate::Result<()> {
        let Some(frames) = self.pending_reader.take() else {
            if self.reader_task.is_some() {
                return Ok(());
            }
            return Err(Error::invalid_state("no transport; connect first"));
        };
        let Some(notify) = &self.notify_shutdown else {
            return Err(Error::invalid_state("no transport; connect first"));
        };

        // The reader runs against a snapshot; later registry mutation does
        // not reach a live connection.
        let registry = Arc::new(self.registry.clone());
        self.reader_task = Some(tokio::spawn(run_reader(
            frames,
            Arc::clone(&self.shared),
            registry,
            Shutdown::new(notify.subscribe()),
        )));
        Ok(())
    }

    /// Register a handler for `method`. Install handlers before the reader
    /// starts; a live reader keeps dispatching from its snapshot.
    pub fn add_method<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[(String, String)], &Bytes) -> (StatusCode, Bytes) + Send + Sync + 'static,
    {
        self.registry.add_method(method, handler);
    }

    pub fn remove_method(&mut self, method: &str) -> bool {
        self.registry.remove_method(method)
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.registry.has_method(method)
    }

    /// Replace the whole registry, as the listener does when onboarding an
    /// accepted connection.
    pub(crate) fn install_registry(&mut self, registry: MethodRegistry) {
        self.registry = registry;
    }

    /// Snapshot of the connected flag.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Cap the time a [`ResponseFuture`] waits before resolving to a
    /// synthetic `response_timeout` (504) response. `None` (the default)
    /// waits until response or disconnect.
    pub fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    /// Send a request to the peer.
    ///
    /// Returns a [`ResponseFuture`] resolving to the correlated response.
    /// The write itself happens asynchronously; if it fails, the future
    /// resolves to a synthetic `connection_error` (503) response. Fails with
    /// `InvalidState` if not connected.
    pub fn send_request(&self, request: &Request) -> crate::Result<ResponseFuture> {
        if !self.is_connected() {
            return Err(Error::invalid_state("not connected"));
        }

        let id = request.id();
        // Subscribe before the bytes can hit the wire so the response can
        // never race the waiter.
        let rx = self.shared.correlator.subscribe(id);

        let (done_tx, done_rx) = oneshot::channel();
        let job = WriteJob {
            frame: request.to_frame_bytes(),
            done: Some(done_tx),
        };

        if self.shared.send_job(job) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                match done_rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => {
                        shared
                            .correlator
                            .deposit(Response::with_status(id, StatusCode::ConnectionError));
                    }
                }
            });
        } else {
            self.shared
                .correlator
                .deposit(Response::with_status(id, StatusCode::ConnectionError));
        }

        Ok(ResponseFuture {
            id,
            timeout: self.response_timeout,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Send a response to the peer.
    ///
    /// Returns a [`SendFuture`] resolved when the write completes. Fails
    /// with `InvalidState` if not connected.
    pub fn send_response(&self, response: &Response) -> crate::Result<SendFuture> {
        if !self.is_connected() {
            return Err(Error::invalid_state("not connected"));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let job = WriteJob {
            frame: response.to_frame_bytes(),
            done: Some(done_tx),
        };
        if !self.shared.send_job(job) {
            return Err(Error::ConnectionClosed);
        }
        Ok(SendFuture { rx: done_rx })
    }

    /// Shut the connection down.
    ///
    /// Flips the connected flag, signals the background tasks, half-closes
    /// the transport, waits until the reader is demonstrably past its last
    /// frame's effects, then wakes every awaiter with `connection_error` and
    /// discards queued responses. Fails with `InvalidState` if not
    /// connected.
    pub async fn shutdown(&mut self) -> crate::Result<()> {
        if !self.is_connected() {
            return Err(Error::invalid_state("not connected"));
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.clear_queue();
        self.pending_reader = None;
        if let Some(notify) = self.notify_shutdown.take() {
            let _ = notify.send(());
        }

        if let Some(reader) = self.reader_task.take() {
            let _ = reader.await;
        }
        if let Some(writer) = self.writer_task.take() {
            let _ = writer.await;
        }

        self.shared.correlator.disconnect();
        Ok(())
    }

    /// Shutdown if connected, then clear the method registry.
    pub async fn reset(&mut self) -> crate::Result<()> {
        if self.is_connected() {
            self.shutdown().await?;
        }
        self.registry.clear();
        Ok(())
    }
}

/// Resolves to the response correlated with one sent request.
///
/// Resolution is "response or disconnect": a disconnect (local or peer)
/// yields a synthetic `connection_error` (503) response, and a configured
/// response timeout yields `response_timeout` (504). Await it directly, or
/// keep it around and query [`id`](ResponseFuture::id) first.
#[derive(Debug)]
pub struct ResponseFuture {
    id: u64,
    timeout: Option<Duration>,
    rx: oneshot::Receiver<Response>,
    shared: Arc<Shared>,
}

impl ResponseFuture {
    /// Id of the request this future answers for.
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn wait(self) -> Response {
        let ResponseFuture {
            id,
            timeout,
            rx,
            shared,
        } = self;

        let recv = async move {
            rx.await
                .unwrap_or_else(|_| Response::with_status(id, StatusCode::ConnectionError))
        };
        match timeout {
            None => recv.await,
            Some(window) => match time::timeout(window, recv).await {
                Ok(response) => response,
                Err(_) => {
                    shared.correlator.forget(id);
                    Response::with_status(id, StatusCode::ResponseTimeout)
                }
            },
        }
    }
}

impl IntoFuture for ResponseFuture {
    type Output = Response;
    type IntoFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// Resolves when a sent response has been written to the transport.
#[derive(Debug)]
pub struct SendFuture {
    rx: oneshot::Receiver<crate::Result<()>>,
}

impl IntoFuture for SendFuture {
    type Output = crate::Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = crate::Result<()>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            match self.rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionClosed),
            }
        })
    }
}

/// The per-connection reader: consumes the transport, reassembles frames,
/// and fans each one out to its own task.
async fn run_reader(
    mut frames: FrameReader<OwnedReadHalf>,
    shared: Arc<Shared>,
    registry: Arc<MethodRegistry>,
    mut shutdown: Shutdown,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => return,
            frame = frames.read_frame() => frame,
        };

        let Some(frame) = frame else {
            debug!("peer closed the connection");
            shared.disconnect_local();
            return;
        };

        match frame {
            Frame::Request(request) => {
                debug!(id = request.id(), method = request.method(), "request received");
                let registry = Arc::clone(&registry);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { dispatch_request(request, &registry, &shared) });
            }
            Frame::Response(response) => {
                debug!(id = response.id(), "response received");
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.correlator.deposit(response) });
            }
        }
    }
}

/// Answer one incoming request: look up the handler, run it, send the
/// response back. The send is fire-and-forget; if the link is down the peer
/// cannot be notified anyway.
fn dispatch_request(request: Request, registry: &MethodRegistry, shared: &Shared) {
    let mut response = Response::new(request.id());

    match registry.get(request.method()) {
        None => response.set_status(StatusCode::UnknownMethod),
        Some(handler) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler(request.params(), request.payload())
            }));
            match outcome {
                Ok((status, payload)) => {
                    response.set_status(status);
                    response.set_payload(payload);
                }
                Err(_) => {
                    debug!(id = request.id(), method = request.method(), "handler panicked");
                    response.set_status(StatusCode::UnhandledException);
                }
            }
        }
    }

    let job = WriteJob {
        frame: response.to_frame_bytes(),
        done: None,
    };
    if !shared.send_job(job) {
        debug!(id = response.id(), "response dropped, connection is down");
    }
}

/// The per-connection writer: drains the write queue in order, then
/// half-closes the transport on the way out. Exits on the shutdown signal or
/// when the last queue sender is gone.
async fn run_writer(
    mut frames: FrameWriter<OwnedWriteHalf>,
    mut queue: mpsc::UnboundedReceiver<WriteJob>,
    mut shutdown: Shutdown,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.recv() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let result = frames.write_frame(&job.frame).await.map_err(Error::from);
        match (job.done, result) {
            (Some(done), result) => {
                let _ = done.send(result);
            }
            (None, Err(error)) => debug!(%error, "fire-and-forget write failed"),
            (None, Ok(())) => {}
        }
    }

    if let Err(error) = frames.shutdown().await {
        debug!(%error, "transport shutdown failed");
    }
}
