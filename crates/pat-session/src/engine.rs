//! Session engine
//!
//! Issues commands, keeps their expectations in the [`Correlator`] and
//! turns sweeps into resends or failures. Outcomes are only produced while a
//! [`Listener`](crate::listener::Listener) drives the same engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, FrameChannel};
use crate::codec::{Codec, Command, CommandKind, DecodedEvent};
use crate::config::SessionConfig;
use crate::correlator::{Correlator, Expired, RequestId};
use crate::error::SessionError;
use crate::frame::Frame;

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// Registered, frame not yet written
    #[default]
    Idle,
    /// Written, waiting for the response
    Sent,
    /// Response window elapsed at least once; resent
    Retrying,
    Matched,
    Exhausted,
    Cancelled,
    /// Transport failure or shutdown
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Matched | Self::Exhausted | Self::Cancelled | Self::Failed
        )
    }
}

/// Shared view of a request's state and retry counter
#[derive(Debug, Default)]
pub struct RequestProgress {
    retries: AtomicU32,
    state: Mutex<RequestState>,
}

impl RequestProgress {
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RequestState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: RequestState) {
        *self.state.lock() = state;
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.set_state(RequestState::Retrying);
    }

    /// Idle -> Sent; a fast reply may already have moved the state on
    fn mark_sent(&self) {
        let mut state = self.state.lock();
        if *state == RequestState::Idle {
            *state = RequestState::Sent;
        }
    }
}

/// A matched response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub request_id: RequestId,
    pub command: CommandKind,
    pub frame: Frame,
    /// Send attempts it took, initial send included
    pub attempts: u32,
}

impl Reply {
    pub fn payload(&self) -> &[u8] {
        self.frame.data()
    }
}

struct EngineInner {
    channel: Arc<dyn FrameChannel>,
    codec: Codec,
    config: SessionConfig,
    table: Mutex<Correlator>,
}

/// Orchestrates send, correlation and retry
///
/// Cheap to clone; clones share the same request table.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

impl SessionEngine {
    pub fn new(channel: Arc<dyn FrameChannel>, codec: Codec, config: SessionConfig) -> Self {
        let table = Correlator::from_config(&config);
        Self {
            inner: Arc::new(EngineInner {
                channel,
                codec,
                config,
                table: Mutex::new(table),
            }),
        }
    }

    pub fn channel(&self) -> &Arc<dyn FrameChannel> {
        &self.inner.channel
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of requests still waiting for an outcome
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Send a command and wait for its response or final failure
    pub async fn issue(&self, command: Command) -> Result<Reply, SessionError> {
        self.submit(command).await?.wait().await
    }

    /// Send a command and return a handle to its outcome
    ///
    /// The expectation is registered before the frame is written so a fast
    /// reply cannot slip past. A write failure removes it again and is
    /// returned as [`SessionError::Transport`] without retry.
    pub async fn submit(&self, command: Command) -> Result<RequestHandle, SessionError> {
        let frame = self.inner.codec.encode(&command);
        let expectation = self.inner.codec.expectation(&command);
        let (tx, rx) = oneshot::channel();

        let (id, progress) = {
            let mut table = self.inner.table.lock();
            let id = table.register(expectation, Some(tx), Instant::now())?;
            (id, table.progress(id).unwrap_or_default())
        };

        if let Err(e) = self.inner.channel.send(&frame).await {
            warn!(request_id = %id, %frame, error = %e, "Send failed");
            self.inner.table.lock().fail(id);
            return Err(SessionError::Transport(e));
        }
        progress.mark_sent();

        info!(
            request_id = %id,
            command = %command.kind(),
            %frame,
            expect = %expectation.response_id,
            "Request sent"
        );

        Ok(RequestHandle {
            id,
            frame,
            progress,
            outcome: rx,
            engine: self.clone(),
        })
    }

    /// Write a command without waiting for any response
    pub async fn send(&self, command: Command) -> Result<Frame, SessionError> {
        let frame = self.inner.codec.encode(&command);
        self.inner.channel.send(&frame).await?;
        debug!(command = %command.kind(), %frame, "Frame sent without correlation");
        Ok(frame)
    }

    /// Cancel a pending request
    ///
    /// Returns false if the request already reached an outcome; exactly one
    /// of cancel and match wins, decided under the table lock.
    pub fn cancel(&self, id: RequestId) -> bool {
        let cancelled = self.inner.table.lock().cancel(id);
        match cancelled {
            Some(request) => {
                info!(request_id = %id, "Request cancelled");
                request.complete(Err(SessionError::Cancelled(id)));
                true
            }
            None => false,
        }
    }

    /// Hand a decoded event to the waiting request, if any
    ///
    /// Returns the event back when nothing was waiting for it.
    pub fn dispatch(&self, event: DecodedEvent) -> Option<DecodedEvent> {
        let resolved = self.inner.table.lock().try_resolve(&event);
        let Some(request) = resolved else {
            return Some(event);
        };

        let reply = Reply {
            request_id: request.id(),
            command: request.expectation().command.kind(),
            frame: *event.frame(),
            attempts: request.attempts(),
        };
        info!(
            request_id = %reply.request_id,
            frame = %reply.frame,
            attempts = reply.attempts,
            "Response matched"
        );
        if !request.complete(Ok(reply)) {
            debug!("Waiter dropped before the response arrived");
        }
        None
    }

    /// Sweep the table against the current time and act on expired entries
    pub async fn sweep_now(&self) {
        let expired = self.inner.table.lock().sweep(Instant::now());
        if !expired.is_empty() {
            self.handle_expired(expired).await;
        }
    }

    /// Resend retry-eligible requests and report exhausted ones
    pub async fn handle_expired(&self, expired: Vec<Expired>) {
        for entry in expired {
            match entry {
                Expired::Retry {
                    id,
                    command,
                    attempt,
                } => {
                    // Cancelled or matched while an earlier resend was in flight
                    if !self.inner.table.lock().contains(id) {
                        debug!(request_id = %id, "Request resolved before resend");
                        continue;
                    }

                    let frame = self.inner.codec.encode(&command);
                    warn!(request_id = %id, attempt, %frame, "No response, resending");

                    if let Err(e) = self.inner.channel.send(&frame).await {
                        warn!(request_id = %id, error = %e, "Resend failed");
                        let failed = self.inner.table.lock().fail(id);
                        if let Some(request) = failed {
                            request.complete(Err(SessionError::Transport(e)));
                        }
                    }
                }
                Expired::Exhausted(request) => {
                    let id = request.id();
                    let attempts = request.attempts();
                    warn!(request_id = %id, attempts, "Retry budget exhausted");
                    request.complete(Err(SessionError::RequestExhausted { id, attempts }));
                }
            }
        }
    }

    /// Fail every pending request after a transport error
    pub fn fail_all(&self, error: ChannelError) {
        let drained = self.inner.table.lock().drain();
        for request in drained {
            request.complete(Err(SessionError::Transport(error.clone())));
        }
    }

    /// Release every waiter with [`SessionError::Shutdown`]
    pub fn shutdown(&self) {
        let drained = self.inner.table.lock().drain();
        if !drained.is_empty() {
            info!(pending = drained.len(), "Dropping pending requests on shutdown");
        }
        for request in drained {
            request.complete(Err(SessionError::Shutdown));
        }
    }
}

/// Handle to an issued request
pub struct RequestHandle {
    id: RequestId,
    frame: Frame,
    progress: Arc<RequestProgress>,
    outcome: oneshot::Receiver<Result<Reply, SessionError>>,
    engine: SessionEngine,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Frame written for this request
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Resends so far
    pub fn retries(&self) -> u32 {
        self.progress.retries()
    }

    pub fn state(&self) -> RequestState {
        self.progress.state()
    }

    pub fn cancel(&self) -> bool {
        self.engine.cancel(self.id)
    }

    /// Wait for the outcome
    pub async fn wait(self) -> Result<Reply, SessionError> {
        match self.outcome.await {
            Ok(outcome) => outcome,
            // Slot dropped without an outcome: the engine went away
            Err(_) => Err(SessionError::Shutdown),
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("frame", &self.frame)
            .field("state", &self.state())
            .field("retries", &self.retries())
            .finish()
    }
}
