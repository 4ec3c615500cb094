//! Request/response correlation
//!
//! The correlator owns every in-flight [`PendingRequest`]. Entries are keyed
//! by a monotonic [`RequestId`], so iteration order is issue order and the
//! oldest match always wins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::codec::{Command, DecodedEvent, Expectation};
use crate::config::SessionConfig;
use crate::engine::{Reply, RequestProgress, RequestState};
use crate::error::SessionError;
use crate::frame::CanId;

/// Monotonic request sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the outcome of a request is delivered
pub type ResultSlot = oneshot::Sender<Result<Reply, SessionError>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("Request {pending} already waits for {response_id} after {request_id}")]
    Busy {
        request_id: CanId,
        response_id: CanId,
        pending: RequestId,
    },
}

/// An outstanding request
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    expectation: Expectation,
    issued_at: Instant,
    attempts: u32,
    attempts_remaining: u32,
    progress: Arc<RequestProgress>,
    slot: Option<ResultSlot>,
}

impl PendingRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Send attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    pub fn progress(&self) -> Arc<RequestProgress> {
        self.progress.clone()
    }

    /// Deliver the outcome to the waiter, if any is still listening
    pub fn complete(mut self, outcome: Result<Reply, SessionError>) -> bool {
        match self.slot.take() {
            Some(slot) => slot.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// A request whose response window elapsed during a sweep
#[derive(Debug)]
pub enum Expired {
    /// Budget left; resend `command` as attempt number `attempt`
    Retry {
        id: RequestId,
        command: Command,
        attempt: u32,
    },
    /// Budget spent; the entry has been removed
    Exhausted(PendingRequest),
}

/// Table of outstanding requests
#[derive(Debug)]
pub struct Correlator {
    pending: BTreeMap<RequestId, PendingRequest>,
    next_id: u64,
    timeout: Duration,
    retry_budget: u32,
}

impl Correlator {
    /// A `retry_budget` of zero is treated as one attempt
    pub fn new(timeout: Duration, retry_budget: u32) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_id: 1,
            timeout,
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.timeout(), config.retry_budget)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn progress(&self, id: RequestId) -> Option<Arc<RequestProgress>> {
        self.pending.get(&id).map(PendingRequest::progress)
    }

    /// Track a new expectation
    ///
    /// Rejects a second request for a request/response pair that is
    /// already pending.
    pub fn register(
        &mut self,
        expectation: Expectation,
        slot: Option<ResultSlot>,
        now: Instant,
    ) -> Result<RequestId, CorrelationError> {
        if let Some(existing) = self.pending.values().find(|p| {
            p.expectation.request_id == expectation.request_id
                && p.expectation.response_id == expectation.response_id
        }) {
            return Err(CorrelationError::Busy {
                request_id: expectation.request_id,
                response_id: expectation.response_id,
                pending: existing.id,
            });
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;

        self.pending.insert(
            id,
            PendingRequest {
                id,
                expectation,
                issued_at: now,
                attempts: 1,
                attempts_remaining: self.retry_budget,
                progress: Arc::new(RequestProgress::default()),
                slot,
            },
        );

        tracing::debug!(
            request_id = %id,
            request = %expectation.request_id,
            response = %expectation.response_id,
            "Expectation registered"
        );
        Ok(id)
    }

    /// Resolve the oldest request expecting this event's arbitration ID
    ///
    /// Malformed and remote frames never match.
    pub fn try_resolve(&mut self, event: &DecodedEvent) -> Option<PendingRequest> {
        if !is_matchable(event) {
            return None;
        }

        let arbitration_id = event.arbitration_id();
        let id = self
            .pending
            .values()
            .find(|p| p.expectation.response_id == arbitration_id)
            .map(|p| p.id)?;

        let request = self.pending.remove(&id)?;
        request.progress.set_state(RequestState::Matched);
        Some(request)
    }

    /// Age out requests whose response window has elapsed
    pub fn sweep(&mut self, now: Instant) -> Vec<Expired> {
        let timeout = self.timeout;
        let timed_out: Vec<RequestId> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.issued_at) > timeout)
            .map(|p| p.id)
            .collect();

        let mut expired = Vec::with_capacity(timed_out.len());
        for id in timed_out {
            let Some(entry) = self.pending.get_mut(&id) else {
                continue;
            };
            entry.attempts_remaining = entry.attempts_remaining.saturating_sub(1);

            if entry.attempts_remaining == 0 {
                if let Some(request) = self.pending.remove(&id) {
                    request.progress.set_state(RequestState::Exhausted);
                    expired.push(Expired::Exhausted(request));
                }
            } else {
                entry.attempts += 1;
                entry.issued_at = now;
                entry.progress.record_retry();
                expired.push(Expired::Retry {
                    id,
                    command: entry.expectation.command,
                    attempt: entry.attempts,
                });
            }
        }
        expired
    }

    /// Remove a request on caller request
    pub fn cancel(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.remove_with_state(id, RequestState::Cancelled)
    }

    /// Remove a request after a transport failure
    pub fn fail(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.remove_with_state(id, RequestState::Failed)
    }

    /// Remove every request, oldest first
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        let drained: Vec<PendingRequest> =
            std::mem::take(&mut self.pending).into_values().collect();
        for request in &drained {
            request.progress.set_state(RequestState::Failed);
        }
        drained
    }

    /// Earliest instant at which a pending request times out
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.issued_at + self.timeout)
            .min()
    }

    fn remove_with_state(&mut self, id: RequestId, state: RequestState) -> Option<PendingRequest> {
        let request = self.pending.remove(&id)?;
        request.progress.set_state(state);
        Some(request)
    }
}

fn is_matchable(event: &DecodedEvent) -> bool {
    !event.frame().is_remote()
        && !matches!(event, DecodedEvent::Unrecognized { reason: Some(_), .. })
}
