//! Listener loop
//!
//! Single control loop that drains the channel with a bounded receive
//! timeout, resolves pending requests and forwards everything else to a
//! [`FrameObserver`]. The table is swept on every iteration, so retries run
//! whether or not the bus carries traffic.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::channel::ChannelError;
use crate::codec::DecodedEvent;
use crate::engine::SessionEngine;

/// Receives every decoded event that did not answer a pending request
pub trait FrameObserver: Send {
    fn observe(&mut self, event: &DecodedEvent);
}

impl<F> FrameObserver for F
where
    F: FnMut(&DecodedEvent) + Send,
{
    fn observe(&mut self, event: &DecodedEvent) {
        self(event)
    }
}

/// Counters for one listener run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub frames_received: u64,
    /// Frames that resolved a pending request
    pub matched: u64,
    /// Frames forwarded to the observer
    pub observed: u64,
    pub sweeps: u64,
}

pub struct Listener<O> {
    engine: SessionEngine,
    observer: O,
    poll_interval: Duration,
}

impl<O: FrameObserver> Listener<O> {
    pub fn new(engine: SessionEngine, observer: O) -> Self {
        let poll_interval = engine.config().poll_interval();
        Self {
            engine,
            observer,
            poll_interval,
        }
    }

    /// Override the receive timeout; zero is raised to one millisecond
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Run on a background task
    pub fn spawn(
        self,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<Result<ListenerStats, ChannelError>>
    where
        O: 'static,
    {
        tokio::spawn(self.run(stop))
    }

    /// Run until `stop` turns true (or its sender is dropped)
    ///
    /// A transport error ends the loop and fails every pending request with
    /// it; on a normal stop pending requests get
    /// [`SessionError::Shutdown`](crate::error::SessionError::Shutdown).
    pub async fn run(
        mut self,
        mut stop: watch::Receiver<bool>,
    ) -> Result<ListenerStats, ChannelError> {
        let result = self.poll_loop(&mut stop).await;
        match result {
            Ok(ref stats) => {
                info!(
                    frames = stats.frames_received,
                    matched = stats.matched,
                    observed = stats.observed,
                    "Listener stopped"
                );
                self.engine.shutdown();
            }
            Err(ref e) => {
                error!(error = %e, "Listener aborted by transport error");
                self.engine.fail_all(e.clone());
            }
        }
        result
    }

    async fn poll_loop(
        &mut self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<ListenerStats, ChannelError> {
        let channel = self.engine.channel().clone();
        let mut stats = ListenerStats::default();

        info!(
            endpoint = channel.endpoint(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Listener started"
        );

        loop {
            if stop_requested(stop) {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = stop.changed() => continue,
                received = channel.receive(self.poll_interval) => received,
            };

            match received {
                Ok(frame) => {
                    stats.frames_received += 1;
                    let event = self.engine.codec().decode(frame);
                    match self.engine.dispatch(event) {
                        None => stats.matched += 1,
                        Some(event) => {
                            stats.observed += 1;
                            self.observer.observe(&event);
                        }
                    }
                }
                Err(ChannelError::Timeout) => {}
                Err(e) => return Err(e),
            }

            self.engine.sweep_now().await;
            stats.sweeps += 1;
        }

        debug!(sweeps = stats.sweeps, "Stop signal received");
        Ok(stats)
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::channel::mock::MockFrameChannel;
    use crate::codec::{Codec, Command};
    use crate::config::{MockConfig, SessionConfig};
    use crate::error::SessionError;
    use crate::frame::Frame;

    fn frame(s: &str) -> Frame {
        s.parse().unwrap()
    }

    fn setup() -> (SessionEngine, Arc<MockFrameChannel>) {
        let channel = Arc::new(MockFrameChannel::new(&MockConfig::default()));
        let config = SessionConfig {
            timeout_ms: 50,
            retry_budget: 3,
            poll_interval_ms: 5,
        };
        let engine = SessionEngine::new(channel.clone(), Codec::default(), config);
        (engine, channel)
    }

    #[tokio::test]
    async fn test_stops_on_signal() {
        let (engine, _channel) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = Listener::new(engine, |_: &DecodedEvent| {}).spawn(stop_rx);

        stop_tx.send(true).unwrap();
        let stats = listener.await.unwrap().unwrap();
        assert_eq!(stats.frames_received, 0);
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() {
        let (engine, _channel) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = Listener::new(engine, |_: &DecodedEvent| {}).spawn(stop_rx);

        drop(stop_tx);
        assert!(listener.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_forwards_unmatched_frames() {
        let (engine, channel) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = Listener::new(engine, move |event: &DecodedEvent| {
            sink.lock().push(*event.frame());
        })
        .spawn(stop_rx);

        channel.inject(frame("123#01"));
        channel.inject(frame("124#02"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();

        let stats = listener.await.unwrap().unwrap();
        assert_eq!(stats.observed, 2);
        assert_eq!(*seen.lock(), vec![frame("123#01"), frame("124#02")]);
    }

    #[tokio::test]
    async fn test_transport_error_fails_pending() {
        let (engine, channel) = setup();
        let handle = engine.submit(Command::StartPat).await.unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);

        channel.fail_next_receive(ChannelError::ReceiveFailed("bus off".to_string()));
        let result = Listener::new(engine.clone(), |_: &DecodedEvent| {})
            .run(stop_rx)
            .await;

        assert_eq!(
            result,
            Err(ChannelError::ReceiveFailed("bus off".to_string()))
        );
        assert!(matches!(
            handle.wait().await,
            Err(SessionError::Transport(ChannelError::ReceiveFailed(_)))
        ));
        assert_eq!(engine.pending_count(), 0);
    }
}
