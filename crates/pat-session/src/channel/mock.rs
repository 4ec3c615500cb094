//! Mock frame channel for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::{ChannelError, FrameChannel};
use crate::config::MockConfig;
use crate::frame::Frame;

/// Canned reply, sent once the request frame has been written `skip` times
#[derive(Debug, Clone)]
struct ResponseRule {
    request: Frame,
    response: Frame,
    skip: usize,
    seen: usize,
}

/// In-memory bus: records outbound frames and replays inbound ones
pub struct MockFrameChannel {
    config: MockConfig,
    open: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    /// Serializes writes like a real socket
    write_lock: tokio::sync::Mutex<()>,
    sent: RwLock<Vec<Frame>>,
    responses: RwLock<Vec<ResponseRule>>,
    receive_error: Mutex<Option<ChannelError>>,
}

impl MockFrameChannel {
    pub fn new(config: &MockConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let responses = config
            .responses
            .iter()
            .map(|r| ResponseRule {
                request: r.request,
                response: r.response,
                skip: 0,
                seen: 0,
            })
            .collect();

        Self {
            config: config.clone(),
            open: AtomicBool::new(true),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            write_lock: tokio::sync::Mutex::new(()),
            sent: RwLock::new(Vec::new()),
            responses: RwLock::new(responses),
            receive_error: Mutex::new(None),
        }
    }

    /// Reply with `response` every time `request` is sent
    pub fn add_response(&self, request: Frame, response: Frame) {
        self.add_response_after(request, response, 0);
    }

    /// Ignore the first `skip` sends of `request`, then reply with `response`
    pub fn add_response_after(&self, request: Frame, response: Frame, skip: usize) {
        self.responses.write().push(ResponseRule {
            request,
            response,
            skip,
            seen: 0,
        });
    }

    /// Inject an incoming frame (simulates another node on the bus)
    pub fn inject(&self, frame: Frame) {
        let _ = self.inbound_tx.send(frame);
    }

    /// Make the next `receive` call fail with `error`
    pub fn fail_next_receive(&self, error: ChannelError) {
        *self.receive_error.lock() = Some(error);
    }

    /// Set link state; a closed channel fails every call
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Frames written so far, oldest first
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.read().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().len()
    }

    fn replies_for(&self, frame: &Frame) -> Vec<Frame> {
        let mut rules = self.responses.write();
        let mut replies = Vec::new();
        for rule in rules.iter_mut().filter(|r| r.request == *frame) {
            rule.seen += 1;
            if rule.seen > rule.skip {
                replies.push(rule.response);
            }
        }
        replies
    }
}

#[async_trait]
impl FrameChannel for MockFrameChannel {
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let _guard = self.write_lock.lock().await;

        // Simulate latency
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        self.sent.write().push(*frame);
        tracing::debug!(%frame, "Mock channel: sent frame");

        for reply in self.replies_for(frame) {
            self.inject(reply);
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Frame, ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let injected = self.receive_error.lock().take();
        if let Some(err) = injected {
            return Err(err);
        }

        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockResponse;

    fn frame(s: &str) -> Frame {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_configured_response_is_replayed() {
        let config = MockConfig {
            responses: vec![MockResponse {
                request: frame("700#AA"),
                response: frame("701#01"),
            }],
            ..Default::default()
        };
        let channel = MockFrameChannel::new(&config);

        channel.send(&frame("700#AA")).await.unwrap();
        let reply = channel.receive(Duration::from_millis(50)).await.unwrap();

        assert_eq!(reply, frame("701#01"));
        assert_eq!(channel.sent_frames(), vec![frame("700#AA")]);
    }

    #[tokio::test]
    async fn test_receive_times_out_when_idle() {
        let channel = MockFrameChannel::new(&MockConfig::default());
        let err = channel.receive(Duration::from_millis(5)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_response_after_skipped_sends() {
        let channel = MockFrameChannel::new(&MockConfig::default());
        channel.add_response_after(frame("700#AA"), frame("701#01"), 1);

        channel.send(&frame("700#AA")).await.unwrap();
        assert!(channel
            .receive(Duration::from_millis(5))
            .await
            .unwrap_err()
            .is_timeout());

        channel.send(&frame("700#AA")).await.unwrap();
        assert_eq!(
            channel.receive(Duration::from_millis(5)).await.unwrap(),
            frame("701#01")
        );
    }

    #[tokio::test]
    async fn test_closed_channel_fails() {
        let channel = MockFrameChannel::new(&MockConfig::default());
        channel.set_open(false);

        assert_eq!(
            channel.send(&frame("700#AA")).await,
            Err(ChannelError::Closed)
        );
        assert_eq!(
            channel.receive(Duration::from_millis(5)).await,
            Err(ChannelError::Closed)
        );
        assert_eq!(channel.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_receive_error() {
        let channel = MockFrameChannel::new(&MockConfig::default());
        channel.fail_next_receive(ChannelError::ReceiveFailed("link down".to_string()));

        let err = channel.receive(Duration::from_millis(5)).await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(channel
            .receive(Duration::from_millis(5))
            .await
            .unwrap_err()
            .is_timeout());
    }
}
