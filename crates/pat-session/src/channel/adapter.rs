//! Frame channel trait

use std::time::Duration;

use async_trait::async_trait;

use super::ChannelError;
use crate::frame::Frame;

/// Transport-agnostic interface to a CAN bus
///
/// The listener loop is the only caller of [`receive`](Self::receive);
/// [`send`](Self::send) may be called concurrently from any task and
/// implementations serialize the writes.
#[async_trait]
pub trait FrameChannel: Send + Sync {
    /// Write one frame to the bus
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next frame
    ///
    /// Returns [`ChannelError::Timeout`] when nothing arrived in time; any
    /// other error means the transport is unusable.
    async fn receive(&self, timeout: Duration) -> Result<Frame, ChannelError>;

    /// Check if the channel is still usable
    fn is_open(&self) -> bool;

    /// Name of the bus endpoint (interface name for SocketCAN)
    fn endpoint(&self) -> &str;
}
