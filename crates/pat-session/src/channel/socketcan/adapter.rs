//! Raw SocketCAN channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};

use crate::channel::{ChannelError, FrameChannel};
use crate::config::SocketCanConfig;
use crate::error::FrameError;
use crate::frame::{CanId, Frame};

/// Frame channel over a raw CAN socket bound to one interface
pub struct SocketCanChannel {
    interface: String,
    socket: Arc<CanSocket>,
    /// One frame write at a time
    write_lock: Arc<Mutex<()>>,
    open: AtomicBool,
}

impl SocketCanChannel {
    /// Open and bind a raw socket on the configured interface
    pub async fn open(config: &SocketCanConfig) -> Result<Self, ChannelError> {
        let interface = config.interface.clone();
        let drain = config.drain_on_open;

        let socket = tokio::task::spawn_blocking(move || Self::create_socket(&interface, drain))
            .await
            .map_err(|e| ChannelError::OpenFailed(format!("Task join error: {}", e)))??;

        tracing::info!(interface = %config.interface, "SocketCAN bound");

        Ok(Self {
            interface: config.interface.clone(),
            socket: Arc::new(socket),
            write_lock: Arc::new(Mutex::new(())),
            open: AtomicBool::new(true),
        })
    }

    fn create_socket(interface: &str, drain: bool) -> Result<CanSocket, ChannelError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            ChannelError::OpenFailed(format!(
                "Failed to open raw CAN socket on {}: {}",
                interface, e
            ))
        })?;

        if drain {
            Self::drain_socket(&socket)?;
        }

        Ok(socket)
    }

    /// Drain any pending frames to clear traffic from before the session
    fn drain_socket(socket: &CanSocket) -> Result<(), ChannelError> {
        socket
            .set_nonblocking(true)
            .map_err(|e| ChannelError::InvalidConfig(format!("Failed to set non-blocking: {}", e)))?;

        while let Ok(frame) = socket.read_frame() {
            tracing::debug!(frame = ?frame, "Drained stale frame from socket");
        }

        socket
            .set_nonblocking(false)
            .map_err(|e| ChannelError::InvalidConfig(format!("Failed to set blocking: {}", e)))
    }

    /// Mark the channel closed; later calls fail with [`ChannelError::Closed`]
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameChannel for SocketCanChannel {
    async fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let can_frame = to_can_frame(frame)?;
        let socket = self.socket.clone();
        let write_lock = self.write_lock.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = write_lock.lock();
            socket
                .write_frame(&can_frame)
                .map_err(|e| ChannelError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| ChannelError::SendFailed(format!("Task join error: {}", e)))??;

        tracing::trace!(%frame, "Frame written");
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Frame, ChannelError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let socket = self.socket.clone();
        let result = tokio::task::spawn_blocking(move || socket.read_frame_timeout(timeout))
            .await
            .map_err(|e| ChannelError::ReceiveFailed(format!("Task join error: {}", e)))?;

        match result {
            Ok(CanFrame::Error(err)) => {
                // Only delivered when an error filter is installed; counts as an empty poll
                tracing::warn!(error = ?err, interface = %self.interface, "CAN error frame");
                Err(ChannelError::Timeout)
            }
            Ok(can_frame) => from_can_frame(&can_frame)
                .map_err(|e| ChannelError::ReceiveFailed(format!("Unreadable frame: {}", e))),
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(ChannelError::Timeout)
            }
            Err(e) => Err(ChannelError::ReceiveFailed(e.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        &self.interface
    }
}

impl Drop for SocketCanChannel {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        tracing::debug!(interface = %self.interface, "SocketCAN channel released");
    }
}

fn to_can_frame(frame: &Frame) -> Result<CanFrame, ChannelError> {
    let id = match frame.id() {
        CanId::Standard(raw) => StandardId::new(raw).map(Id::Standard),
        CanId::Extended(raw) => ExtendedId::new(raw).map(Id::Extended),
    }
    .ok_or_else(|| ChannelError::SendFailed(format!("Invalid CAN ID {}", frame.id())))?;

    let can_frame = if frame.is_remote() {
        <CanFrame as EmbeddedFrame>::new_remote(id, frame.dlc() as usize)
    } else {
        <CanFrame as EmbeddedFrame>::new(id, frame.data())
    };

    can_frame.ok_or_else(|| ChannelError::SendFailed(format!("Cannot encode frame {}", frame)))
}

fn from_can_frame(frame: &CanFrame) -> Result<Frame, FrameError> {
    let id = match EmbeddedFrame::id(frame) {
        Id::Standard(id) => CanId::Standard(id.as_raw()),
        Id::Extended(id) => CanId::Extended(id.as_raw()),
    };

    if EmbeddedFrame::is_remote_frame(frame) {
        Frame::remote(id, EmbeddedFrame::dlc(frame) as u8)
    } else {
        Frame::new(id, EmbeddedFrame::data(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_conversion_standard() {
        let frame: Frame = "700#AA".parse().unwrap();
        let can_frame = to_can_frame(&frame).unwrap();

        assert!(!EmbeddedFrame::is_extended(&can_frame));
        assert_eq!(EmbeddedFrame::data(&can_frame), &[0xAA]);
        assert_eq!(from_can_frame(&can_frame).unwrap(), frame);
    }

    #[test]
    fn test_frame_conversion_extended_remote() {
        let frame: Frame = "18DAF101#R3".parse().unwrap();
        let can_frame = to_can_frame(&frame).unwrap();

        assert!(EmbeddedFrame::is_extended(&can_frame));
        assert!(EmbeddedFrame::is_remote_frame(&can_frame));
        assert_eq!(from_can_frame(&can_frame).unwrap(), frame);
    }
}
