//! Frame channel layer
//!
//! This module provides the byte-frame I/O channel to the bus:
//! - SocketCAN raw socket (Linux only)
//! - Mock channel for testing and demos
//!
//! # Example
//!
//! ```ignore
//! use pat_session::channel::{create_channel, FrameChannel};
//! use pat_session::config::ChannelConfig;
//!
//! let config = ChannelConfig::Mock(Default::default());
//! let channel = create_channel(&config).await?;
//! channel.send(&frame).await?;
//! let reply = channel.receive(Duration::from_millis(10)).await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::FrameChannel;
pub use error::ChannelError;

use std::sync::Arc;

use crate::config::ChannelConfig;

/// Create a frame channel based on configuration
pub async fn create_channel(
    config: &ChannelConfig,
) -> Result<Arc<dyn FrameChannel>, ChannelError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        ChannelConfig::SocketCan(cfg) => {
            let channel = socketcan::SocketCanChannel::open(cfg).await?;
            Ok(Arc::new(channel))
        }
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        ChannelConfig::SocketCan(_) => Err(ChannelError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        ChannelConfig::Mock(cfg) => {
            let channel = mock::MockFrameChannel::new(cfg);
            Ok(Arc::new(channel))
        }
    }
}
