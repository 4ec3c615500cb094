//! pat-session - PAT trigger session over raw CAN
//!
//! This crate drives a single-command diagnostic exchange with an ECU:
//! it writes a command frame, waits for the answer on the response ID,
//! resends on timeout and forwards every other frame on the bus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SessionEngine                         │
//! │  submit / issue / cancel / dispatch / sweep                 │
//! │                                                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Codec       │  │ Correlator  │  │ Listener            │  │
//! │  │ (opcodes)   │  │ (pending)   │  │ (receive + sweep)   │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │                          │                                  │
//! │                 ┌────────┴────────┐                         │
//! │                 │ FrameChannel    │                         │
//! │                 │ (SocketCAN/mock)│                         │
//! │                 └─────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod frame;
pub mod listener;

pub use channel::{create_channel, ChannelError, FrameChannel};
pub use codec::{Codec, Command, CommandKind, DecodedEvent, Expectation, MalformedFrame};
pub use config::{ChannelConfig, CodecConfig, SessionConfig, TriggerConfig};
pub use correlator::{Correlator, Expired, PendingRequest, RequestId};
pub use engine::{Reply, RequestHandle, RequestState, SessionEngine};
pub use error::{ConfigError, FrameError, SessionError};
pub use frame::{CanId, Frame};
pub use listener::{FrameObserver, Listener, ListenerStats};
