//! Command encoding and frame classification
//!
//! Host commands travel on a single command ID (default `0x700`) with a
//! one-byte opcode; the ECU answers on the response ID (default `0x701`).
//! Decoding never fails: anything the codec does not understand becomes
//! [`DecodedEvent::Unrecognized`], because the bus is shared with
//! unrelated senders.

use thiserror::Error;

use crate::config::CodecConfig;
use crate::frame::{CanId, Frame};

/// Command opcodes (first payload byte on the command ID)
pub mod opcode {
    /// Start the PAT procedure
    pub const START_PAT: u8 = 0xAA;
    /// Abort a running PAT procedure
    pub const STOP_PAT: u8 = 0x55;
    /// Query a status value; followed by a selector byte
    pub const QUERY: u8 = 0x51;
}

/// A diagnostic request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartPat,
    StopPat,
    Query {
        selector: u8,
    },
    /// Arbitrary frame answered on `response_id`
    Raw { frame: Frame, response_id: CanId },
}

/// Discriminant of [`Command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StartPat,
    StopPat,
    Query,
    Raw,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::StartPat => CommandKind::StartPat,
            Self::StopPat => CommandKind::StopPat,
            Self::Query { .. } => CommandKind::Query,
            Self::Raw { .. } => CommandKind::Raw,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StartPat => "PAT START",
            Self::StopPat => "PAT STOP",
            Self::Query => "QUERY",
            Self::Raw => "RAW",
        };
        write!(f, "{}", s)
    }
}

/// What a sent command waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    /// Arbitration ID the request goes out on
    pub request_id: CanId,
    /// Arbitration ID the answer is expected on
    pub response_id: CanId,
    /// Original command, kept for resends
    pub command: Command,
}

/// Why a frame on the command ID could not be decoded
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MalformedFrame {
    #[error("empty command frame")]
    Empty,

    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("opcode 0x{opcode:02X} expects {expected} byte(s), got {actual}")]
    BadLength {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// A host command seen on the command ID
    Command { command: Command, frame: Frame },
    /// Traffic on the response ID
    Response { frame: Frame },
    /// Anything else, including malformed command frames
    Unrecognized {
        frame: Frame,
        reason: Option<MalformedFrame>,
    },
}

impl DecodedEvent {
    pub fn frame(&self) -> &Frame {
        match self {
            Self::Command { frame, .. }
            | Self::Response { frame }
            | Self::Unrecognized { frame, .. } => frame,
        }
    }

    pub fn arbitration_id(&self) -> CanId {
        self.frame().id()
    }

    /// Short label for output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Response { .. } => "response",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Maps commands to frames and frames to events
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn command_id(&self) -> CanId {
        self.config.command_id
    }

    pub fn response_id(&self) -> CanId {
        self.config.response_id
    }

    /// Encode a command into its wire frame
    pub fn encode(&self, command: &Command) -> Frame {
        match *command {
            Command::StartPat => self.command_frame(&[opcode::START_PAT]),
            Command::StopPat => self.command_frame(&[opcode::STOP_PAT]),
            Command::Query { selector } => self.command_frame(&[opcode::QUERY, selector]),
            Command::Raw { frame, .. } => frame,
        }
    }

    /// Correlation expectation for a command
    pub fn expectation(&self, command: &Command) -> Expectation {
        let (request_id, response_id) = match *command {
            Command::Raw { frame, response_id } => (frame.id(), response_id),
            _ => (self.config.command_id, self.config.response_id),
        };
        Expectation {
            request_id,
            response_id,
            command: *command,
        }
    }

    /// Classify a received frame
    pub fn decode(&self, frame: Frame) -> DecodedEvent {
        if frame.is_remote() {
            return DecodedEvent::Unrecognized {
                frame,
                reason: None,
            };
        }

        let id = frame.id();
        if id == self.config.command_id {
            return match decode_command(frame.data()) {
                Ok(command) => DecodedEvent::Command { command, frame },
                Err(reason) => {
                    tracing::debug!(%frame, %reason, "Malformed command frame");
                    DecodedEvent::Unrecognized {
                        frame,
                        reason: Some(reason),
                    }
                }
            };
        }
        if id == self.config.response_id {
            return DecodedEvent::Response { frame };
        }

        DecodedEvent::Unrecognized {
            frame,
            reason: None,
        }
    }

    fn command_frame(&self, data: &[u8]) -> Frame {
        Frame::new(self.config.command_id, data).expect("Opcode payload fits in a CAN frame")
    }
}

fn decode_command(data: &[u8]) -> Result<Command, MalformedFrame> {
    let (&op, rest) = data.split_first().ok_or(MalformedFrame::Empty)?;
    let expect = |expected: usize| {
        if data.len() == expected {
            Ok(())
        } else {
            Err(MalformedFrame::BadLength {
                opcode: op,
                expected,
                actual: data.len(),
            })
        }
    };

    match op {
        opcode::START_PAT => expect(1).map(|_| Command::StartPat),
        opcode::STOP_PAT => expect(1).map(|_| Command::StopPat),
        opcode::QUERY => expect(2).map(|_| Command::Query { selector: rest[0] }),
        other => Err(MalformedFrame::UnknownOpcode(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn frame(s: &str) -> Frame {
        s.parse().unwrap()
    }

    #[test]
    fn test_start_pat_wire_format() {
        let codec = Codec::default();
        let frame = codec.encode(&Command::StartPat);

        assert_eq!(frame.id(), CanId::Standard(0x700));
        assert_eq!(frame.data(), &[0xAA]);
        assert_eq!(frame.dlc(), 1);
        assert!(!frame.is_extended());
    }

    #[rstest]
    #[case(Command::StartPat)]
    #[case(Command::StopPat)]
    #[case(Command::Query { selector: 0x00 })]
    #[case(Command::Query { selector: 0xFF })]
    fn test_round_trip_recovers_command(#[case] command: Command) {
        let codec = Codec::default();
        let encoded = codec.encode(&command);

        match codec.decode(encoded) {
            DecodedEvent::Command {
                command: decoded,
                frame,
            } => {
                assert_eq!(decoded, command);
                assert_eq!(frame.id(), encoded.id());
                assert_eq!(frame.data(), encoded.data());
            }
            other => panic!("Expected command event, got {:?}", other),
        }
    }

    #[rstest]
    #[case("123#DEADBEEF", CanId::Standard(0x124))]
    #[case("701#01", CanId::Standard(0x701))]
    #[case("18DAF101#0102030405060708", CanId::Extended(0x18DA_01F1))]
    #[case("7FF#", CanId::Standard(0x7FF))]
    fn test_round_trip_raw_frames(#[case] raw: &str, #[case] response_id: CanId) {
        let codec = Codec::default();
        let original = frame(raw);
        let command = Command::Raw {
            frame: original,
            response_id,
        };

        let event = codec.decode(codec.encode(&command));
        assert_eq!(event.arbitration_id(), original.id());
        assert_eq!(event.frame().data(), original.data());
    }

    #[rstest]
    #[case("700#", MalformedFrame::Empty)]
    #[case("700#12", MalformedFrame::UnknownOpcode(0x12))]
    #[case("700#AA00", MalformedFrame::BadLength { opcode: 0xAA, expected: 1, actual: 2 })]
    #[case("700#51", MalformedFrame::BadLength { opcode: 0x51, expected: 2, actual: 1 })]
    fn test_malformed_command_is_unrecognized(#[case] raw: &str, #[case] reason: MalformedFrame) {
        let codec = Codec::default();
        assert_eq!(
            codec.decode(frame(raw)),
            DecodedEvent::Unrecognized {
                frame: frame(raw),
                reason: Some(reason),
            }
        );
    }

    #[test]
    fn test_decode_classifies_by_id() {
        let codec = Codec::default();

        assert!(matches!(
            codec.decode(frame("701#01")),
            DecodedEvent::Response { .. }
        ));
        assert!(matches!(
            codec.decode(frame("123#00")),
            DecodedEvent::Unrecognized { reason: None, .. }
        ));
        assert!(matches!(
            codec.decode(frame("700#R1")),
            DecodedEvent::Unrecognized { reason: None, .. }
        ));
    }

    #[test]
    fn test_custom_ids() {
        let codec = Codec::new(CodecConfig {
            command_id: CanId::Extended(0x18DA_00F1),
            response_id: CanId::Extended(0x18DA_F100),
        });

        let frame = codec.encode(&Command::StopPat);
        assert_eq!(frame.id(), CanId::Extended(0x18DA_00F1));
        assert_eq!(frame.data(), &[opcode::STOP_PAT]);

        let exp = codec.expectation(&Command::StopPat);
        assert_eq!(exp.request_id, CanId::Extended(0x18DA_00F1));
        assert_eq!(exp.response_id, CanId::Extended(0x18DA_F100));
    }

    #[test]
    fn test_raw_expectation_uses_frame_id() {
        let codec = Codec::default();
        let command = Command::Raw {
            frame: frame("7E0#023E00"),
            response_id: CanId::Standard(0x7E8),
        };

        let exp = codec.expectation(&command);
        assert_eq!(exp.request_id, CanId::Standard(0x7E0));
        assert_eq!(exp.response_id, CanId::Standard(0x7E8));
        assert_eq!(exp.command, command);
    }
}
