//! Output formatting for pat-trigger (text, json)

use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use colored::Colorize;
use pat_session::{DecodedEvent, Frame, Reply};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One `RX:` line per frame (default)
    #[default]
    Text,
    /// One JSON object per frame
    Json,
}

/// One received frame as printed in JSON mode
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub timestamp: String,
    pub id: String,
    pub extended: bool,
    pub remote: bool,
    pub dlc: u8,
    pub data: String,
    pub kind: &'static str,
}

impl FrameRecord {
    pub fn new(frame: &Frame, kind: &'static str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            id: frame.id().to_string(),
            extended: frame.is_extended(),
            remote: frame.is_remote(),
            dlc: frame.dlc(),
            data: hex::encode_upper(frame.data()),
            kind,
        }
    }
}

/// Context for output rendering
///
/// Frames go to stdout; status lines go to stdout in text mode and to
/// stderr in JSON mode so the frame stream stays machine readable.
#[derive(Debug, Clone)]
pub struct OutputContext {
    pub format: OutputFormat,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    /// Print a status message
    pub fn info(&self, msg: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", msg),
            OutputFormat::Json => eprintln!("{}", msg),
        }
    }

    pub fn success(&self, msg: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", msg.green()),
            OutputFormat::Json => eprintln!("{}", msg),
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print a frame forwarded by the listener
    pub fn frame(&self, event: &DecodedEvent) {
        self.print_frame(event.frame(), event.label());
    }

    /// Print the frame that answered our command
    pub fn reply(&self, reply: &Reply) {
        self.print_frame(&reply.frame, "reply");
    }

    fn print_frame(&self, frame: &Frame, kind: &'static str) {
        match self.format {
            OutputFormat::Text => println!("{}", format_text(frame)),
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(&FrameRecord::new(frame, kind)) {
                    println!("{}", json);
                }
            }
        }
    }
}

fn format_text(frame: &Frame) -> String {
    format!("{} {}", "RX:".cyan(), frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("701#01", "RX: ID=0x701 DLC=1 Data=01")]
    #[case("123#DEADBEEF", "RX: ID=0x123 DLC=4 Data=DE AD BE EF")]
    #[case("18DAF101#0102", "RX: ID=0x18DAF101 DLC=2 Data=01 02")]
    #[case("7FF#R2", "RX: ID=0x7FF DLC=2 RTR")]
    fn test_text_line(#[case] raw: &str, #[case] expected: &str) {
        colored::control::set_override(false);
        let frame: Frame = raw.parse().unwrap();
        assert_eq!(format_text(&frame), expected);
    }

    #[test]
    fn test_json_record_fields() {
        let frame: Frame = "701#01".parse().unwrap();
        let value = serde_json::to_value(FrameRecord::new(&frame, "response")).unwrap();

        assert_eq!(value["id"], "0x701");
        assert_eq!(value["extended"], false);
        assert_eq!(value["remote"], false);
        assert_eq!(value["dlc"], 1);
        assert_eq!(value["data"], "01");
        assert_eq!(value["kind"], "response");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
