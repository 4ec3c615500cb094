//! CAN frame model
//!
//! A [`Frame`] is immutable once built: the arbitration ID is validated
//! against the 11/29-bit ranges and the payload against the classic CAN
//! limit of 8 bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// CAN arbitration identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CanId {
    /// 11-bit identifier
    Standard(u16),
    /// 29-bit identifier
    Extended(u32),
}

impl CanId {
    pub const STANDARD_MAX: u16 = 0x7FF;
    pub const EXTENDED_MAX: u32 = 0x1FFF_FFFF;

    pub fn standard(id: u16) -> Result<Self, FrameError> {
        if id > Self::STANDARD_MAX {
            return Err(FrameError::InvalidStandardId(id as u32));
        }
        Ok(Self::Standard(id))
    }

    pub fn extended(id: u32) -> Result<Self, FrameError> {
        if id > Self::EXTENDED_MAX {
            return Err(FrameError::InvalidExtendedId(id));
        }
        Ok(Self::Extended(id))
    }

    /// Build an ID from a raw value: 11-bit if it fits, 29-bit otherwise
    pub fn from_raw(raw: u32) -> Result<Self, FrameError> {
        if raw <= Self::STANDARD_MAX as u32 {
            Ok(Self::Standard(raw as u16))
        } else {
            Self::extended(raw)
        }
    }

    /// Numeric identifier, masked to its 11 or 29 significant bits
    pub fn raw(&self) -> u32 {
        match *self {
            Self::Standard(id) => (id & Self::STANDARD_MAX) as u32,
            Self::Extended(id) => id & Self::EXTENDED_MAX,
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, Self::Extended(_))
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard(_) => write!(f, "0x{:03X}", self.raw()),
            Self::Extended(_) => write!(f, "0x{:08X}", self.raw()),
        }
    }
}

/// Parse a CAN ID from string (supports hex with 0x prefix)
///
/// Eight hex digits always give an extended ID, so `0x00000700` is the
/// 29-bit form of `0x700`, matching [`Display`](fmt::Display). Other
/// forms are 11-bit when the value fits.
impl FromStr for CanId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => (hex, 16),
            None => (s, 10),
        };

        let raw = u32::from_str_radix(digits, radix)
            .map_err(|e| FrameError::InvalidId(format!("'{}': {}", s, e)))?;
        if radix == 16 && digits.len() == 8 {
            Self::extended(raw)
        } else {
            Self::from_raw(raw)
        }
    }
}

impl TryFrom<String> for CanId {
    type Error = FrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CanId> for String {
    fn from(id: CanId) -> Self {
        id.to_string()
    }
}

/// A single CAN bus message
///
/// Serialized in `cansend` notation (`701#01`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Frame {
    id: CanId,
    data: [u8; MAX_DATA_LEN],
    dlc: u8,
    remote: bool,
}

impl Frame {
    /// Data frame with up to 8 payload bytes
    pub fn new(id: CanId, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::PayloadTooLong(data.len()));
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            data: buf,
            dlc: data.len() as u8,
            remote: false,
        })
    }

    /// Remote transmission request; carries a DLC but no data
    pub fn remote(id: CanId, dlc: u8) -> Result<Self, FrameError> {
        if dlc as usize > MAX_DATA_LEN {
            return Err(FrameError::PayloadTooLong(dlc as usize));
        }
        Ok(Self {
            id,
            data: [0; MAX_DATA_LEN],
            dlc,
            remote: true,
        })
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    /// Payload bytes (empty for remote frames)
    pub fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Payload as upper-case hex, space separated
    pub fn data_hex(&self) -> String {
        self.data()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render in `cansend` notation, the inverse of [`Frame::from_str`]
    pub fn to_cansend(&self) -> String {
        let id = match self.id {
            CanId::Standard(_) => format!("{:03X}", self.id.raw()),
            CanId::Extended(_) => format!("{:08X}", self.id.raw()),
        };
        if self.remote {
            format!("{}#R{}", id, self.dlc)
        } else {
            format!("{}#{}", id, hex::encode_upper(self.data()))
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID={} DLC={}", self.id, self.dlc)?;
        if self.remote {
            write!(f, " RTR")
        } else {
            write!(f, " Data={}", self.data_hex())
        }
    }
}

/// Parse a frame in `cansend` notation: `<id>#<hex data>` or `<id>#R[dlc]`.
///
/// The ID is hexadecimal; three digits or fewer give a standard ID,
/// more give an extended one.
impl FromStr for Frame {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id_str, body) = s
            .trim()
            .split_once('#')
            .ok_or_else(|| FrameError::InvalidFrame(format!("missing '#' in '{}'", s)))?;

        let raw = u32::from_str_radix(id_str, 16)
            .map_err(|e| FrameError::InvalidId(format!("'{}': {}", id_str, e)))?;
        let id = if id_str.len() <= 3 {
            CanId::standard(raw.try_into().map_err(|_| FrameError::InvalidStandardId(raw))?)?
        } else {
            CanId::extended(raw)?
        };

        if let Some(dlc) = body.strip_prefix('R').or_else(|| body.strip_prefix('r')) {
            let dlc = if dlc.is_empty() {
                0
            } else {
                dlc.parse::<u8>()
                    .map_err(|e| FrameError::InvalidFrame(format!("bad DLC '{}': {}", dlc, e)))?
            };
            return Self::remote(id, dlc);
        }

        let cleaned: String = body.chars().filter(|c| *c != '.').collect();
        let data = hex::decode(&cleaned)
            .map_err(|e| FrameError::InvalidFrame(format!("bad data '{}': {}", body, e)))?;
        Self::new(id, &data)
    }
}

impl TryFrom<String> for Frame {
    type Error = FrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Frame> for String {
    fn from(frame: Frame) -> Self {
        frame.to_cansend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_id_ranges() {
        assert!(CanId::standard(0x7FF).is_ok());
        assert!(matches!(
            CanId::standard(0x800),
            Err(FrameError::InvalidStandardId(0x800))
        ));
        assert!(CanId::extended(0x1FFF_FFFF).is_ok());
        assert!(CanId::extended(0x2000_0000).is_err());
    }

    #[test]
    fn test_can_id_parse() {
        assert_eq!("0x700".parse::<CanId>().unwrap(), CanId::Standard(0x700));
        assert_eq!("1793".parse::<CanId>().unwrap(), CanId::Standard(0x701));
        assert_eq!(
            "0x18DAF100".parse::<CanId>().unwrap(),
            CanId::Extended(0x18DA_F100)
        );
        assert!("0xZZ".parse::<CanId>().is_err());
        assert!("0x3FFFFFFF".parse::<CanId>().is_err());
    }

    #[test]
    fn test_low_extended_id_round_trips() {
        let id = CanId::Extended(0x700);
        assert_eq!(id.to_string(), "0x00000700");
        assert_eq!("0x00000700".parse::<CanId>().unwrap(), id);
        assert_eq!("0x00000018".parse::<CanId>().unwrap(), CanId::Extended(0x18));

        // Short forms keep the 11-bit reading
        assert_eq!("0x0700".parse::<CanId>().unwrap(), CanId::Standard(0x700));
        assert_eq!("1792".parse::<CanId>().unwrap(), CanId::Standard(0x700));
    }

    #[test]
    fn test_low_extended_id_in_config_string() {
        let id: CanId = String::from("0x000007E8").try_into().unwrap();
        assert_eq!(id, CanId::Extended(0x7E8));
        assert_eq!(String::from(id), "0x000007E8");
    }

    #[test]
    fn test_can_id_display() {
        assert_eq!(CanId::Standard(0x7).to_string(), "0x007");
        assert_eq!(CanId::Extended(0x18DA_F1).to_string(), "0x0018DAF1");
    }

    #[test]
    fn test_frame_rejects_long_payload() {
        let id = CanId::Standard(0x123);
        assert!(Frame::new(id, &[0; 8]).is_ok());
        assert!(matches!(
            Frame::new(id, &[0; 9]),
            Err(FrameError::PayloadTooLong(9))
        ));
    }

    #[test]
    fn test_frame_display() {
        let frame = Frame::new(CanId::Standard(0x701), &[0x01, 0xAB]).unwrap();
        assert_eq!(frame.to_string(), "ID=0x701 DLC=2 Data=01 AB");

        let empty = Frame::new(CanId::Standard(0x10), &[]).unwrap();
        assert_eq!(empty.to_string(), "ID=0x010 DLC=0 Data=");
    }

    #[test]
    fn test_remote_frame_has_no_data() {
        let frame = Frame::remote(CanId::Standard(0x700), 4).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn test_parse_cansend_notation() {
        let frame: Frame = "700#AA".parse().unwrap();
        assert_eq!(frame.id(), CanId::Standard(0x700));
        assert_eq!(frame.data(), &[0xAA]);

        let ext: Frame = "18DB33F1#02.3E.00".parse().unwrap();
        assert_eq!(ext.id(), CanId::Extended(0x18DB_33F1));
        assert_eq!(ext.data(), &[0x02, 0x3E, 0x00]);

        let rtr: Frame = "123#R2".parse().unwrap();
        assert!(rtr.is_remote());
        assert_eq!(rtr.dlc(), 2);

        assert_eq!(ext.to_cansend(), "18DB33F1#023E00");
        assert_eq!(rtr.to_cansend(), "123#R2");

        assert!("700AA".parse::<Frame>().is_err());
        assert!("700#AABBCCDDEEFF001122".parse::<Frame>().is_err());
    }
}
