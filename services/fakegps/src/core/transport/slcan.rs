//! SLCAN (Lawicel) ASCII protocol
//!
//! Commands and frames are carriage-return terminated lines:
//!
//! ```text
//! S8\r                     set bit rate (S0 = 10 kbit/s ... S8 = 1 Mbit/s)
//! O\r / C\r                open / close the CAN channel
//! T1F04242A8C0A1...\r      extended data frame: 8 hex id, dlc, data
//! t1238DEADBEEF\r          standard data frame: 3 hex id, dlc, data
//! \r / \x07                command accepted / rejected
//! ```
//!
//! Received frames may carry a trailing 4-digit timestamp, which is ignored.

use tracing::trace;
use uavcan_legacy::{CanFrame, CanId};

const CR: u8 = b'\r';
const BEL: u8 = 0x07;

/// Upper bound of a well-formed line: `T` + 8 id + 1 dlc + 16 data + 4 timestamp
const MAX_LINE_LENGTH: usize = 30;

/// Command selecting the CAN bit rate, if the adapter has a preset for it
pub fn bitrate_command(bit_rate: u32) -> Option<&'static str> {
    match bit_rate {
        10_000 => Some("S0"),
        20_000 => Some("S1"),
        50_000 => Some("S2"),
        100_000 => Some("S3"),
        125_000 => Some("S4"),
        250_000 => Some("S5"),
        500_000 => Some("S6"),
        800_000 => Some("S7"),
        1_000_000 => Some("S8"),
        _ => None,
    }
}

/// Serialize a data frame into its transmit command
pub fn encode_frame(frame: &CanFrame) -> String {
    let data = common::hex::encode_upper(&frame.data);
    match frame.id {
        CanId::Extended(id) => format!("T{id:08X}{}{data}\r", frame.dlc()),
        CanId::Standard(id) => format!("t{id:03X}{}{data}\r", frame.dlc()),
    }
}

/// Something the adapter said
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlcanEvent {
    /// A received data frame
    Frame(CanFrame),
    /// Command accepted (or transmit acknowledged)
    Ack,
    /// Command rejected (BEL)
    Error,
    /// Line that could not be understood
    Malformed(String),
}

fn parse_frame(line: &[u8]) -> Result<CanFrame, String> {
    if !line.is_ascii() {
        return Err("frame line is not ASCII".to_string());
    }
    let text = String::from_utf8_lossy(line);
    let (extended, id_len) = match line.first() {
        Some(b'T') => (true, 8),
        Some(b't') => (false, 3),
        _ => return Err(format!("not a data frame: {text}")),
    };

    let header_len = 1 + id_len + 1;
    if text.len() < header_len {
        return Err(format!("frame line too short: {text}"));
    }
    let id = u32::from_str_radix(&text[1..1 + id_len], 16)
        .map_err(|e| format!("invalid identifier in {text}: {e}"))?;
    let dlc = text[1 + id_len..header_len]
        .parse::<usize>()
        .map_err(|e| format!("invalid DLC in {text}: {e}"))?;

    let data_end = header_len + dlc * 2;
    let trailing = text.len().checked_sub(data_end);
    if !matches!(trailing, Some(0) | Some(4)) {
        return Err(format!("length does not match DLC {dlc}: {text}"));
    }
    let data = common::hex::decode(&text[header_len..data_end]).map_err(|e| e.to_string())?;

    let can_id = if extended {
        CanId::Extended(id)
    } else {
        CanId::Standard(id as u16)
    };
    CanFrame::new(can_id, data).map_err(|e| e.to_string())
}

/// Splits the serial byte stream into adapter events
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete event, if the buffer holds one
    pub fn next_event(&mut self) -> Option<SlcanEvent> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == CR || b == BEL) else {
                if self.buffer.len() > MAX_LINE_LENGTH {
                    let garbage: Vec<u8> = std::mem::take(&mut self.buffer);
                    return Some(SlcanEvent::Malformed(
                        String::from_utf8_lossy(&garbage).into_owned(),
                    ));
                }
                return None;
            };

            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if line[end] == BEL {
                return Some(SlcanEvent::Error);
            }

            let body = &line[..end];
            match body.first() {
                None | Some(b'z') | Some(b'Z') => return Some(SlcanEvent::Ack),
                Some(b'T') | Some(b't') => {
                    return Some(match parse_frame(body) {
                        Ok(frame) => SlcanEvent::Frame(frame),
                        Err(reason) => SlcanEvent::Malformed(reason),
                    })
                },
                Some(_) => {
                    // Remote frames, status and version replies are not used
                    trace!("Ignoring SLCAN line: {}", String::from_utf8_lossy(body));
                },
            }
        }
    }
}
