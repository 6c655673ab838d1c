//! Wire protocol for the fan controller
//!
//! Every exchange is a fixed-length request answered by a fixed-length
//! response. There is no length prefix or checksum, so correctness rests on
//! frame lengths and header validation alone.

use fanboy_core::{FanboyError, Result, MAX_SPEED_PERCENT};

/// Full-scale fan supply voltage; 100% speed maps to this
pub const MAX_VOLTS: f32 = 12.0;

/// Sync acknowledgement: the controller is in step with us
pub const SYNC_ACK: u8 = 0x21;

/// Sync reply asking the host to reopen the link
pub const SYNC_RECONNECT: u8 = 0x02;

/// Speed-set acknowledgement
pub const SET_VOLTAGE_ACK: u8 = 0x01;

/// Header of every telemetry response
pub const TELEMETRY_HEADER: [u8; 3] = [0xC0, 0x00, 0x00];

/// Telemetry response length: header plus two value bytes
pub const TELEMETRY_FRAME_LEN: usize = 5;

/// Sync and speed-set responses are a single byte
pub const ACK_FRAME_LEN: usize = 1;

/// Constant framing bytes preceding the voltage in a speed-set request
const SET_VOLTAGE_FRAMING: [u8; 3] = [0xC0, 0x00, 0x00];

/// Opcodes understood by the controller
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Synchronize (0xC0)
    Sync = 0xC0,
    /// Set channel voltage (0x44)
    SetVoltage = 0x44,
    /// Read channel voltage (0x84)
    ReadVolts = 0x84,
    /// Read channel current (0x85)
    ReadAmps = 0x85,
    /// Read channel speed (0x8A)
    ReadRpm = 0x8A,
}

/// Telemetry quantities that can be read per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    Volts,
    Amps,
    Rpm,
}

impl Telemetry {
    pub fn opcode(self) -> Opcode {
        match self {
            Telemetry::Volts => Opcode::ReadVolts,
            Telemetry::Amps => Opcode::ReadAmps,
            Telemetry::Rpm => Opcode::ReadRpm,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Telemetry::Volts => "volts",
            Telemetry::Amps => "amps",
            Telemetry::Rpm => "rpm",
        }
    }
}

/// Meaning of the single byte answering a sync request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReply {
    Synchronized,
    Reconnect,
    Unexpected(u8),
}

/// Build the sync request
pub fn sync_request() -> [u8; 1] {
    [Opcode::Sync as u8]
}

/// Build a telemetry read request for one channel
pub fn telemetry_request(kind: Telemetry, channel: u8) -> [u8; 2] {
    [kind.opcode() as u8, channel]
}

/// Build a speed-set request for one channel
pub fn set_speed_request(channel: u8, percent: u8) -> [u8; 7] {
    let (whole, tenths) = percent_to_voltage_bytes(percent);
    let [a, b, c] = SET_VOLTAGE_FRAMING;
    [Opcode::SetVoltage as u8, channel, a, b, c, whole, tenths]
}

/// Convert a speed percentage to the controller's voltage bytes
///
/// The 0-100% range maps linearly onto 0-12V, encoded as whole volts and
/// tenths of a volt. Uses integer arithmetic: tenths = round(percent * 1.2)
/// - 0% → (0, 0)
/// - 50% → (6, 0)
/// - 33% → (4, 0)  (3.96V)
/// - 100% → (12, 0)
#[inline]
pub fn percent_to_voltage_bytes(percent: u8) -> (u8, u8) {
    let percent = percent.min(MAX_SPEED_PERCENT) as u16;
    // percent * 6 / 5 never lands on .5, so +2 rounds to nearest
    let tenths = (percent * 6 + 2) / 5;
    ((tenths / 10) as u8, (tenths % 10) as u8)
}

/// Interpret a fixed-point pair as `whole + 0.1 * tenths`
#[inline]
pub fn fixed_point_value(whole: u8, tenths: u8) -> f32 {
    whole as f32 + 0.1 * tenths as f32
}

/// Classify the byte answering a sync request
pub fn decode_sync(byte: u8) -> SyncReply {
    match byte {
        SYNC_ACK => SyncReply::Synchronized,
        SYNC_RECONNECT => SyncReply::Reconnect,
        other => SyncReply::Unexpected(other),
    }
}

/// Validate a telemetry frame and return its two value bytes
fn telemetry_payload(frame: &[u8]) -> Result<(u8, u8)> {
    if frame.len() != TELEMETRY_FRAME_LEN {
        return Err(FanboyError::Protocol(format!(
            "Telemetry frame has {} bytes, expected {}",
            frame.len(),
            TELEMETRY_FRAME_LEN
        )));
    }
    if frame[..3] != TELEMETRY_HEADER {
        return Err(FanboyError::Protocol(format!(
            "Invalid telemetry header: {}",
            format_frame(&frame[..3])
        )));
    }
    Ok((frame[3], frame[4]))
}

/// Decode a volts or amps response
pub fn decode_fixed_point(frame: &[u8]) -> Result<f32> {
    let (whole, tenths) = telemetry_payload(frame)?;
    Ok(fixed_point_value(whole, tenths))
}

/// Decode an rpm response (big-endian 16-bit)
pub fn decode_rpm(frame: &[u8]) -> Result<u32> {
    let (high, low) = telemetry_payload(frame)?;
    Ok(high as u32 * 256 + low as u32)
}

/// Check that a speed-set response acknowledges the request
///
/// Any other byte means the stream is out of step and is reported as a
/// protocol error.
pub fn decode_set_ack(frame: &[u8]) -> Result<()> {
    match frame.first() {
        Some(&SET_VOLTAGE_ACK) => Ok(()),
        Some(other) => Err(FanboyError::Protocol(format!(
            "Invalid speed-set acknowledgement: 0x{:02X}",
            other
        ))),
        None => Err(FanboyError::Protocol(
            "Empty speed-set acknowledgement".to_string(),
        )),
    }
}

/// Render bytes as space-separated hex for logging
pub fn format_frame(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
