//! Core types and data structures for fanboy

use crate::error::FanboyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest speed percentage accepted by the controller
pub const MAX_SPEED_PERCENT: u8 = 100;

/// One fan output on the controller.
///
/// Channels are owned by the command actor; everything outside it only ever
/// sees copies taken from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id, 1..=N
    pub id: u8,
    /// Last observed speed in revolutions per minute
    pub rpm: u32,
    /// Last observed supply voltage
    pub volts: f32,
    /// Last observed current draw
    pub amps: f32,
    /// `volts * amps`, recomputed on every update
    pub wattage: f32,
    /// Last speed percentage requested for this channel
    #[serde(default)]
    pub speed: Option<u8>,
}

impl Channel {
    /// Create a channel with no observations yet
    pub fn new(id: u8) -> Self {
        Self {
            id,
            rpm: 0,
            volts: 0.0,
            amps: 0.0,
            wattage: 0.0,
            speed: None,
        }
    }

    /// Record a complete telemetry sample for this channel
    pub fn apply_telemetry(&mut self, volts: f32, amps: f32, rpm: u32) {
        self.volts = volts;
        self.amps = amps;
        self.rpm = rpm;
        self.wattage = volts * amps;
    }
}

/// Build the dense channel table `1..=count`
pub fn channel_table(count: u8) -> Vec<Channel> {
    (1..=count).map(Channel::new).collect()
}

/// Target of a speed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelector {
    /// Every configured channel, in id order
    All,
    /// A single channel id
    Channel(u8),
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelector::All => write!(f, "all"),
            ChannelSelector::Channel(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ChannelSelector {
    type Err = FanboyError;

    /// Parse `"all"` or a channel id
    ///
    /// # Examples
    ///
    /// ```
    /// use std::str::FromStr;
    /// use fanboy_core::ChannelSelector;
    ///
    /// assert_eq!(ChannelSelector::from_str("all").unwrap(), ChannelSelector::All);
    /// assert_eq!(ChannelSelector::from_str("3").unwrap(), ChannelSelector::Channel(3));
    /// assert!(ChannelSelector::from_str("fan").is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(ChannelSelector::All);
        }
        s.parse::<u8>().map(ChannelSelector::Channel).map_err(|_| {
            FanboyError::InvalidInput(format!(
                "Invalid channel selector: '{}'. Expected 'all' or a channel id",
                s
            ))
        })
    }
}

/// Clamp any caller-supplied speed into 0..=100
#[inline]
pub fn clamp_percentage(percent: i64) -> u8 {
    percent.clamp(0, MAX_SPEED_PERCENT as i64) as u8
}
