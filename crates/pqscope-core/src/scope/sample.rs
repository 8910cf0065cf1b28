//! Four-channel measurement sample and input line parsing
//!
//! A sample carries no timestamp. Its time is derived from its logical
//! position in the stream and the configured sample interval.

use crate::CHANNELS;
use std::str::FromStr;
use thiserror::Error;

/// Channel index of the voltage reading
pub const VOLTAGE: usize = 0;
/// Channel index of the current reading
pub const CURRENT: usize = 1;
/// Channel index of the derived power reading
pub const POWER: usize = 2;
/// Channel index of the earth-leakage current reading
pub const LEAKAGE: usize = 3;

/// Errors produced while parsing one input line
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },

    #[error("field {index} is not a number: {value:?}")]
    InvalidNumber { index: usize, value: String },
}

/// One acquisition instant across all four channels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    /// Channel readings in [`VOLTAGE`], [`CURRENT`], [`POWER`], [`LEAKAGE`] order
    pub channels: [f64; CHANNELS],
}

impl Sample {
    /// All-zero sample, substituted for unparseable input
    pub const ZERO: Sample = Sample {
        channels: [0.0; CHANNELS],
    };

    /// Create a sample from the four channel readings
    pub fn new(voltage: f64, current: f64, power: f64, leakage: f64) -> Self {
        Self {
            channels: [voltage, current, power, leakage],
        }
    }

    /// Reading on `channel`
    ///
    /// Out-of-range channels read as 0.0 so a mis-set trigger channel
    /// never panics the sample loop.
    pub fn channel(&self, channel: usize) -> f64 {
        self.channels.get(channel).copied().unwrap_or(0.0)
    }

    pub fn voltage(&self) -> f64 {
        self.channels[VOLTAGE]
    }

    pub fn current(&self) -> f64 {
        self.channels[CURRENT]
    }

    pub fn power(&self) -> f64 {
        self.channels[POWER]
    }

    pub fn leakage(&self) -> f64 {
        self.channels[LEAKAGE]
    }
}

impl FromStr for Sample {
    type Err = ParseError;

    /// Parse the first four whitespace-separated decimal fields.
    ///
    /// Trailing fields are ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut channels = [0.0; CHANNELS];
        let mut fields = line.split_whitespace();

        for (index, slot) in channels.iter_mut().enumerate() {
            let field = fields.next().ok_or(ParseError::MissingFields {
                expected: CHANNELS,
                found: index,
            })?;
            *slot = field.parse().map_err(|_| ParseError::InvalidNumber {
                index,
                value: field.to_string(),
            })?;
        }

        Ok(Self { channels })
    }
}
