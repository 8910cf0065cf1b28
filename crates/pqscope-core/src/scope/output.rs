//! Frame output formatting
//!
//! Each emitted sample becomes one text line, either raw physical values
//! (`timestamp v i p leakage`) or pixel-mapped integers (`x y0 y1 y2 y3`).
//! A frame ends with an empty terminator line.
//!
//! ## Terminators
//!
//! - [`Terminator::Fast`]: the empty line is only written into the buffered
//!   writer, keeping throughput high while frames keep coming.
//! - [`Terminator::Flush`]: the empty line is written and the writer is
//!   flushed, because no further data is imminent (stopped, or the frame
//!   that ends an inrush capture).

use super::sample::Sample;
use crate::settings::DisplaySettings;
use crate::CHANNELS;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Line format of emitted samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `timestamp v i p leakage` in physical units
    #[default]
    Raw,
    /// `x y0 y1 y2 y3` in display pixels
    Pixels,
}

/// How a frame is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Fast,
    Flush,
}

/// Mapping from (timestamp, value) to display pixels
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMap {
    width: f64,
    half_height: f64,
    /// Seconds between the left edge and the trigger instant
    pre_time: f64,
    /// Seconds spanned by the full width
    frame_duration: f64,
    /// Pixels per physical unit, per channel
    gains: [f64; CHANNELS],
}

impl PixelMap {
    /// Build the mapping for one frame geometry
    ///
    /// # Arguments
    /// * `display` - Plot size and per-channel vertical scales
    /// * `pre_time` - Seconds of the frame before the trigger instant
    /// * `frame_duration` - Seconds covered by one frame
    pub fn new(display: &DisplaySettings, pre_time: f64, frame_duration: f64) -> Self {
        let height = f64::from(display.height);
        let divisions = f64::from(display.vertical_divisions);
        let mut gains = [0.0; CHANNELS];
        for (gain, scale) in gains.iter_mut().zip(display.channel_scales.iter()) {
            *gain = height / (divisions * scale);
        }
        Self {
            width: f64::from(display.width),
            half_height: height / 2.0,
            pre_time,
            frame_duration,
            gains,
        }
    }

    /// Horizontal pixel for a timestamp relative to the trigger instant
    pub fn x(&self, timestamp: f64) -> i64 {
        ((timestamp + self.pre_time) / self.frame_duration * self.width).round() as i64
    }

    /// Vertical pixel for a value on `channel` (0 at the top edge)
    pub fn y(&self, channel: usize, value: f64) -> i64 {
        (self.half_height - value * self.gains[channel]).round() as i64
    }
}

/// Buffered frame writer
pub struct FrameWriter<W: Write> {
    inner: W,
    format: OutputFormat,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, format: OutputFormat) -> Self {
        Self { inner, format }
    }

    /// Write one sample line
    pub fn write_sample(
        &mut self,
        timestamp: f64,
        sample: &Sample,
        pixels: &PixelMap,
    ) -> io::Result<()> {
        let [v, i, p, l] = sample.channels;
        match self.format {
            OutputFormat::Raw => writeln!(
                self.inner,
                "{:.9} {:.6} {:.6} {:.6} {:.6}",
                timestamp, v, i, p, l
            ),
            OutputFormat::Pixels => writeln!(
                self.inner,
                "{} {} {} {} {}",
                pixels.x(timestamp),
                pixels.y(0, v),
                pixels.y(1, i),
                pixels.y(2, p),
                pixels.y(3, l)
            ),
        }
    }

    /// Close the current frame
    pub fn end_frame(&mut self, terminator: Terminator) -> io::Result<()> {
        writeln!(self.inner)?;
        if terminator == Terminator::Flush {
            self.inner.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
