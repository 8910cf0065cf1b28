//! Append-only sample ring buffer with unbounded logical pointers
//!
//! Samples are addressed by an ever-increasing logical pointer. Only the
//! physical index is wrapped (`pointer mod capacity`), so pointer arithmetic
//! in the scheduler never has to reason about wrap-around.
//!
//! ## Capacity contract
//!
//! `read` is only meaningful for pointers no older than
//! `written - capacity`. The scheduler caps stopped-mode acquisition at a
//! look-ahead of `capacity / 2` samples past the frozen trigger, and the
//! configuration layer rejects any frame longer than `capacity / 2 - 2`.
//! The oldest sample a frame can need is `frame_samples + 1` before its
//! trigger, so it is always resident. `read` itself does not check the age
//! of the pointer.
//!
//! At 1 MHz a `u64` write counter lasts several hundred thousand years, so
//! overflow is not handled.

use super::sample::Sample;

/// Log every Nth parse failure at warn level (the rest at trace)
const PARSE_WARN_EVERY: u64 = 1000;

/// Ring buffer of samples with a monotonically increasing write pointer
#[derive(Debug)]
pub struct SampleStore {
    /// Physical storage, zero-initialised
    buffer: Vec<Sample>,
    /// Number of samples ever stored (the next logical index to write)
    written: u64,
    /// Number of lines that failed to parse
    parse_failures: u64,
}

impl SampleStore {
    /// Create a store with a fixed physical capacity
    ///
    /// # Arguments
    /// * `capacity` - Number of samples kept resident (clamped to at least 2)
    ///
    /// # Example
    /// ```
    /// use pqscope_core::scope::store::SampleStore;
    ///
    /// let store = SampleStore::new(1024);
    /// assert_eq!(store.capacity(), 1024);
    /// assert!(store.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![Sample::ZERO; capacity.max(2)],
            written: 0,
            parse_failures: 0,
        }
    }

    /// Parse and append one raw input line
    ///
    /// An unparseable line is replaced by [`Sample::ZERO`] and reported as a
    /// diagnostic. The store pointer advances by exactly one either way.
    ///
    /// # Example
    /// ```
    /// use pqscope_core::scope::store::SampleStore;
    /// use pqscope_core::Sample;
    ///
    /// let mut store = SampleStore::new(16);
    /// store.store("1 2 3 4");
    /// assert_eq!(store.store("garbage"), Sample::ZERO);
    /// assert_eq!(store.sp(), 1);
    /// assert_eq!(store.parse_failures(), 1);
    /// ```
    pub fn store(&mut self, raw_line: &str) -> Sample {
        let sample = match raw_line.parse::<Sample>() {
            Ok(sample) => sample,
            Err(e) => {
                self.parse_failures += 1;
                if self.parse_failures == 1 || self.parse_failures % PARSE_WARN_EVERY == 0 {
                    tracing::warn!(
                        pointer = self.written,
                        failures = self.parse_failures,
                        error = %e,
                        "Unparseable input line, substituting zero sample"
                    );
                } else {
                    tracing::trace!(pointer = self.written, error = %e, "parse_failure");
                }
                Sample::ZERO
            }
        };
        self.push(sample);
        sample
    }

    /// Append an already-parsed sample
    pub fn push(&mut self, sample: Sample) {
        let index = self.physical_index(self.written as i64);
        self.buffer[index] = sample;
        self.written += 1;
    }

    /// Read the sample at a logical pointer
    ///
    /// Negative pointers address the pre-history before the first sample.
    /// Until the buffer wraps for the first time they read as zero samples.
    pub fn read(&self, pointer: i64) -> Sample {
        self.buffer[self.physical_index(pointer)]
    }

    fn physical_index(&self, pointer: i64) -> usize {
        pointer.rem_euclid(self.buffer.len() as i64) as usize
    }

    /// Logical pointer of the newest stored sample (`sp`)
    ///
    /// Returns 0 before anything has been stored; check [`Self::is_empty`]
    /// to tell the two apart.
    pub fn sp(&self) -> u64 {
        self.written.saturating_sub(1)
    }

    /// Number of samples stored so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Whether no sample has been stored yet
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Newest stored sample
    pub fn latest(&self) -> Sample {
        self.read(self.sp() as i64)
    }

    /// Sample stored immediately before the newest one
    pub fn previous(&self) -> Sample {
        self.read(self.sp() as i64 - 1)
    }

    /// Physical capacity in samples
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines that failed to parse
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }
}
