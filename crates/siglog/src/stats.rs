//! Streaming statistics over sample windows.
//!
//! [`Statistics`] implements Welford's online mean/variance update with
//! separate min/max tracking, plus an O(1) [`combine`](Statistics::combine)
//! of two windows that preserves numerical stability. The writer uses it to
//! build summary entries while samples stream in; the reader uses the same
//! merge to splice exact edge recomputation together with stored summaries.

/// Number of values in one summary entry (mean, std, min, max).
pub const SUMMARY_FIELDS: usize = 4;

/// Serialized size of one summary entry in bytes.
pub const SUMMARY_ENTRY_SIZE: usize = SUMMARY_FIELDS * 8;

/// Online mean/variance/min/max accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Rebuilds an accumulator from a stored summary entry and its window
    /// count. The inverse of [`summary`](Statistics::summary).
    pub fn from_summary(entry: &SummaryEntry, count: u64) -> Self {
        if count == 0 || !entry.mean.is_finite() {
            return Self::new();
        }
        Self {
            count,
            mean: entry.mean,
            m2: entry.std * entry.std * count as f64,
            min: entry.min,
            max: entry.max,
        }
    }

    /// Adds one value.
    pub fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }
    }

    /// Returns the number of accumulated values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the mean, NaN when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Returns the population variance, NaN when empty.
    pub fn var(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Returns the population standard deviation, NaN when empty.
    pub fn std(&self) -> f64 {
        self.var().sqrt()
    }

    /// Returns the minimum, NaN when empty.
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.min
        }
    }

    /// Returns the maximum, NaN when empty.
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.max
        }
    }

    /// Merges two windows in O(1).
    ///
    /// Uses the pairwise update for the second central moment, which keeps
    /// cancellation error bounded even when the window means differ widely.
    pub fn combine(&self, other: &Statistics) -> Statistics {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let count = self.count + other.count;
        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let n = count as f64;
        let delta = other.mean - self.mean;
        Statistics {
            count,
            mean: self.mean + delta * (n2 / n),
            m2: self.m2 + other.m2 + delta * delta * (n1 * n2 / n),
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Folds another window into this one in place.
    pub fn merge(&mut self, other: &Statistics) {
        *self = self.combine(other);
    }

    /// Materializes the on-disk summary entry. All fields are NaN when the
    /// window holds no valid samples.
    pub fn summary(&self) -> SummaryEntry {
        SummaryEntry {
            mean: self.mean(),
            std: self.std(),
            min: self.min(),
            max: self.max(),
        }
    }
}

/// One stored summary entry: mean, std, min, max over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryEntry {
    /// Arithmetic mean of the window.
    pub mean: f64,
    /// Population standard deviation of the window.
    pub std: f64,
    /// Minimum value of the window.
    pub min: f64,
    /// Maximum value of the window.
    pub max: f64,
}

impl SummaryEntry {
    /// Appends the 32-byte little-endian encoding to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mean.to_le_bytes());
        out.extend_from_slice(&self.std.to_le_bytes());
        out.extend_from_slice(&self.min.to_le_bytes());
        out.extend_from_slice(&self.max.to_le_bytes());
    }

    /// Decodes one entry from a 32-byte little-endian slice.
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            mean: f64::from_le_bytes(buf[0..8].try_into().unwrap()),
            std: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            min: f64::from_le_bytes(buf[16..24].try_into().unwrap()),
            max: f64::from_le_bytes(buf[24..32].try_into().unwrap()),
        }
    }
}
