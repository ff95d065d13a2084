//! Module implementing the concept of a sampled voltage trace.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SortError;

/// A single-channel recording sampled at a fixed rate.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// The recorded samples, in acquisition order.
    samples: Vec<f64>,
    /// The sampling rate in Hz.
    sample_rate: f64,
}

impl Signal {
    /// Create a new signal from its samples and sampling rate.
    /// Returns an error if the sampling rate is not a positive finite number.
    pub fn build(samples: Vec<f64>, sample_rate: f64) -> Result<Self, SortError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(SortError::InvalidParameter(format!(
                "Sampling rate must be positive and finite, got {}",
                sample_rate
            )));
        }
        Ok(Signal {
            samples,
            sample_rate,
        })
    }

    /// Read one column of a delimited numeric text table.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn load_delimited<P: AsRef<Path>>(
        path: P,
        delimiter: char,
        column: usize,
        sample_rate: f64,
    ) -> Result<Self, SortError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), delimiter, column, sample_rate)
    }

    /// Same as [`Signal::load_delimited`] but from any buffered reader.
    pub fn from_reader<R: BufRead>(
        reader: R,
        delimiter: char,
        column: usize,
        sample_rate: f64,
    ) -> Result<Self, SortError> {
        let mut samples = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let field = line.split(delimiter).nth(column).ok_or_else(|| {
                SortError::ParseError(format!("Line {}: no column {}", n + 1, column))
            })?;
            let value = field.trim().parse::<f64>().map_err(|e| {
                SortError::ParseError(format!("Line {}: invalid value {:?} ({})", n + 1, field, e))
            })?;
            samples.push(value);
        }
        log::debug!("Loaded {} samples from column {}", samples.len(), column);
        Self::build(samples, sample_rate)
    }

    /// Returns the samples of the signal.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Returns the sampling rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of the recording in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Returns a copy of the signal with flipped polarity.
    /// Used to turn negative-going spikes into positive deflections before detection.
    pub fn inverted(&self) -> Signal {
        Signal {
            samples: self.samples.iter().map(|x| -x).collect(),
            sample_rate: self.sample_rate,
        }
    }
}
