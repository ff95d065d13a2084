//! Threshold-crossing spike detection with artifact rejection and refractory merging.
//!
//! # Algorithm
//!
//! 1. The threshold is the mean absolute value of the signal times the threshold factor.
//! 2. Every sample above the threshold, far enough from both ends of the signal, is a candidate.
//! 3. For each candidate `i`, in increasing order:
//!    - the forward window `signal[i..i + 2 * spike_window]` is scanned; if its maximum reaches
//!      `max_amplitude` the candidate is an artifact and is dropped,
//!    - otherwise the peak is the first sample reaching that maximum,
//!    - the waveform is re-extracted around the peak, shifted by `offset`, i.e.,
//!      `signal[peak - (spike_window - offset)..peak + spike_window + offset]`,
//!    - the peak is kept only if it lies more than `spike_window` samples after the last kept peak.
//!
//! Any window that would leave the signal drops its candidate.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::SortError;

/// Default half-width of the capture window, in samples.
pub const DEFAULT_SPIKE_WINDOW: usize = 80;
/// Default multiplier applied to the mean absolute signal value.
pub const DEFAULT_THRESHOLD_FACTOR: f64 = 5.0;
/// Default shift of the re-centered window, in samples.
pub const DEFAULT_OFFSET: usize = 10;
/// Default amplitude above which a window is considered an artifact.
pub const DEFAULT_MAX_AMPLITUDE: f64 = 350.0;

/// How the refractory tracker is initialized before the first accepted spike.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum RefractoryBaseline {
    /// No baseline: the first peak surviving artifact rejection is always accepted.
    #[default]
    Unseeded,
    /// The first raw threshold crossing acts as a previously accepted spike, even if it is later
    /// rejected as an artifact. Spikes peaking within `spike_window` samples of it are dropped.
    FirstCrossing,
}

/// Parameters of the spike detector.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Half-width of the capture window, in samples.
    pub spike_window: usize,
    /// Multiplier applied to the mean absolute signal value.
    pub threshold_factor: f64,
    /// Shift of the re-centered window, in samples.
    pub offset: usize,
    /// Windows whose maximum reaches this value are rejected as artifacts.
    pub max_amplitude: f64,
    /// Initialization of the refractory tracker.
    #[serde(default)]
    pub baseline: RefractoryBaseline,
}

impl Default for DetectorParams {
    fn default() -> Self {
        DetectorParams {
            spike_window: DEFAULT_SPIKE_WINDOW,
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
            offset: DEFAULT_OFFSET,
            max_amplitude: DEFAULT_MAX_AMPLITUDE,
            baseline: RefractoryBaseline::default(),
        }
    }
}

impl DetectorParams {
    /// Create new detector parameters.
    /// Returns an error if the window is empty, the threshold factor is not positive, the offset
    /// does not fit in the window, or the artifact ceiling is NaN.
    pub fn build(
        spike_window: usize,
        threshold_factor: f64,
        offset: usize,
        max_amplitude: f64,
        baseline: RefractoryBaseline,
    ) -> Result<Self, SortError> {
        let params = DetectorParams {
            spike_window,
            threshold_factor,
            offset,
            max_amplitude,
            baseline,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the parameters, e.g., after deserialization.
    pub fn validate(&self) -> Result<(), SortError> {
        if self.spike_window == 0 {
            return Err(SortError::InvalidParameter(
                "Spike window must be positive".to_string(),
            ));
        }
        if !self.threshold_factor.is_finite() || self.threshold_factor <= 0.0 {
            return Err(SortError::InvalidParameter(format!(
                "Threshold factor must be positive, got {}",
                self.threshold_factor
            )));
        }
        if self.offset >= self.spike_window {
            return Err(SortError::InvalidParameter(format!(
                "Offset {} must be smaller than the spike window {}",
                self.offset, self.spike_window
            )));
        }
        if self.max_amplitude.is_nan() {
            return Err(SortError::InvalidParameter(
                "Maximum amplitude must not be NaN".to_string(),
            ));
        }
        Ok(())
    }

    /// The number of samples in every extracted waveform.
    pub fn waveform_len(&self) -> usize {
        2 * self.spike_window
    }

    /// The position of the peak inside every extracted waveform.
    pub fn peak_position(&self) -> usize {
        self.spike_window - self.offset
    }
}

/// A detected spike.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpikeEvent {
    /// The index of the peak sample.
    pub sample_index: usize,
    /// The value of the reference signal at the peak.
    pub peak_amplitude: f64,
}

impl SpikeEvent {
    pub fn new(sample_index: usize, peak_amplitude: f64) -> Self {
        SpikeEvent {
            sample_index,
            peak_amplitude,
        }
    }
}

/// The outcome of a detection pass: one waveform per spike, in the same order.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// The amplitude threshold used to select candidates.
    pub threshold: f64,
    /// The detected spikes, sorted by strictly increasing sample index.
    pub spikes: Vec<SpikeEvent>,
    /// The waveform extracted around each spike.
    pub waveforms: Vec<Vec<f64>>,
}

impl Detection {
    /// An empty detection, e.g., when no sample crosses the threshold.
    pub fn new_empty(threshold: f64) -> Self {
        Detection {
            threshold,
            spikes: vec![],
            waveforms: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.spikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    pub fn sample_indices(&self) -> Vec<usize> {
        self.spikes.iter().map(|spike| spike.sample_index).collect()
    }

    pub fn peak_amplitudes(&self) -> Vec<f64> {
        self.spikes.iter().map(|spike| spike.peak_amplitude).collect()
    }

    /// The length of the waveforms, if any.
    pub fn waveform_len(&self) -> Option<usize> {
        self.waveforms.first().map(|waveform| waveform.len())
    }
}

/// Detect spikes in a signal whose spikes are positive deflections.
/// Peak amplitudes are read from the signal itself.
pub fn detect(signal: &[f64], params: &DetectorParams) -> Result<Detection, SortError> {
    detect_with_reference(signal, signal, params)
}

/// Detect spikes in `signal` and report their peak amplitudes from `reference`, typically the
/// unfiltered recording the signal was derived from.
pub fn detect_with_reference(
    signal: &[f64],
    reference: &[f64],
    params: &DetectorParams,
) -> Result<Detection, SortError> {
    params.validate()?;
    if signal.len() != reference.len() {
        return Err(SortError::IncompatibleSignals(format!(
            "Reference has {} samples but the signal has {}",
            reference.len(),
            signal.len()
        )));
    }
    if signal.is_empty() {
        return Ok(Detection::new_empty(0.0));
    }

    let n = signal.len();
    let w = params.spike_window;
    let threshold = signal.iter().map(|x| x.abs()).sum::<f64>() / n as f64 * params.threshold_factor;
    let mut detection = Detection::new_empty(threshold);

    // Candidates lie in (w, n - w - 1)
    let candidates = signal
        .iter()
        .enumerate()
        .take(n.saturating_sub(w + 1))
        .skip(w + 1)
        .filter(|(_, x)| **x > threshold)
        .map(|(i, _)| i);

    let mut last_accepted: Option<usize> = None;
    let mut seeded = params.baseline == RefractoryBaseline::Unseeded;

    for i in candidates {
        if !seeded {
            last_accepted = Some(i);
            seeded = true;
        }

        let peak = match locate_peak(signal, i, params) {
            Some(peak) => peak,
            None => continue,
        };

        let is_new = match last_accepted {
            Some(last) => peak > last && peak - last > w,
            None => true,
        };
        if !is_new {
            continue;
        }

        let waveform = match extract_waveform(signal, peak, params) {
            Ok(waveform) => waveform,
            Err(e) => {
                log::trace!("Dropping spike at {}: {}", peak, e);
                continue;
            }
        };

        detection.spikes.push(SpikeEvent::new(peak, reference[peak]));
        detection.waveforms.push(waveform.to_vec());
        last_accepted = Some(peak);
    }

    log::debug!(
        "Detected {} spikes above threshold {:.4} in {} samples",
        detection.len(),
        threshold,
        n
    );
    Ok(detection)
}

/// Locate the peak following the crossing at `i`.
/// Returns `None` if the forward window leaves the signal or contains an artifact.
fn locate_peak(signal: &[f64], i: usize, params: &DetectorParams) -> Option<usize> {
    let end = i + params.waveform_len();
    if end > signal.len() {
        log::trace!("Dropping crossing at {}: forward window ends past the signal", i);
        return None;
    }

    let (offset, max) = argmax(&signal[i..end])?;

    if max >= params.max_amplitude || max.is_nan() {
        log::trace!("Dropping crossing at {}: artifact of amplitude {}", i, max);
        return None;
    }
    Some(i + offset)
}

/// Position and value of the first maximum of the window.
/// Positive NaN samples compare above every number, so they surface as the maximum.
fn argmax(window: &[f64]) -> Option<(usize, f64)> {
    window
        .iter()
        .enumerate()
        .fold(None, |best, (k, x)| match best {
            Some((_, max)) if x.total_cmp(&max) != Ordering::Greater => best,
            _ => Some((k, *x)),
        })
}

/// Extract the waveform re-centered on `peak` and shifted by the offset.
/// The peak must also keep a margin of more than `spike_window` samples before the end of the signal.
pub fn extract_waveform<'a>(
    signal: &'a [f64],
    peak: usize,
    params: &DetectorParams,
) -> Result<&'a [f64], SortError> {
    let w = params.spike_window;
    let n = signal.len();
    if peak + w + 1 >= n {
        return Err(SortError::OutOfBounds(format!(
            "peak {} lies within {} samples of the end of the signal ({} samples)",
            peak,
            w + 1,
            n
        )));
    }
    let start = w
        .checked_sub(params.offset)
        .and_then(|back| peak.checked_sub(back))
        .ok_or_else(|| {
            SortError::OutOfBounds(format!(
                "window around peak {} starts before the signal",
                peak
            ))
        })?;
    let end = peak + w + params.offset;
    if end > n {
        return Err(SortError::OutOfBounds(format!(
            "window around peak {} ends at {} past the signal ({} samples)",
            peak, end, n
        )));
    }
    Ok(&signal[start..end])
}
