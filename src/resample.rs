//! Decimation (downsampling) for reducing sample rate.
//!
//! Every decimation step first applies a zero-phase Butterworth low-pass below the new Nyquist
//! frequency, then keeps one sample out of `factor`.
use crate::error::SortError;
use crate::filter::IirFilter;
use crate::signal::Signal;

/// The largest integer factor applied in a single decimation step.
pub const MAX_DECIMATION_FACTOR: usize = 10;
/// The order of the anti-aliasing low-pass filter.
pub const ANTI_ALIAS_ORDER: usize = 8;

/// Decimate the samples by an integer factor.
///
/// The output has `ceil(n / factor)` samples. A factor of one returns the input unchanged.
pub fn decimate(samples: &[f64], factor: usize, sample_rate: f64) -> Result<Vec<f64>, SortError> {
    if factor == 0 {
        return Err(SortError::InvalidParameter(
            "Decimation factor must be at least 1".to_string(),
        ));
    }
    if factor == 1 {
        return Ok(samples.to_vec());
    }

    let cutoff = 0.8 * sample_rate / (2.0 * factor as f64);
    let mut filter = IirFilter::butterworth_lowpass(ANTI_ALIAS_ORDER, cutoff, sample_rate)?;
    let filtered = filter.filtfilt(samples);

    Ok(filtered.into_iter().step_by(factor).collect())
}

/// Downsample a signal towards the target rate by repeated integer decimation.
///
/// Each step uses the largest factor not exceeding [`MAX_DECIMATION_FACTOR`] nor the remaining
/// rate ratio; the loop stops once the ratio drops below two. The effective rate is carried by the
/// returned signal and may stay above the target when the ratio is not an integer.
pub fn downsample(signal: &Signal, target_rate: f64) -> Result<Signal, SortError> {
    if !target_rate.is_finite() || target_rate <= 0.0 {
        return Err(SortError::InvalidParameter(format!(
            "Target rate must be positive, got {}",
            target_rate
        )));
    }

    let mut samples = signal.samples().to_vec();
    let mut rate = signal.sample_rate();
    while rate / target_rate >= 2.0 {
        let factor = ((rate / target_rate).floor() as usize).min(MAX_DECIMATION_FACTOR);
        samples = decimate(&samples, factor, rate)?;
        rate /= factor as f64;
        log::debug!("Decimated by {}: {} samples at {} Hz", factor, samples.len(), rate);
    }

    Signal::build(samples, rate)
}
