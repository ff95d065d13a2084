//! Butterworth IIR filtering built from cascaded biquad sections.
//!
//! Every section implements the normalized difference equation
//! `y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]`.
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::SortError;
use crate::signal::Signal;

/// Coefficients of a second-order (or first-order, with `b2 = a2 = 0`) section.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Second-order low-pass section with quality factor `q`.
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b0 = (1.0 - cos_omega) / 2.0;
        Biquad {
            b0: b0 / a0,
            b1: (1.0 - cos_omega) / a0,
            b2: b0 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Second-order high-pass section with quality factor `q`.
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b0 = (1.0 + cos_omega) / 2.0;
        Biquad {
            b0: b0 / a0,
            b1: -(1.0 + cos_omega) / a0,
            b2: b0 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// First-order low-pass section (bilinear transform, prewarped at the cutoff).
    pub fn lowpass_first_order(sample_rate: f64, cutoff: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        Biquad {
            b0: k / (1.0 + k),
            b1: k / (1.0 + k),
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        }
    }

    /// First-order high-pass section (bilinear transform, prewarped at the cutoff).
    pub fn highpass_first_order(sample_rate: f64, cutoff: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        Biquad {
            b0: 1.0 / (1.0 + k),
            b1: -1.0 / (1.0 + k),
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        }
    }
}

/// Quality factors of the second-order sections of a Butterworth filter of the given order.
fn butterworth_qs(order: usize) -> impl Iterator<Item = f64> {
    (0..order / 2).map(move |k| 1.0 / (2.0 * ((2 * k + 1) as f64 * PI / (2 * order) as f64).sin()))
}

fn validate_cutoff(order: usize, cutoff: f64, sample_rate: f64) -> Result<(), SortError> {
    if order == 0 {
        return Err(SortError::InvalidParameter(
            "Filter order must be at least 1".to_string(),
        ));
    }
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(SortError::InvalidParameter(format!(
            "Sampling rate must be positive, got {}",
            sample_rate
        )));
    }
    if !(cutoff > 0.0 && cutoff < sample_rate / 2.0) {
        return Err(SortError::InvalidParameter(format!(
            "Cutoff {} Hz must lie strictly between 0 and the Nyquist frequency {} Hz",
            cutoff,
            sample_rate / 2.0
        )));
    }
    Ok(())
}

/// An IIR filter made of cascaded biquad sections.
#[derive(Debug, PartialEq, Clone)]
pub struct IirFilter {
    sections: Vec<Biquad>,
    // [x1, x2, y1, y2] for each section
    state: Vec<[f64; 4]>,
}

impl IirFilter {
    pub fn new(sections: Vec<Biquad>) -> Self {
        let state = vec![[0.0; 4]; sections.len()];
        IirFilter { sections, state }
    }

    /// Butterworth low-pass filter of the given order.
    pub fn butterworth_lowpass(
        order: usize,
        cutoff: f64,
        sample_rate: f64,
    ) -> Result<Self, SortError> {
        validate_cutoff(order, cutoff, sample_rate)?;
        let mut sections: Vec<Biquad> = butterworth_qs(order)
            .map(|q| Biquad::lowpass(sample_rate, cutoff, q))
            .collect();
        if order % 2 == 1 {
            sections.push(Biquad::lowpass_first_order(sample_rate, cutoff));
        }
        Ok(Self::new(sections))
    }

    /// Butterworth high-pass filter of the given order.
    pub fn butterworth_highpass(
        order: usize,
        cutoff: f64,
        sample_rate: f64,
    ) -> Result<Self, SortError> {
        validate_cutoff(order, cutoff, sample_rate)?;
        let mut sections: Vec<Biquad> = butterworth_qs(order)
            .map(|q| Biquad::highpass(sample_rate, cutoff, q))
            .collect();
        if order % 2 == 1 {
            sections.push(Biquad::highpass_first_order(sample_rate, cutoff));
        }
        Ok(Self::new(sections))
    }

    /// Butterworth band-pass filter: a high-pass at `low` followed by a low-pass at `high`.
    pub fn butterworth_bandpass(
        order: usize,
        low: f64,
        high: f64,
        sample_rate: f64,
    ) -> Result<Self, SortError> {
        if low >= high {
            return Err(SortError::InvalidParameter(format!(
                "Low cutoff {} Hz must be below high cutoff {} Hz",
                low, high
            )));
        }
        let mut sections = Self::butterworth_highpass(order, low, sample_rate)?.sections;
        sections.extend(Self::butterworth_lowpass(order, high, sample_rate)?.sections);
        Ok(Self::new(sections))
    }

    /// Returns the filter sections.
    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Processes a single sample through all cascaded sections.
    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let mut x = input;
        for (c, s) in self.sections.iter().zip(self.state.iter_mut()) {
            let y = c.b0 * x + c.b1 * s[0] + c.b2 * s[1] - c.a1 * s[2] - c.a2 * s[3];
            s[1] = s[0];
            s[0] = x;
            s[3] = s[2];
            s[2] = y;
            x = y;
        }
        x
    }

    /// Causal filtering of a whole sequence, starting from the current state.
    pub fn process(&mut self, samples: &[f64]) -> Vec<f64> {
        samples.iter().map(|x| self.process_sample(*x)).collect()
    }

    /// Zero-phase filtering: forward pass, then backward pass on the reversed output.
    ///
    /// The sequence is extended at both ends by odd reflection to tame the start-up transients.
    pub fn filtfilt(&mut self, samples: &[f64]) -> Vec<f64> {
        let n = samples.len();
        if n < 2 {
            return samples.to_vec();
        }
        let padlen = (3 * (2 * self.sections.len() + 1)).min(n - 1);
        let (first, last) = (samples[0], samples[n - 1]);

        let mut extended = Vec::with_capacity(n + 2 * padlen);
        extended.extend((1..=padlen).rev().map(|i| 2.0 * first - samples[i]));
        extended.extend_from_slice(samples);
        extended.extend((1..=padlen).map(|i| 2.0 * last - samples[n - 1 - i]));

        self.reset();
        let mut forward = self.process(&extended);
        forward.reverse();
        self.reset();
        let mut backward = self.process(&forward);
        backward.reverse();
        self.reset();

        backward[padlen..padlen + n].to_vec()
    }

    /// Resets the filter state to zero.
    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = [0.0; 4]);
    }
}

/// Band-pass a signal once with a causal Butterworth filter.
///
/// The cutoffs are given in Hz; `order` applies to each of the high-pass and low-pass edges.
pub fn bandpass(signal: &Signal, low: f64, high: f64, order: usize) -> Result<Signal, SortError> {
    let mut filter = IirFilter::butterworth_bandpass(order, low, high, signal.sample_rate())?;
    log::debug!(
        "Band-pass filtering {} samples between {} Hz and {} Hz (order {})",
        signal.len(),
        low,
        high,
        order
    );
    Signal::build(filter.process(signal.samples()), signal.sample_rate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn rms(samples: &[f64]) -> f64 {
        (samples.iter().map(|x| x * x).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_butterworth_qs() {
        let qs: Vec<f64> = butterworth_qs(2).collect();
        assert_eq!(qs.len(), 1);
        assert_relative_eq!(qs[0], std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);

        let qs: Vec<f64> = butterworth_qs(4).collect();
        assert_relative_eq!(qs[0], 1.306563, epsilon = 1e-6);
        assert_relative_eq!(qs[1], 0.541196, epsilon = 1e-6);

        assert_eq!(butterworth_qs(3).count(), 1);
    }

    #[test]
    fn test_lowpass_dc_gain() {
        // A constant input settles to the same constant
        for order in 1..=5 {
            let mut filter = IirFilter::butterworth_lowpass(order, 100.0, 1000.0).unwrap();
            let output = filter.process(&vec![1.0; 2000]);
            assert_relative_eq!(output[1999], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_highpass_removes_dc() {
        let mut filter = IirFilter::butterworth_highpass(3, 10.0, 1000.0).unwrap();
        let output = filter.process(&vec![1.0; 5000]);
        assert!(output[4999].abs() < 1e-6);
    }

    #[test]
    fn test_bandpass_attenuation() {
        let fs = 10_000.0;
        let passband = sine(500.0, fs, 20_000);
        let stopband = sine(10.0, fs, 20_000);

        let mut filter = IirFilter::butterworth_bandpass(2, 50.0, 4000.0, fs).unwrap();
        let pass = filter.process(&passband);
        filter.reset();
        let stop = filter.process(&stopband);

        assert!(rms(&pass[10_000..]) > 0.6);
        assert!(rms(&stop[10_000..]) < 0.05);
    }

    #[test]
    fn test_invalid_design() {
        assert!(matches!(
            IirFilter::butterworth_lowpass(0, 100.0, 1000.0),
            Err(SortError::InvalidParameter(_))
        ));
        assert!(matches!(
            IirFilter::butterworth_lowpass(2, 500.0, 1000.0),
            Err(SortError::InvalidParameter(_))
        ));
        assert!(matches!(
            IirFilter::butterworth_bandpass(2, 400.0, 100.0, 1000.0),
            Err(SortError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_filtfilt_zero_phase() {
        // A slow sine passes a zero-phase low-pass without delay
        let fs = 1000.0;
        let input = sine(5.0, fs, 2000);
        let mut filter = IirFilter::butterworth_lowpass(4, 100.0, fs).unwrap();
        let output = filter.filtfilt(&input);
        assert_eq!(output.len(), input.len());
        for i in 500..1500 {
            assert!((output[i] - input[i]).abs() < 1e-2);
        }
    }

    #[test]
    fn test_bandpass_signal() {
        let signal = Signal::build(sine(500.0, 10_000.0, 1000), 10_000.0).unwrap();
        let filtered = bandpass(&signal, 50.0, 4000.0, 2).unwrap();
        assert_eq!(filtered.len(), signal.len());
        assert_eq!(filtered.sample_rate(), signal.sample_rate());
    }
}
