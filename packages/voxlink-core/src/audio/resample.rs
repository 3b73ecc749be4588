//! Sample-rate conversion between the carrier and model audio clocks.
//!
//! Two fixed ratios only: 8 kHz → 16 kHz (caller audio up to the model) and
//! 24 kHz → 8 kHz (model audio down to the carrier). Both converters are
//! stateful across calls so that packet boundaries don't produce clicks, and
//! both reset cheaply when a call ends.

use std::collections::VecDeque;

/// Decimation factor for the 24 kHz → 8 kHz path.
const DECIMATION: usize = 3;

/// Low-pass cutoff for the decimator (Hz).
///
/// Telephony bandwidth tops out at ~3.4 kHz; keeping the −3 dB point there
/// leaves headroom below the 4 kHz Nyquist of the 8 kHz output and prevents
/// audible aliasing.
const LOWPASS_CUTOFF_HZ: f64 = 3400.0;

/// FIR tap count for the decimation low-pass. Odd so the filter is symmetric
/// around a center tap.
const LOWPASS_TAPS: usize = 33;

/// Doubles the sample rate by linear interpolation (8 kHz → 16 kHz).
///
/// Each input sample yields two output samples: the midpoint between the
/// previous and current sample, then the current sample. The previous sample
/// persists across calls so packet boundaries interpolate correctly.
#[derive(Debug, Default)]
pub struct Upsampler {
    last: i16,
}

impl Upsampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a block of samples, returning twice as many.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(input.len() * 2);
        for &sample in input {
            let mid = ((i32::from(self.last) + i32::from(sample)) / 2) as i16;
            out.push(mid);
            out.push(sample);
            self.last = sample;
        }
        out
    }

    /// Clears interpolation state.
    pub fn reset(&mut self) {
        self.last = 0;
    }
}

/// Reduces 24 kHz input to 8 kHz by low-pass filtering and 3:1 decimation.
///
/// The filter is a Hamming-windowed sinc computed once at construction. The
/// delay line and decimation phase persist across calls, so arbitrary packet
/// sizes (including packets shorter than one output sample) are handled by
/// construction: input that doesn't complete an output sample stays in the
/// delay line until the next call.
pub struct Downsampler {
    coeffs: Vec<f32>,
    history: VecDeque<f32>,
    phase: usize,
}

impl Downsampler {
    pub fn new() -> Self {
        let coeffs = lowpass_coefficients(LOWPASS_TAPS, LOWPASS_CUTOFF_HZ, 24_000.0);
        let mut history = VecDeque::with_capacity(LOWPASS_TAPS);
        history.extend(std::iter::repeat(0.0f32).take(LOWPASS_TAPS));
        Self {
            coeffs,
            history,
            phase: 0,
        }
    }

    /// Converts a block of 24 kHz samples, returning roughly a third as many.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(input.len() / DECIMATION + 1);
        for &sample in input {
            self.history.pop_front();
            self.history.push_back(f32::from(sample));

            self.phase += 1;
            if self.phase == DECIMATION {
                self.phase = 0;
                let mut acc = 0.0f32;
                for (h, c) in self.history.iter().zip(self.coeffs.iter()) {
                    acc += h * c;
                }
                out.push(acc.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16);
            }
        }
        out
    }

    /// Clears the delay line and decimation phase.
    pub fn reset(&mut self) {
        for v in self.history.iter_mut() {
            *v = 0.0;
        }
        self.phase = 0;
    }
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming-windowed sinc low-pass, normalized to unity DC gain.
fn lowpass_coefficients(taps: usize, cutoff_hz: f64, sample_rate: f64) -> Vec<f32> {
    let fc = cutoff_hz / sample_rate;
    let center = (taps - 1) as f64 / 2.0;
    let mut coeffs: Vec<f64> = (0..taps)
        .map(|n| {
            let x = n as f64 - center;
            let sinc = if x.abs() < f64::EPSILON {
                2.0 * fc
            } else {
                (2.0 * std::f64::consts::PI * fc * x).sin() / (std::f64::consts::PI * x)
            };
            let window = 0.54
                - 0.46 * (2.0 * std::f64::consts::PI * n as f64 / (taps - 1) as f64).cos();
            sinc * window
        })
        .collect();

    let sum: f64 = coeffs.iter().sum();
    for c in coeffs.iter_mut() {
        *c /= sum;
    }
    coeffs.into_iter().map(|c| c as f32).collect()
}
