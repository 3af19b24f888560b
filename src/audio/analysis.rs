//! Loudness and spectral features of a PCM block
//!
//! - `loudness`: RMS of the block normalized to [-1, 1], always in [0, 1]
//! - `SpectrumAnalyzer`: Hamming-windowed FFT magnitude spectrum of a block prefix

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Full-scale value of a signed 16-bit sample
const FULL_SCALE: f32 = 32768.0;

/// Root-mean-square level of `samples`, each normalized by 32768.
///
/// An empty block is silent.
pub fn loudness(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / FULL_SCALE as f64;
            x * x
        })
        .sum();

    let rms = (sum / samples.len() as f64).sqrt() as f32;
    // -32768 normalizes to exactly -1.0, so the clamp only absorbs rounding
    rms.clamp(0.0, 1.0)
}

/// Hamming window coefficient `i` of an `n`-point window
fn hamming(i: usize, n: usize) -> f32 {
    if n <= 1 {
        return 1.0;
    }
    0.54 - 0.46 * (2.0 * PI * i as f32 / (n - 1) as f32).cos()
}

/// Windowed FFT over at most `max_size` leading samples of a block.
///
/// Plans are cached per transform length; a pipeline reuses one analyzer
/// for every block so steady-state analysis does not allocate plans.
pub struct SpectrumAnalyzer {
    max_size: usize,
    bins: usize,
    planner: FftPlanner<f32>,
    plan: Option<(usize, Arc<dyn Fft<f32>>)>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// `max_size` caps the transform length, `bins` is how many leading
    /// magnitudes a snapshot reports
    pub fn new(max_size: usize, bins: usize) -> Self {
        Self {
            max_size,
            bins,
            planner: FftPlanner::new(),
            plan: None,
            buffer: Vec::with_capacity(max_size),
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// First `bins` magnitudes of the windowed spectrum of `samples`.
    ///
    /// Only bins below Nyquist are reported, so a very short block yields
    /// fewer values than requested.
    pub fn magnitudes(&mut self, samples: &[i16]) -> Vec<f32> {
        let n = samples.len().min(self.max_size);
        if n == 0 {
            return Vec::new();
        }

        let fft = match &self.plan {
            Some((len, fft)) if *len == n => Arc::clone(fft),
            _ => {
                let fft = self.planner.plan_fft_forward(n);
                self.plan = Some((n, Arc::clone(&fft)));
                fft
            }
        };

        self.buffer.clear();
        self.buffer.extend(
            samples[..n]
                .iter()
                .enumerate()
                .map(|(i, &s)| Complex::new(s as f32 * hamming(i, n), 0.0)),
        );

        fft.process(&mut self.buffer);

        let count = self.bins.min(n / 2);
        self.buffer[..count].iter().map(|c| c.norm()).collect()
    }
}
