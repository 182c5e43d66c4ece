//! Real-time spectrum analysis for visualization
//!
//! Mirrors the behaviour of a browser analyser node: Blackman-windowed
//! transform over the most recent `fft_size` samples, exponential smoothing
//! between frames, and a byte mapping of the decibel range.

use serde::Serialize;
use std::collections::VecDeque;
use std::f32::consts::PI;

pub const DEFAULT_FFT_SIZE: usize = 256;
const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Amplitude bins (0..=255), lowest frequency first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FrequencySample(pub Vec<u8>);

impl FrequencySample {
    pub fn bins(&self) -> &[u8] {
        &self.0
    }

    pub fn is_silent(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

pub struct FrequencyAnalyzer {
    fft_size: usize,
    window: Vec<f32>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    buffer: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl FrequencyAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32);
        let n = fft_size as f32;

        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let cos_table = (0..fft_size).map(|i| (2.0 * PI * i as f32 / n).cos()).collect();
        let sin_table = (0..fft_size).map(|i| (2.0 * PI * i as f32 / n).sin()).collect();

        Self {
            fft_size,
            window,
            cos_table,
            sin_table,
            buffer: std::iter::repeat(0.0).take(fft_size).collect(),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed normalized samples (-1.0..1.0)
    pub fn push(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.fft_size);
        for &s in &samples[skip..] {
            if self.buffer.len() == self.fft_size {
                self.buffer.pop_front();
            }
            self.buffer.push_back(s);
        }
    }

    /// Feed 16-bit PCM samples
    pub fn push_pcm(&mut self, samples: &[i16]) {
        let skip = samples.len().saturating_sub(self.fft_size);
        let normalized: Vec<f32> = samples[skip..]
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect();
        self.push(&normalized);
    }

    /// Take a spectrum snapshot of the current window
    pub fn sample(&mut self) -> FrequencySample {
        let n = self.fft_size;
        let windowed: Vec<f32> = self
            .buffer
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let bins = (0..n / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (j, &x) in windowed.iter().enumerate() {
                    let idx = (k * j) % n;
                    re += x * self.cos_table[idx];
                    im -= x * self.sin_table[idx];
                }
                let magnitude = (re * re + im * im).sqrt() / n as f32;

                let smoothed = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
                self.smoothed[k] = smoothed;

                if smoothed <= f32::EPSILON {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect();

        FrequencySample(bins)
    }

    /// Forget buffered audio and smoothing history
    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}
