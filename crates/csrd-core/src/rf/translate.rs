//! Carrier frequency translation
//!
//! A complex-exponential multiply; positive offsets move the signal up,
//! negative offsets down. There is no interpolation stage, so no image
//! appears at the mirror frequency. Every antenna sees the same oscillator.

use crate::types::IQSample;
use std::f64::consts::PI;

/// NCO-based frequency translator
#[derive(Debug, Clone)]
pub struct FrequencyTranslator {
    offset_hz: f64,
    sample_rate: f64,
    phase_inc: f64,
    phase: f64,
}

impl FrequencyTranslator {
    pub fn new(offset_hz: f64, sample_rate: f64) -> Self {
        Self {
            offset_hz,
            sample_rate,
            phase_inc: 2.0 * PI * offset_hz / sample_rate,
            phase: 0.0,
        }
    }

    pub fn offset_hz(&self) -> f64 {
        self.offset_hz
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_identity(&self) -> bool {
        self.offset_hz == 0.0
    }

    /// Translate one buffer in place, advancing the oscillator
    pub fn process(&mut self, samples: &mut [IQSample]) {
        for s in samples.iter_mut() {
            *s *= IQSample::from_polar(1.0, self.phase);
            // Increments may exceed a full turn when |offset| > fs
            self.phase = (self.phase + self.phase_inc).rem_euclid(2.0 * PI);
        }
    }

    /// Translate every antenna with the same phase sequence
    pub fn process_antennas(&mut self, antennas: &mut [Vec<IQSample>]) {
        let start = self.phase;
        let mut end = start;
        for antenna in antennas.iter_mut() {
            self.phase = start;
            self.process(antenna);
            end = self.phase;
        }
        self.phase = end;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{peak_bin, FftProcessor};

    #[test]
    fn test_tone_lands_on_offset_without_mirror() {
        let fs = 1e6;
        let n = 1000;
        let offset = 100e3;
        let mut samples = vec![IQSample::new(1.0, 0.0); n];
        FrequencyTranslator::new(offset, fs).process(&mut samples);

        let spectrum = FftProcessor::new(n).fft(&samples);
        let peak = peak_bin(&spectrum);
        let bin_hz = fs / n as f64;
        assert_eq!(peak, (offset / bin_hz) as usize);

        let mirror = n - (offset / bin_hz) as usize;
        let ratio_db = 20.0 * (spectrum[mirror].norm() / spectrum[peak].norm()).log10();
        assert!(ratio_db < -40.0, "mirror at {:.1} dB", ratio_db);
    }

    #[test]
    fn test_negative_offset() {
        let fs = 1e6;
        let n = 1000;
        let mut samples = vec![IQSample::new(1.0, 0.0); n];
        FrequencyTranslator::new(-250e3, fs).process(&mut samples);
        let spectrum = FftProcessor::new(n).fft(&samples);
        assert_eq!(peak_bin(&spectrum), n - 250);
    }

    #[test]
    fn test_offset_above_sample_rate_keeps_phase_wrapped() {
        let fs = 1e5;
        let offset = 3.7 * fs;
        let n = 200_000;
        let mut t = FrequencyTranslator::new(offset, fs);
        let mut samples = vec![IQSample::new(1.0, 0.0); n];
        t.process(&mut samples);
        assert!((0.0..2.0 * PI).contains(&t.phase));

        for &i in &[0usize, 1, 17, n / 2, n - 1] {
            let expected = IQSample::from_polar(1.0, (2.0 * PI * offset / fs * i as f64).rem_euclid(2.0 * PI));
            assert!((samples[i] - expected).norm() < 1e-6, "sample {}", i);
        }
    }

    #[test]
    fn test_antennas_share_phase_and_stream_is_continuous() {
        let mut t = FrequencyTranslator::new(1e3, 1e5);
        let mut antennas = vec![vec![IQSample::new(1.0, 0.0); 64]; 3];
        t.process_antennas(&mut antennas);
        assert_eq!(antennas[0], antennas[2]);

        let mut whole = vec![IQSample::new(1.0, 0.0); 128];
        FrequencyTranslator::new(1e3, 1e5).process(&mut whole);
        let mut tail = vec![IQSample::new(1.0, 0.0); 64];
        t.process(&mut tail);
        assert!((tail[0] - whole[64]).norm() < 1e-9);
    }
}
