//! Message sources
//!
//! A message source produces the payload a modulator consumes: random bits
//! for digital schemes or a band-limited audio-like waveform for analog
//! schemes. Sources own a seeded RNG so a scenario seed reproduces every
//! payload.

use crate::error::{CsrdError, CsrdResult};
use crate::types::BitStream;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Payload carried by a [`Message`]
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// One bit per byte, values 0 or 1
    Bits(BitStream),
    /// Real-valued samples in `[-1, 1]`, one per symbol period
    Audio(Vec<f64>),
}

impl MessagePayload {
    pub fn len(&self) -> usize {
        match self {
            MessagePayload::Bits(b) => b.len(),
            MessagePayload::Audio(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Bits(_) => "bits",
            MessagePayload::Audio(_) => "audio",
        }
    }
}

/// Message record consumed by a modulator
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub payload: MessagePayload,
    /// Symbol rate the payload was generated for (Hz)
    pub symbol_rate: f64,
    /// Number of payload elements requested
    pub message_length: usize,
}

impl Message {
    pub fn bits(bits: BitStream, symbol_rate: f64) -> Self {
        let message_length = bits.len();
        Self {
            payload: MessagePayload::Bits(bits),
            symbol_rate,
            message_length,
        }
    }

    pub fn audio(samples: Vec<f64>, symbol_rate: f64) -> Self {
        let message_length = samples.len();
        Self {
            payload: MessagePayload::Audio(samples),
            symbol_rate,
            message_length,
        }
    }
}

/// Message source kinds known to the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    RandomBit,
    Audio,
}

impl MessageKind {
    pub fn type_id(&self) -> &'static str {
        match self {
            MessageKind::RandomBit => "RandomBit",
            MessageKind::Audio => "Audio",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_uppercase().replace(['-', '_'], "").as_str() {
            "RANDOMBIT" | "RANDOMBITS" | "BITS" => Some(MessageKind::RandomBit),
            "AUDIO" => Some(MessageKind::Audio),
            _ => None,
        }
    }
}

/// Produces message payloads
pub trait MessageSource: std::fmt::Debug + Send {
    fn kind(&self) -> MessageKind;

    /// Generate `length` payload elements for the given symbol rate
    fn generate(&mut self, length: usize, symbol_rate: f64) -> CsrdResult<Message>;

    /// Rewind the RNG to the construction seed
    fn reset(&mut self);
}

fn check_request(length: usize, symbol_rate: f64) -> CsrdResult<()> {
    if length == 0 {
        return Err(CsrdError::EmptyInput("message length is zero".into()));
    }
    if !(symbol_rate.is_finite() && symbol_rate > 0.0) {
        return Err(CsrdError::invalid_field(
            "symbol_rate",
            format!("must be positive, got {}", symbol_rate),
        ));
    }
    Ok(())
}

/// Uniform random bits
#[derive(Debug, Clone)]
pub struct RandomBitSource {
    seed: u64,
    rng: StdRng,
}

impl RandomBitSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl MessageSource for RandomBitSource {
    fn kind(&self) -> MessageKind {
        MessageKind::RandomBit
    }

    fn generate(&mut self, length: usize, symbol_rate: f64) -> CsrdResult<Message> {
        check_request(length, symbol_rate)?;
        let bits = (0..length).map(|_| self.rng.gen_range(0..=1u8)).collect();
        Ok(Message::bits(bits, symbol_rate))
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Synthetic audio: a few random tones plus a little noise, peak-normalised.
///
/// Tone frequencies are drawn below `max_tone_fraction` of the sample rate
/// so the waveform stays well inside the message bandwidth.
#[derive(Debug, Clone)]
pub struct AudioSource {
    seed: u64,
    rng: StdRng,
    max_tones: usize,
    max_tone_fraction: f64,
    noise_level: f64,
}

impl AudioSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            max_tones: 4,
            max_tone_fraction: 0.1,
            noise_level: 0.02,
        }
    }

    pub fn with_max_tones(mut self, max_tones: usize) -> Self {
        self.max_tones = max_tones.max(1);
        self
    }

    pub fn with_noise_level(mut self, noise_level: f64) -> Self {
        self.noise_level = noise_level.max(0.0);
        self
    }
}

impl MessageSource for AudioSource {
    fn kind(&self) -> MessageKind {
        MessageKind::Audio
    }

    fn generate(&mut self, length: usize, symbol_rate: f64) -> CsrdResult<Message> {
        check_request(length, symbol_rate)?;

        let num_tones = self.rng.gen_range(1..=self.max_tones);
        let tones: Vec<(f64, f64, f64)> = (0..num_tones)
            .map(|_| {
                (
                    self.rng.gen_range(0.005..self.max_tone_fraction),
                    self.rng.gen_range(0.2..1.0),
                    self.rng.gen_range(0.0..2.0 * PI),
                )
            })
            .collect();
        let noise = Normal::new(0.0, self.noise_level.max(1e-12))
            .map_err(|e| CsrdError::invalid_parameter("noise_level", e.to_string()))?;

        let mut samples: Vec<f64> = (0..length)
            .map(|n| {
                tones
                    .iter()
                    .map(|&(f, a, p)| a * (2.0 * PI * f * n as f64 + p).sin())
                    .sum::<f64>()
                    + noise.sample(&mut self.rng)
            })
            .collect();

        let peak = samples.iter().fold(0.0f64, |m, &s| m.max(s.abs()));
        if peak > 0.0 {
            samples.iter_mut().for_each(|s| *s /= peak);
        }
        Ok(Message::audio(samples, symbol_rate))
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Build a source by kind
pub fn create_source(kind: MessageKind, seed: u64) -> Box<dyn MessageSource> {
    match kind {
        MessageKind::RandomBit => Box::new(RandomBitSource::new(seed)),
        MessageKind::Audio => Box::new(AudioSource::new(seed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bits_are_binary_and_reproducible() {
        let mut a = RandomBitSource::new(42);
        let mut b = RandomBitSource::new(42);
        let ma = a.generate(4000, 250e3).unwrap();
        let mb = b.generate(4000, 250e3).unwrap();
        assert_eq!(ma, mb);
        assert_eq!(ma.message_length, 4000);
        match &ma.payload {
            MessagePayload::Bits(bits) => {
                assert!(bits.iter().all(|&b| b <= 1));
                let ones = bits.iter().filter(|&&b| b == 1).count();
                assert!(ones > 1800 && ones < 2200);
            }
            other => panic!("unexpected payload {:?}", other.kind()),
        }
    }

    #[test]
    fn test_reset_rewinds() {
        let mut src = RandomBitSource::new(3);
        let first = src.generate(64, 1e3).unwrap();
        src.reset();
        assert_eq!(src.generate(64, 1e3).unwrap(), first);
    }

    #[test]
    fn test_audio_is_peak_normalised() {
        let mut src = AudioSource::new(5);
        let msg = src.generate(2048, 48e3).unwrap();
        match msg.payload {
            MessagePayload::Audio(s) => {
                let peak = s.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
                assert!((peak - 1.0).abs() < 1e-12);
            }
            _ => panic!("expected audio"),
        }
    }

    #[test]
    fn test_invalid_requests() {
        let mut src = RandomBitSource::new(1);
        assert!(matches!(src.generate(0, 1e3), Err(CsrdError::EmptyInput(_))));
        assert!(src.generate(10, 0.0).is_err());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(MessageKind::parse("random_bit"), Some(MessageKind::RandomBit));
        assert_eq!(MessageKind::parse("Audio"), Some(MessageKind::Audio));
        assert_eq!(MessageKind::parse("video"), None);
    }
}
