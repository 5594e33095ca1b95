//! Filter design used by the modulators and the RF front-end
//!
//! - [`pulse_shaping`]: raised-cosine / root-raised-cosine pulse shaping with
//!   upsampling and group-delay compensation
//! - [`lowpass`]: windowed-sinc prototypes for resampling and fractional delay

pub mod lowpass;
pub mod pulse_shaping;

pub use lowpass::{design_lowpass, fractional_delay_taps, hamming_window, hann_window};
pub use pulse_shaping::{
    design_pulse, PulseShape, PulseShapingFilter, RaisedCosineFilter, RootRaisedCosineFilter,
};
