//! RF front-end simulation
//!
//! Transmit and receive impairment chains built from small, independently
//! testable stages:
//!
//! | Stage          | Module          | Tx | Rx |
//! |----------------|-----------------|----|----|
//! | IQ imbalance   | `impairments`   | ✓  | ✓  |
//! | DC offset      | `impairments`   | ✓  | ✓  |
//! | Phase noise    | `phase_noise`   | ✓  | ✓  |
//! | Amplifier      | `nonlinearity`  | ✓  | ✓  |
//! | Translation    | `translate`     | ✓  | ✓  |
//! | Resampling     | `resample`      | ✓  | ✓  |
//! | Power scaling  | `power`         | ✓  |    |
//! | Thermal noise  | `receive`       |    | ✓  |
//! | AGC            | `receive`       |    | ✓  |

pub mod impairments;
pub mod model;
pub mod nonlinearity;
pub mod phase_noise;
pub mod power;
pub mod receive;
pub mod resample;
pub mod transmit;
pub mod translate;

pub use impairments::{DcOffset, IqImbalance};
pub use model::{DcOffsetRange, IqImbalanceRange, PhaseNoiseRange, RxModel, TxModel};
pub use nonlinearity::{Amplifier, Nonlinearity, NonlinearityMethod, NonlinearitySpec};
pub use phase_noise::{PhaseNoise, PhaseNoiseConfig, PhaseNoiseMask};
pub use power::{normalize_power, PowerReport};
pub use receive::{Agc, RxFrontEnd, RxFrontEndSpec};
pub use resample::Resampler;
pub use transmit::{TxFrontEnd, TxFrontEndSpec};
pub use translate::FrequencyTranslator;
