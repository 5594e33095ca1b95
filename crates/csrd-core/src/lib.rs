//! # CSRD Core
//!
//! Signal model and signal-chain blocks for the CSRD radio dataset
//! generator: modulators for every supported TypeID, message sources, and
//! the transmit/receive RF front-end impairment chains.
//!
//! ## Signal Flow
//!
//! ```text
//! Message ─► Modulator ─► TxFrontEnd ─► (channel, csrd-sim) ─► RxFrontEnd ─► labelled frame
//!   bits       baseband     IQ/DC/PN/PA        AWGN / fading      NF/PN/DC/IQ
//!   audio      + bandwidth  translate/resample                    AGC
//!                           power
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use csrd_core::message::{MessageSource, RandomBitSource};
//! use csrd_core::modulate::{Modulator, ModulatorOverrides, ModulatorParams, ModulatorRegistry};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let registry = ModulatorRegistry::with_defaults();
//! let params = ModulatorParams::new(16, 4, 1e6);
//! let mut rng = StdRng::seed_from_u64(7);
//! let qam = registry
//!     .configure("QAM", &params, &ModulatorOverrides::default(), &mut rng)
//!     .unwrap();
//!
//! let message = RandomBitSource::new(1).generate(4000, qam.symbol_rate()).unwrap();
//! let out = qam.modulate(&message).unwrap();
//! assert_eq!(out.samples[0].len(), 4000);
//! ```

pub mod config;
pub mod error;
pub mod filters;
pub mod message;
pub mod modulate;
pub mod observe;
pub mod ostbc;
pub mod rf;
pub mod signal;
pub mod spectrum;
pub mod types;

pub use config::ConfigError;
pub use error::{CsrdError, CsrdResult};
pub use message::{Message, MessageKind, MessagePayload, MessageSource};
pub use modulate::{
    fill_defaults, ModulationKind, Modulated, Modulator, ModulatorConfig, ModulatorOverrides,
    ModulatorParams, ModulatorRegistry, ParamSpec,
};
pub use rf::{RxFrontEnd, RxFrontEndSpec, RxModel, TxFrontEnd, TxFrontEndSpec, TxModel};
pub use signal::{Bandwidth, ErrorTag, Signal, SignalMetadata};
pub use types::{AntennaSamples, BitStream, IQBuffer, IQSample};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{CsrdError, CsrdResult};
    pub use crate::message::{Message, MessageSource};
    pub use crate::modulate::{ModulationKind, Modulator, ModulatorParams, ModulatorRegistry};
    pub use crate::signal::{Bandwidth, Signal};
    pub use crate::types::IQSample;
}
