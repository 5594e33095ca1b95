//! # CSRD Simulation
//!
//! Everything above a single signal-chain block: propagation channels, the
//! factories that create and cache blocks, the per-scenario engine, the
//! parallel runner and the dataset writer.
//!
//! ```text
//!  SimulationRunner ── rayon workers, contiguous scenario ranges
//!        │
//!        ▼
//!  ScenarioEngine ── frames in order ──► Frame { signal, annotations }
//!        │                                        │
//!        ├─ MessageFactory                        ▼
//!        ├─ ModulationFactory              DatasetWriter: <id>.cf32 + <id>.json
//!        ├─ TransmitFactory
//!        ├─ ChannelFactory
//!        └─ ReceiveFactory
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod factory;
pub mod output;
pub mod runner;
pub mod scenario;

pub use channel::{ActiveChannel, ChannelModel, ChannelSpec};
pub use config::{CsrdConfig, RunnerConfig};
pub use error::{SimError, SimResult};
pub use factory::{Catalogs, FailedStep, ParameterPolicy, Processed, SelectionPolicy};
pub use output::{AnnotationFile, DatasetWriter, FrameRecord};
pub use runner::{RunSummary, ScenarioFailure, ScenarioReport, SimulationRunner};
pub use scenario::{Frame, LinkAnnotation, ScenarioConfig, ScenarioEngine, ScenarioOutput, SegmentAnnotation};
