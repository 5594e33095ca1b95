//! Scenario definition and per-frame generation

pub mod config;
pub mod engine;

pub use config::{MessageConfig, Placement, ReceiverConfig, ScenarioConfig, SegmentConfig, TransmitterConfig};
pub use engine::{Frame, LinkAnnotation, ScenarioEngine, ScenarioOutput, SegmentAnnotation};
