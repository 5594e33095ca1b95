//! Modulator registry
//!
//! Maps each modulation TypeID to a constructor. Scenario files refer to
//! modulations by TypeID, so the registry is the single place that turns a
//! string into a configured [`Modulator`].

use super::{
    fill_defaults, AnalogModulator, CpmModulator, LinearModulator, ModulationFamily,
    ModulationKind, Modulator, ModulatorConfig, ModulatorOverrides, ModulatorParams,
    OfdmModulator, OtfsModulator, ScFdmaModulator,
};
use crate::error::{CsrdError, CsrdResult};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

/// Builds a modulator from a resolved configuration
pub type ModulatorConstructor =
    fn(ModulationKind, &ModulatorParams, &ModulatorConfig) -> CsrdResult<Box<dyn Modulator>>;

#[derive(Clone)]
struct Entry {
    kind: ModulationKind,
    constructor: ModulatorConstructor,
}

/// TypeID → constructor table
#[derive(Clone, Default)]
pub struct ModulatorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl fmt::Debug for ModulatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModulatorRegistry")
            .field("type_ids", &self.type_ids())
            .finish()
    }
}

impl ModulatorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in modulation
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ModulationKind::ALL {
            let constructor: ModulatorConstructor = match kind.family() {
                ModulationFamily::Linear => LinearModulator::create,
                ModulationFamily::ContinuousPhase => CpmModulator::create,
                ModulationFamily::Ofdm => OfdmModulator::create,
                ModulationFamily::ScFdma => ScFdmaModulator::create,
                ModulationFamily::Otfs => OtfsModulator::create,
                ModulationFamily::Analog => AnalogModulator::create,
            };
            registry.register(kind, constructor);
        }
        registry
    }

    /// Register (or replace) the constructor for a kind
    pub fn register(&mut self, kind: ModulationKind, constructor: ModulatorConstructor) {
        self.entries
            .insert(kind.type_id().to_string(), Entry { kind, constructor });
    }

    /// Resolve a TypeID (case and separator insensitive)
    pub fn resolve(&self, type_id: &str) -> CsrdResult<ModulationKind> {
        ModulationKind::parse(type_id)
            .filter(|kind| self.entries.contains_key(kind.type_id()))
            .ok_or_else(|| CsrdError::unsupported("modulation", type_id))
    }

    /// Registered TypeIDs in sorted order
    pub fn type_ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from an already resolved configuration
    pub fn create(
        &self,
        type_id: &str,
        params: &ModulatorParams,
        config: &ModulatorConfig,
    ) -> CsrdResult<Box<dyn Modulator>> {
        let kind = self.resolve(type_id)?;
        let entry = self
            .entries
            .get(kind.type_id())
            .ok_or_else(|| CsrdError::unsupported("modulation", type_id))?;
        (entry.constructor)(entry.kind, params, config)
    }

    /// Fill defaults from `overrides` with `rng`, then build
    pub fn configure<R: Rng + ?Sized>(
        &self,
        type_id: &str,
        params: &ModulatorParams,
        overrides: &ModulatorOverrides,
        rng: &mut R,
    ) -> CsrdResult<Box<dyn Modulator>> {
        let kind = self.resolve(type_id)?;
        let config = fill_defaults(kind, params, overrides, rng)?;
        tracing::debug!(modulation = %kind, ?config, "configured modulator");
        self.create(type_id, params, &config)
    }
}
