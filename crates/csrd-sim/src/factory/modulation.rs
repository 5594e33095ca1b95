//! Modulation factory
//!
//! Resolves a segment's TypeID against the catalog, merges catalog defaults
//! with the segment's own overrides, and keeps one configured modulator per
//! `(transmitter, segment, TypeID)`.
//!
//! | Failure | Result |
//! |---------|--------|
//! | unknown TypeID, bad handle, invalid parameters | `Err` (configuration) |
//! | `modulate` rejects the message | `Ok(Processed::Failed)` with an empty pass-through |

use super::{derive_seed, BlockCache, BlockKey, ParameterPolicy, Processed};
use crate::error::{SimError, SimResult};
use csrd_core::{
    Bandwidth, CsrdError, Message, ModulationKind, Modulator, ModulatorConfig, ModulatorOverrides,
    ModulatorParams, ModulatorRegistry, Signal,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Catalog entry: implementation handle plus default parameter ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModulationEntry {
    pub handle: String,
    #[serde(default)]
    pub overrides: ModulatorOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulationCatalog {
    pub types: BTreeMap<String, ModulationEntry>,
    #[serde(default)]
    pub policy: ParameterPolicy,
}

impl Default for ModulationCatalog {
    fn default() -> Self {
        let types = ModulationKind::ALL
            .iter()
            .map(|kind| {
                (
                    kind.type_id().to_string(),
                    ModulationEntry {
                        handle: kind.type_id().to_string(),
                        overrides: ModulatorOverrides::default(),
                    },
                )
            })
            .collect();
        Self {
            types,
            policy: ParameterPolicy::default(),
        }
    }
}

impl ModulationCatalog {
    /// Check every handle against the registry and every override range
    pub fn validate(&self, registry: &ModulatorRegistry) -> SimResult<()> {
        for (type_id, entry) in &self.types {
            registry.resolve(&entry.handle).map_err(|_| {
                SimError::factory(
                    "modulation",
                    format!("type '{}' has unknown handle '{}'", type_id, entry.handle),
                )
            })?;
            entry.overrides.validate()?;
        }
        Ok(())
    }

    /// Catalog entry for a TypeID, matching names the way the registry does
    pub fn entry(&self, type_id: &str) -> SimResult<(&str, &ModulationEntry)> {
        if let Some((name, entry)) = self.types.get_key_value(type_id) {
            return Ok((name.as_str(), entry));
        }
        let wanted = ModulationKind::parse(type_id);
        self.types
            .iter()
            .find(|(name, _)| wanted.is_some() && ModulationKind::parse(name) == wanted)
            .map(|(name, entry)| (name.as_str(), entry))
            .ok_or_else(|| SimError::factory("modulation", format!("modulation '{}' is not in the catalog", type_id)))
    }
}

/// One segment's modulation call
#[derive(Debug, Clone)]
pub struct ModulationRequest<'a> {
    pub transmitter: &'a str,
    pub segment: &'a str,
    pub type_id: &'a str,
    pub params: ModulatorParams,
    /// Segment-level overrides, applied over the catalog entry
    pub overrides: Option<&'a ModulatorOverrides>,
    /// Placement bandwidth that replaces the modulator's own report
    pub target_bandwidth: Option<f64>,
}

impl<'a> ModulationRequest<'a> {
    pub fn new(transmitter: &'a str, segment: &'a str, type_id: &'a str, params: ModulatorParams) -> Self {
        Self {
            transmitter,
            segment,
            type_id,
            params,
            overrides: None,
            target_bandwidth: None,
        }
    }

    pub fn with_overrides(mut self, overrides: &'a ModulatorOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_target_bandwidth(mut self, bandwidth: f64) -> Self {
        self.target_bandwidth = Some(bandwidth);
        self
    }

    fn key(&self) -> BlockKey {
        BlockKey::segment(self.transmitter, self.segment, self.type_id)
    }
}

#[derive(Debug)]
pub struct ModulationFactory {
    registry: ModulatorRegistry,
    catalog: ModulationCatalog,
    seed: u64,
    draws: u64,
    blocks: BlockCache<Box<dyn Modulator>>,
}

impl ModulationFactory {
    pub fn new(registry: ModulatorRegistry, catalog: ModulationCatalog, seed: u64) -> SimResult<Self> {
        catalog.validate(&registry)?;
        Ok(Self {
            registry,
            catalog,
            seed,
            draws: 0,
            blocks: BlockCache::new(),
        })
    }

    pub fn catalog(&self) -> &ModulationCatalog {
        &self.catalog
    }

    fn block(&mut self, request: &ModulationRequest<'_>) -> SimResult<(u64, &mut Box<dyn Modulator>)> {
        let (_, entry) = self.catalog.entry(request.type_id)?;
        let handle = entry.handle.clone();
        let overrides = match request.overrides {
            Some(segment) => entry.overrides.merged_with(segment),
            None => entry.overrides.clone(),
        };

        let key = request.key();
        let mut labels = vec![
            "modulation".to_string(),
            request.transmitter.to_string(),
            request.segment.to_string(),
            request.type_id.to_string(),
        ];
        if self.catalog.policy == ParameterPolicy::RedrawPerCall {
            labels.push(self.draws.to_string());
        }
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let seed = derive_seed(self.seed, &label_refs);

        let registry = &self.registry;
        let params = request.params;
        self.blocks.get_or_try_insert_with(key, || {
            let mut rng = StdRng::seed_from_u64(seed);
            let modulator = registry.configure(&handle, &params, &overrides, &mut rng)?;
            tracing::debug!(
                transmitter = request.transmitter,
                segment = request.segment,
                modulation = request.type_id,
                "modulator created"
            );
            Ok::<_, SimError>(modulator)
        })
    }

    /// Start a new draw for the segment under `RedrawPerCall`: the next call
    /// builds a fresh modulator, and every call after it shares that one
    /// until the next redraw. No-op under `FixedPerInstance`.
    pub fn redraw(&mut self, request: &ModulationRequest<'_>) {
        if self.catalog.policy == ParameterPolicy::RedrawPerCall {
            self.blocks.remove(&request.key());
            self.draws += 1;
        }
    }

    /// Message elements the segment's modulator needs for `num_symbols` symbols
    pub fn message_length(&mut self, request: &ModulationRequest<'_>, num_symbols: usize) -> SimResult<usize> {
        let (_, modulator) = self.block(request)?;
        Ok(modulator.message_length_for(num_symbols))
    }

    /// Symbol rate of the segment's modulator
    pub fn symbol_rate(&mut self, request: &ModulationRequest<'_>) -> SimResult<f64> {
        let (_, modulator) = self.block(request)?;
        Ok(modulator.symbol_rate())
    }

    /// Modulate one message for a segment
    pub fn modulate(&mut self, request: &ModulationRequest<'_>, message: &Message) -> SimResult<Processed> {
        let target_bandwidth = request.target_bandwidth;
        let (instance, modulator) = self.block(request)?;
        let params = *modulator.params();
        let kind = modulator.kind();
        let passthrough = Signal::new(vec![Vec::new(); params.num_tx_antennas], params.sample_rate)
            .with_modulation(kind.type_id());

        let result = modulator.modulate(message).and_then(|modulated| {
            let mut signal = modulated.into_signal(params.sample_rate, kind);
            signal.expect_antennas(params.num_tx_antennas)?;
            if let Some(bw) = target_bandwidth {
                if !(bw.is_finite() && bw > 0.0) {
                    return Err(CsrdError::invalid_field("target_bandwidth", "must be positive"));
                }
                signal.bandwidth = Some(Bandwidth::Scalar(bw));
            }
            signal.ensure_bandwidth(Some(modulator.symbol_rate()));
            signal.set_metadata("modulator", serde_json::to_value(modulator.config()).unwrap_or_default());
            signal.set_metadata("modulator_instance", serde_json::json!(instance));
            Ok(signal)
        });
        Ok(Processed::from_step("modulation", &passthrough, result))
    }

    pub fn instance_id(&self, transmitter: &str, segment: &str, type_id: &str) -> Option<u64> {
        self.blocks.instance_id(&BlockKey::segment(transmitter, segment, type_id))
    }

    /// Resolved configuration of a cached modulator
    pub fn config_of(&mut self, transmitter: &str, segment: &str, type_id: &str) -> Option<ModulatorConfig> {
        self.blocks
            .get_mut(&BlockKey::segment(transmitter, segment, type_id))
            .map(|m| m.config())
    }

    pub fn cached(&self) -> usize {
        self.blocks.len()
    }

    pub fn release(&mut self) {
        let released = self.blocks.release_all().len();
        tracing::debug!(released, "modulators released");
    }
}
