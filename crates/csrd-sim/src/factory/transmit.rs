//! Transmit RF factory
//!
//! Each transmitter is assigned one impairment model for the whole scenario.
//! Impairment values are drawn once per transmitter, so every segment a
//! transmitter emits shares the same hardware; each segment still gets its
//! own front end because the frequency offset and output rate differ.

use super::{derive_seed, BlockCache, BlockKey, EntityRole, ModelAssignments, Processed, SelectionPolicy};
use crate::error::{SimError, SimResult};
use csrd_core::{Signal, TxFrontEnd, TxModel};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitCatalog {
    pub models: BTreeMap<String, TxModel>,
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Default for TransmitCatalog {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert("ideal".to_string(), TxModel::default());
        Self {
            models,
            selection: SelectionPolicy::Uniform,
        }
    }
}

impl TransmitCatalog {
    pub fn validate(&self) -> SimResult<()> {
        if self.models.is_empty() {
            return Err(SimError::factory("transmit", "no transmit models configured"));
        }
        for (name, model) in &self.models {
            model
                .validate()
                .map_err(|e| SimError::factory("transmit", format!("model '{}': {}", name, e)))?;
        }
        self.selection.validate("transmit", self.models.keys())
    }
}

/// One segment's pass through its transmitter's front end
#[derive(Debug, Clone, Copy)]
pub struct TransmitRequest<'a> {
    pub transmitter: &'a str,
    pub segment: &'a str,
    /// Output (composition) sample rate
    pub sample_rate: f64,
    pub frequency_offset: f64,
    pub power_dbm: f64,
}

#[derive(Debug)]
pub struct TransmitFactory {
    catalog: TransmitCatalog,
    seed: u64,
    assignments: ModelAssignments,
    blocks: BlockCache<TxFrontEnd>,
}

impl TransmitFactory {
    pub fn new(catalog: TransmitCatalog, seed: u64) -> SimResult<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            seed,
            assignments: ModelAssignments::default(),
            blocks: BlockCache::new(),
        })
    }

    /// Use `model` for `transmitter` instead of drawing one
    pub fn pin_model(&mut self, transmitter: &str, model: &str) -> SimResult<()> {
        let names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        self.assignments.pin("transmit", EntityRole::Transmitter(transmitter.to_string()), model, &names)
    }

    /// Impairment model name used by a transmitter
    pub fn model_for(&mut self, transmitter: &str) -> SimResult<String> {
        let names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        self.assignments.assign(
            "transmit",
            &EntityRole::Transmitter(transmitter.to_string()),
            &names,
            &self.catalog.selection,
            self.seed,
        )
    }

    pub fn process(&mut self, request: &TransmitRequest<'_>, input: &Signal) -> SimResult<Processed> {
        let model_name = self.model_for(request.transmitter)?;
        let model = self
            .catalog
            .models
            .get(&model_name)
            .ok_or_else(|| SimError::factory("transmit", format!("model '{}' vanished", model_name)))?;

        let key = BlockKey::segment(request.transmitter, request.segment, &model_name);
        let draw_seed = derive_seed(self.seed, &["transmit", request.transmitter, &model_name]);
        let noise_seed = derive_seed(self.seed, &["transmit", request.transmitter, request.segment]);
        let (_, front_end) = self.blocks.get_or_try_insert_with(key, || {
            let mut rng = StdRng::seed_from_u64(draw_seed);
            let spec = model.draw(
                request.sample_rate,
                request.frequency_offset,
                request.power_dbm,
                noise_seed,
                &mut rng,
            )?;
            tracing::debug!(
                transmitter = request.transmitter,
                segment = request.segment,
                model = %model_name,
                "transmit front end created"
            );
            Ok::<_, SimError>(spec.setup()?)
        })?;

        let result = front_end.process(input).map(|mut signal| {
            signal.set_metadata("tx_model", serde_json::json!(model_name));
            signal
        });
        Ok(Processed::from_step("transmit", input, result))
    }

    /// Return every cached front end to its initial random state
    pub fn reset(&mut self) {
        for front_end in self.blocks.blocks_mut() {
            front_end.reset();
        }
    }

    pub fn release(&mut self) {
        let released = self
            .blocks
            .release_all()
            .into_iter()
            .map(TxFrontEnd::release)
            .count();
        self.assignments.clear();
        tracing::debug!(released, "transmit front ends released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrd_core::IQSample;

    fn tone() -> Signal {
        let samples = (0..2000).map(|i| IQSample::from_polar(1.0, 0.01 * i as f64)).collect();
        Signal::single(samples, 1e6)
    }

    fn request<'a>(segment: &'a str) -> TransmitRequest<'a> {
        TransmitRequest {
            transmitter: "tx0",
            segment,
            sample_rate: 1e6,
            frequency_offset: 100e3,
            power_dbm: 30.0,
        }
    }

    #[test]
    fn test_ideal_model_sets_power_and_carrier() {
        let mut factory = TransmitFactory::new(TransmitCatalog::default(), 1).unwrap();
        let out = factory.process(&request("s0"), &tone()).unwrap().into_signal();
        assert!(!out.is_failed());
        assert!((out.mean_power() - 1.0).abs() < 1e-6);
        assert!((out.carrier_frequency - 100e3).abs() < 1e-9);
        assert_eq!(out.metadata["tx_model"], serde_json::json!("ideal"));
    }

    #[test]
    fn test_one_model_per_transmitter() {
        let mut catalog = TransmitCatalog::default();
        for name in ["a", "b", "c"] {
            catalog.models.insert(name.to_string(), TxModel::default());
        }
        let mut factory = TransmitFactory::new(catalog, 99).unwrap();
        let chosen = factory.model_for("tx0").unwrap();
        let _ = factory.process(&request("s0"), &tone()).unwrap();
        let _ = factory.process(&request("s1"), &tone()).unwrap();
        assert_eq!(factory.model_for("tx0").unwrap(), chosen);
    }

    #[test]
    fn test_failed_step_passes_input_through() {
        let mut factory = TransmitFactory::new(TransmitCatalog::default(), 1).unwrap();
        let mut bad = tone();
        bad.samples[0].clear();
        bad.samples.push(vec![IQSample::new(1.0, 0.0); 3]);
        let processed = factory.process(&request("s0"), &bad).unwrap();
        assert!(processed.is_failed());
        assert_eq!(processed.into_signal().error.unwrap().stage, "transmit");
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let catalog = TransmitCatalog {
            models: BTreeMap::new(),
            selection: SelectionPolicy::Uniform,
        };
        assert!(TransmitFactory::new(catalog, 0).is_err());
    }
}
