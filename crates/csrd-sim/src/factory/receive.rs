//! Receive RF factory: one front end per receiver, model chosen per receiver

use super::{derive_seed, BlockCache, BlockKey, EntityRole, ModelAssignments, Processed, SelectionPolicy};
use crate::error::{SimError, SimResult};
use csrd_core::{RxFrontEnd, RxModel, Signal};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveCatalog {
    pub models: BTreeMap<String, RxModel>,
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Default for ReceiveCatalog {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert("ideal".to_string(), RxModel::default());
        Self {
            models,
            selection: SelectionPolicy::Uniform,
        }
    }
}

impl ReceiveCatalog {
    pub fn validate(&self) -> SimResult<()> {
        if self.models.is_empty() {
            return Err(SimError::factory("receive", "no receive models configured"));
        }
        for (name, model) in &self.models {
            model
                .validate()
                .map_err(|e| SimError::factory("receive", format!("model '{}': {}", name, e)))?;
        }
        self.selection.validate("receive", self.models.keys())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiveRequest<'a> {
    pub receiver: &'a str,
    pub sample_rate: f64,
    pub tuning_offset: f64,
}

#[derive(Debug)]
pub struct ReceiveFactory {
    catalog: ReceiveCatalog,
    seed: u64,
    assignments: ModelAssignments,
    blocks: BlockCache<RxFrontEnd>,
}

impl ReceiveFactory {
    pub fn new(catalog: ReceiveCatalog, seed: u64) -> SimResult<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            seed,
            assignments: ModelAssignments::default(),
            blocks: BlockCache::new(),
        })
    }

    /// Use `model` for `receiver` instead of drawing one
    pub fn pin_model(&mut self, receiver: &str, model: &str) -> SimResult<()> {
        let names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        self.assignments.pin("receive", EntityRole::Receiver(receiver.to_string()), model, &names)
    }

    pub fn model_for(&mut self, receiver: &str) -> SimResult<String> {
        let names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        self.assignments.assign(
            "receive",
            &EntityRole::Receiver(receiver.to_string()),
            &names,
            &self.catalog.selection,
            self.seed,
        )
    }

    pub fn process(&mut self, request: &ReceiveRequest<'_>, input: &Signal) -> SimResult<Processed> {
        let model_name = self.model_for(request.receiver)?;
        let model = self
            .catalog
            .models
            .get(&model_name)
            .ok_or_else(|| SimError::factory("receive", format!("model '{}' vanished", model_name)))?;

        let key = BlockKey::new(EntityRole::Receiver(request.receiver.to_string()), model_name.as_str());
        let seed = derive_seed(self.seed, &["receive", request.receiver, &model_name]);
        let (_, front_end) = self.blocks.get_or_try_insert_with(key, || {
            let mut rng = StdRng::seed_from_u64(seed);
            let spec = model.draw(request.sample_rate, request.tuning_offset, seed, &mut rng)?;
            tracing::debug!(receiver = request.receiver, model = %model_name, "receive front end created");
            Ok::<_, SimError>(spec.setup()?)
        })?;

        let result = front_end.process(input).map(|mut signal| {
            signal.set_metadata("rx_model", serde_json::json!(model_name));
            signal
        });
        Ok(Processed::from_step("receive", input, result))
    }

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
            .map(RxFrontEnd::release)
            .count();
        self.assignments.clear();
        tracing::debug!(released, "receive front ends released");
    }
}
