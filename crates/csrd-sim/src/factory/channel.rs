//! Channel factory
//!
//! One channel per transmitter/receiver link. The link keeps its model and
//! its fading state across frames; each frame only reseeds the additive
//! noise, from `(seed, frame, transmitter, receiver)`. A change in sample
//! rate or antenna counts releases the old channel and builds a new one.

use super::{derive_seed, frame_link_seed, BlockCache, BlockKey, EntityRole, ModelAssignments, Processed, SelectionPolicy};
use crate::channel::{ActiveChannel, AwgnConfig, ChannelModel, ChannelSpec};
use crate::error::{SimError, SimResult};
use csrd_core::Signal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCatalog {
    pub models: BTreeMap<String, ChannelModel>,
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Default for ChannelCatalog {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert("awgn".to_string(), ChannelModel::Awgn(AwgnConfig { snr_db: 20.0 }));
        Self {
            models,
            selection: SelectionPolicy::Uniform,
        }
    }
}

impl ChannelCatalog {
    pub fn validate(&self) -> SimResult<()> {
        if self.models.is_empty() {
            return Err(SimError::factory("channel", "no channel models configured"));
        }
        // Rate-dependent checks run again at setup
        for (name, model) in &self.models {
            model
                .validate(f64::INFINITY)
                .map_err(|e| SimError::factory("channel", format!("model '{}': {}", name, e)))?;
        }
        self.selection.validate("channel", self.models.keys())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelRequest<'a> {
    pub transmitter: &'a str,
    pub receiver: &'a str,
    pub frame: usize,
    pub num_rx_antennas: usize,
}

#[derive(Debug)]
pub struct ChannelFactory {
    catalog: ChannelCatalog,
    seed: u64,
    assignments: ModelAssignments,
    blocks: BlockCache<ActiveChannel>,
}

impl ChannelFactory {
    pub fn new(catalog: ChannelCatalog, seed: u64) -> SimResult<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            seed,
            assignments: ModelAssignments::default(),
            blocks: BlockCache::new(),
        })
    }

    /// Use `model` for a link instead of drawing one
    pub fn pin_model(&mut self, transmitter: &str, receiver: &str, model: &str) -> SimResult<()> {
        let names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        let role = EntityRole::Link {
            transmitter: transmitter.to_string(),
            receiver: receiver.to_string(),
        };
        self.assignments.pin("channel", role, model, &names)
    }

    pub fn model_for(&mut self, transmitter: &str, receiver: &str) -> SimResult<String> {
        let names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        self.assignments.assign(
            "channel",
            &EntityRole::Link {
                transmitter: transmitter.to_string(),
                receiver: receiver.to_string(),
            },
            &names,
            &self.catalog.selection,
            self.seed,
        )
    }

    pub fn instance_id(&self, transmitter: &str, receiver: &str, model: &str) -> Option<u64> {
        self.blocks.instance_id(&BlockKey::link(transmitter, receiver, model))
    }

    pub fn process(&mut self, request: &ChannelRequest<'_>, input: &Signal) -> SimResult<Processed> {
        let model_name = self.model_for(request.transmitter, request.receiver)?;
        let model = self
            .catalog
            .models
            .get(&model_name)
            .ok_or_else(|| SimError::factory("channel", format!("model '{}' vanished", model_name)))?;
        let key = BlockKey::link(request.transmitter, request.receiver, &model_name);

        let (rate, num_tx, num_rx) = (input.sample_rate, input.num_antennas(), request.num_rx_antennas);
        let stale = matches!(self.blocks.get_mut(&key), Some(ch) if !ch.accepts(rate, num_tx, num_rx));
        if stale {
            if let Some(old) = self.blocks.remove(&key) {
                let spec = old.release();
                tracing::debug!(
                    link = %key.role,
                    old_rate = spec.sample_rate,
                    new_rate = rate,
                    "channel shape changed, rebuilding"
                );
            }
        }

        let setup_seed = derive_seed(self.seed, &["channel", request.transmitter, request.receiver, &model_name]);
        let (_, channel) = self.blocks.get_or_try_insert_with(key, || {
            let spec = ChannelSpec::new(model.clone(), rate)
                .with_antennas(num_tx, num_rx)
                .with_seed(setup_seed);
            Ok::<_, SimError>(spec.setup()?)
        })?;

        channel.set_seed(frame_link_seed(self.seed, request.frame, request.transmitter, request.receiver));
        let result = channel.step(input).map(|mut signal| {
            signal.set_metadata("channel_model", serde_json::json!(model_name));
            signal
        });
        Ok(Processed::from_step("channel", input, result))
    }

    pub fn reset(&mut self) {
        for channel in self.blocks.blocks_mut() {
            channel.reset();
        }
    }

    pub fn release(&mut self) {
        let released = self
            .blocks
            .release_all()
            .into_iter()
            .map(ActiveChannel::release)
            .count();
        self.assignments.clear();
        tracing::debug!(released, "channels released");
    }
}
