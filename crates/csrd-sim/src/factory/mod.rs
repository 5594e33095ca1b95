//! Block factories
//!
//! Every stage of the signal chain is reached through a factory that owns a
//! keyed cache of configured blocks:
//!
//! ```text
//!   request(entity, TypeID) ──► BlockKey ──► cached? ──yes──► step
//!                                               │
//!                                               no
//!                                               ▼
//!                           resolve handle ─► draw parameters ─► setup ─► insert
//! ```
//!
//! Parameters are drawn once, when the block is created. Later calls for the
//! same key reuse the block unchanged unless [`ParameterPolicy::RedrawPerCall`]
//! is selected. A failing processing step does not abort the caller: it is
//! returned as [`Processed::Failed`], carrying the unmodified input.

pub mod channel;
pub mod message;
pub mod modulation;
pub mod receive;
pub mod transmit;

pub use channel::{ChannelCatalog, ChannelFactory, ChannelRequest};
pub use message::{MessageCatalog, MessageEntry, MessageFactory};
pub use modulation::{ModulationCatalog, ModulationEntry, ModulationFactory, ModulationRequest};
pub use receive::{ReceiveCatalog, ReceiveFactory, ReceiveRequest};
pub use transmit::{TransmitCatalog, TransmitFactory, TransmitRequest};

use crate::error::{SimError, SimResult};
use csrd_core::{CsrdError, CsrdResult, ErrorTag, Signal};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Every factory catalog, as loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalogs {
    #[serde(default)]
    pub modulation: ModulationCatalog,
    #[serde(default)]
    pub message: MessageCatalog,
    #[serde(default)]
    pub transmit: TransmitCatalog,
    #[serde(default)]
    pub channel: ChannelCatalog,
    #[serde(default)]
    pub receive: ReceiveCatalog,
}

/// Which entity a cached block belongs to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRole {
    Segment { transmitter: String, segment: String },
    Transmitter(String),
    Link { transmitter: String, receiver: String },
    Receiver(String),
}

impl std::fmt::Display for EntityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRole::Segment { transmitter, segment } => write!(f, "{}/{}", transmitter, segment),
            EntityRole::Transmitter(id) => write!(f, "{}", id),
            EntityRole::Link { transmitter, receiver } => write!(f, "{}->{}", transmitter, receiver),
            EntityRole::Receiver(id) => write!(f, "{}", id),
        }
    }
}

/// Cache key: entity identity plus the block type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub role: EntityRole,
    pub type_id: String,
}

impl BlockKey {
    pub fn new(role: EntityRole, type_id: impl Into<String>) -> Self {
        Self {
            role,
            type_id: type_id.into(),
        }
    }

    pub fn segment(transmitter: &str, segment: &str, type_id: &str) -> Self {
        Self::new(
            EntityRole::Segment {
                transmitter: transmitter.to_string(),
                segment: segment.to_string(),
            },
            type_id,
        )
    }

    pub fn link(transmitter: &str, receiver: &str, type_id: &str) -> Self {
        Self::new(
            EntityRole::Link {
                transmitter: transmitter.to_string(),
                receiver: receiver.to_string(),
            },
            type_id,
        )
    }
}

/// Keyed store of configured blocks.
///
/// Each inserted block gets a fresh instance id, so callers can tell a
/// reused block from a rebuilt one.
#[derive(Debug)]
pub struct BlockCache<B> {
    entries: BTreeMap<BlockKey, (u64, B)>,
    next_id: u64,
}

impl<B> Default for BlockCache<B> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<B> BlockCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached block for `key`, building it with `create` on a miss
    pub fn get_or_try_insert_with<E, F>(&mut self, key: BlockKey, create: F) -> Result<(u64, &mut B), E>
    where
        F: FnOnce() -> Result<B, E>,
    {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                let (id, block) = entry.into_mut();
                Ok((*id, block))
            }
            Entry::Vacant(entry) => {
                let block = create()?;
                self.next_id += 1;
                let (id, block) = entry.insert((self.next_id, block));
                Ok((*id, block))
            }
        }
    }

    pub fn get_mut(&mut self, key: &BlockKey) -> Option<&mut B> {
        self.entries.get_mut(key).map(|(_, block)| block)
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut B> {
        self.entries.values_mut().map(|(_, block)| block)
    }

    pub fn instance_id(&self, key: &BlockKey) -> Option<u64> {
        self.entries.get(key).map(|(id, _)| *id)
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &BlockKey) -> Option<B> {
        self.entries.remove(key).map(|(_, block)| block)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empty the cache, handing back every block for release
    pub fn release_all(&mut self) -> Vec<B> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|(_, block)| block)
            .collect()
    }
}

/// Failed processing step: the input passed through untouched
#[derive(Debug, Clone, PartialEq)]
pub struct FailedStep {
    pub passthrough: Signal,
    pub stage: &'static str,
    pub error: CsrdError,
}

/// Outcome of a factory processing step
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    Completed(Signal),
    Failed(FailedStep),
}

impl Processed {
    /// Wrap a step result, echoing `input` on failure
    pub fn from_step(stage: &'static str, input: &Signal, result: CsrdResult<Signal>) -> Self {
        match result {
            Ok(signal) => Processed::Completed(signal),
            Err(error) => {
                tracing::warn!(stage, code = error.code(), %error, "processing step failed, passing input through");
                Processed::Failed(FailedStep {
                    passthrough: input.clone(),
                    stage,
                    error,
                })
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Processed::Failed(_))
    }

    pub fn error(&self) -> Option<&CsrdError> {
        match self {
            Processed::Completed(_) => None,
            Processed::Failed(step) => Some(&step.error),
        }
    }

    /// The output signal; a failure becomes the pass-through tagged with its error
    pub fn into_signal(self) -> Signal {
        match self {
            Processed::Completed(signal) => signal,
            Processed::Failed(step) => {
                let mut signal = step.passthrough;
                signal.error = Some(ErrorTag::new(step.stage, step.error.code(), step.error.to_string()));
                signal
            }
        }
    }
}

/// When cached blocks draw their random parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterPolicy {
    /// Draw once at creation; the block keeps its parameters for its lifetime
    #[default]
    FixedPerInstance,
    /// Rebuild the block, and redraw its parameters, on every call
    RedrawPerCall,
}

/// How a factory picks among its configured models
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    Uniform,
    /// Model name → relative weight; unlisted models are never picked
    Weighted { weights: BTreeMap<String, f64> },
}

impl SelectionPolicy {
    pub fn validate<'a>(&self, factory: &'static str, names: impl Iterator<Item = &'a String>) -> SimResult<()> {
        if let SelectionPolicy::Weighted { weights } = self {
            let names: Vec<&String> = names.collect();
            if let Some(unknown) = weights.keys().find(|w| !names.contains(w)) {
                return Err(SimError::factory(factory, format!("weight given for unknown model '{}'", unknown)));
            }
            if weights.values().any(|w| !w.is_finite() || *w < 0.0) || weights.values().sum::<f64>() <= 0.0 {
                return Err(SimError::factory(factory, "weights must be non-negative with a positive sum"));
            }
        }
        Ok(())
    }

    /// Pick one of `names` (which must be non-empty)
    pub fn select<'a, R: Rng + ?Sized>(
        &self,
        factory: &'static str,
        names: &[&'a str],
        rng: &mut R,
    ) -> SimResult<&'a str> {
        if names.is_empty() {
            return Err(SimError::factory(factory, "no models configured"));
        }
        let index = match self {
            SelectionPolicy::Uniform => rng.gen_range(0..names.len()),
            SelectionPolicy::Weighted { weights } => {
                let w: Vec<f64> = names
                    .iter()
                    .map(|n| weights.get(*n).copied().unwrap_or(0.0))
                    .collect();
                WeightedIndex::new(&w)
                    .map_err(|e| SimError::factory(factory, format!("bad weights: {}", e)))?
                    .sample(rng)
            }
        };
        Ok(names[index])
    }
}

/// Model picked for each entity, fixed once chosen
#[derive(Debug, Default)]
pub struct ModelAssignments {
    chosen: BTreeMap<EntityRole, String>,
}

impl ModelAssignments {
    /// The entity's model, choosing one with `policy` on first use.
    ///
    /// The choice depends only on `seed` and the entity, not on call order.
    pub fn assign(
        &mut self,
        factory: &'static str,
        role: &EntityRole,
        names: &[&str],
        policy: &SelectionPolicy,
        seed: u64,
    ) -> SimResult<String> {
        if let Some(name) = self.chosen.get(role) {
            return Ok(name.clone());
        }
        let mut rng = StdRng::seed_from_u64(derive_seed(seed, &["select", factory, &role.to_string()]));
        let name = policy.select(factory, names, &mut rng)?.to_string();
        tracing::debug!(factory, entity = %role, model = %name, "model selected");
        self.chosen.insert(role.clone(), name.clone());
        Ok(name)
    }

    /// Fix an entity's model by name instead of drawing one
    pub fn pin(&mut self, factory: &'static str, role: EntityRole, name: &str, names: &[&str]) -> SimResult<()> {
        if !names.contains(&name) {
            return Err(SimError::factory(factory, format!("unknown model '{}' for {}", name, role)));
        }
        self.chosen.insert(role, name.to_string());
        Ok(())
    }

    pub fn get(&self, role: &EntityRole) -> Option<&str> {
        self.chosen.get(role).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.chosen.clear();
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Deterministic child seed from a base seed and a label path
pub fn derive_seed(base: u64, labels: &[&str]) -> u64 {
    let mut hash = FNV_OFFSET;
    for label in labels {
        for byte in label.bytes().chain(std::iter::once(0xff)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    splitmix64(base ^ hash)
}

/// Channel noise seed for one (frame, transmitter, receiver) combination
pub fn frame_link_seed(base: u64, frame: usize, transmitter: &str, receiver: &str) -> u64 {
    derive_seed(base, &["link", &frame.to_string(), transmitter, receiver])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_reuses_instance() {
        let mut cache: BlockCache<u32> = BlockCache::new();
        let key = BlockKey::segment("tx0", "s0", "QAM");
        let (first, _) = cache.get_or_try_insert_with(key.clone(), || Ok::<_, ()>(7)).unwrap();
        let (second, block) = cache
            .get_or_try_insert_with(key.clone(), || Ok::<_, ()>(8))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(*block, 7);

        cache.remove(&key);
        let (third, _) = cache.get_or_try_insert_with(key, || Ok::<_, ()>(9)).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_cache_failed_create_leaves_no_entry() {
        let mut cache: BlockCache<u32> = BlockCache::new();
        let key = BlockKey::link("tx0", "rx0", "awgn");
        assert!(cache.get_or_try_insert_with(key.clone(), || Err("boom")).is_err());
        assert!(!cache.contains(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_release_all_empties_cache() {
        let mut cache: BlockCache<&str> = BlockCache::new();
        for tx in ["a", "b", "c"] {
            let _ = cache.get_or_try_insert_with(BlockKey::new(EntityRole::Transmitter(tx.into()), "ideal"), || {
                Ok::<_, ()>(tx)
            });
        }
        assert_eq!(cache.release_all().len(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_processed_failure_tags_passthrough() {
        let input = Signal::single(vec![csrd_core::IQSample::new(1.0, 0.0); 4], 1e6);
        let processed = Processed::from_step("channel", &input, Err(CsrdError::EmptyInput("x".into())));
        assert!(processed.is_failed());
        let signal = processed.into_signal();
        assert_eq!(signal.samples, input.samples);
        let tag = signal.error.unwrap();
        assert_eq!(tag.stage, "channel");
        assert_eq!(tag.code, "empty_input");
    }

    #[test]
    fn test_weighted_selection_skips_zero_weight() {
        let mut weights = BTreeMap::new();
        weights.insert("a".to_string(), 0.0);
        weights.insert("b".to_string(), 1.0);
        let policy = SelectionPolicy::Weighted { weights };
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..50 {
            assert_eq!(policy.select("transmit", &["a", "b"], &mut rng).unwrap(), "b");
        }
    }

    #[test]
    fn test_weighted_selection_rejects_unknown_model() {
        let mut weights = BTreeMap::new();
        weights.insert("ghost".to_string(), 1.0);
        let policy = SelectionPolicy::Weighted { weights };
        let names = vec!["ideal".to_string()];
        assert!(policy.validate("receive", names.iter()).is_err());
    }

    #[test]
    fn test_assignment_is_sticky() {
        let mut assignments = ModelAssignments::default();
        let role = EntityRole::Transmitter("tx0".into());
        let names = ["a", "b", "c", "d"];
        let first = assignments
            .assign("transmit", &role, &names, &SelectionPolicy::Uniform, 4)
            .unwrap();
        for seed in 0..10 {
            let again = assignments
                .assign("transmit", &role, &names, &SelectionPolicy::Uniform, seed)
                .unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(assignments.get(&role), Some(first.as_str()));
    }

    #[test]
    fn test_pinned_model_wins() {
        let mut assignments = ModelAssignments::default();
        let role = EntityRole::Receiver("rx0".into());
        let names = ["lna", "ideal"];
        assignments.pin("receive", role.clone(), "lna", &names).unwrap();
        let chosen = assignments
            .assign("receive", &role, &names, &SelectionPolicy::Uniform, 0)
            .unwrap();
        assert_eq!(chosen, "lna");
        assert!(assignments.pin("receive", role, "missing", &names).is_err());
    }

    #[test]
    fn test_seed_derivation_is_stable_and_distinct() {
        assert_eq!(frame_link_seed(1, 0, "tx", "rx"), frame_link_seed(1, 0, "tx", "rx"));
        assert_ne!(frame_link_seed(1, 0, "tx", "rx"), frame_link_seed(1, 1, "tx", "rx"));
        assert_ne!(frame_link_seed(1, 0, "tx", "rx"), frame_link_seed(2, 0, "tx", "rx"));
        // label boundaries matter
        assert_ne!(derive_seed(0, &["ab", "c"]), derive_seed(0, &["a", "bc"]));
    }
}
