//! Message factory: one seeded source per transmitter segment

use super::{derive_seed, BlockCache, BlockKey};
use crate::error::{SimError, SimResult};
use csrd_core::message::create_source;
use csrd_core::{Message, MessageKind, MessageSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageEntry {
    /// Source implementation name, e.g. `RandomBit`
    pub handle: String,
}

/// TypeID → message source handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCatalog {
    pub types: BTreeMap<String, MessageEntry>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let types = [MessageKind::RandomBit, MessageKind::Audio]
            .into_iter()
            .map(|kind| {
                (
                    kind.type_id().to_string(),
                    MessageEntry {
                        handle: kind.type_id().to_string(),
                    },
                )
            })
            .collect();
        Self { types }
    }
}

impl MessageCatalog {
    /// Resolve every handle, failing on the first unknown one
    pub fn validate(&self) -> SimResult<()> {
        for (type_id, entry) in &self.types {
            self.resolve_entry(type_id, entry)?;
        }
        Ok(())
    }

    pub fn resolve(&self, type_id: &str) -> SimResult<MessageKind> {
        let entry = self
            .types
            .get(type_id)
            .ok_or_else(|| SimError::factory("message", format!("unknown message type '{}'", type_id)))?;
        self.resolve_entry(type_id, entry)
    }

    fn resolve_entry(&self, type_id: &str, entry: &MessageEntry) -> SimResult<MessageKind> {
        MessageKind::parse(&entry.handle).ok_or_else(|| {
            SimError::factory(
                "message",
                format!("type '{}' has unknown handle '{}'", type_id, entry.handle),
            )
        })
    }
}

#[derive(Debug)]
pub struct MessageFactory {
    catalog: MessageCatalog,
    seed: u64,
    sources: BlockCache<Box<dyn MessageSource>>,
}

impl MessageFactory {
    pub fn new(catalog: MessageCatalog, seed: u64) -> SimResult<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            seed,
            sources: BlockCache::new(),
        })
    }

    /// Next message for a segment. Consecutive calls continue the source's stream.
    pub fn generate(
        &mut self,
        transmitter: &str,
        segment: &str,
        type_id: &str,
        length: usize,
        symbol_rate: f64,
    ) -> SimResult<Message> {
        let kind = self.catalog.resolve(type_id)?;
        let key = BlockKey::segment(transmitter, segment, type_id);
        let seed = derive_seed(self.seed, &["message", transmitter, segment, type_id]);
        let (_, source) = self
            .sources
            .get_or_try_insert_with(key, || Ok::<_, SimError>(create_source(kind, seed)))?;
        Ok(source.generate(length, symbol_rate)?)
    }

    /// Rewind every cached source to its seed
    pub fn reset(&mut self) {
        for source in self.sources.blocks_mut() {
            source.reset();
        }
    }

    pub fn release(&mut self) {
        let released = self.sources.release_all().len();
        tracing::debug!(released, "message sources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrd_core::MessagePayload;

    #[test]
    fn test_default_catalog_resolves() {
        let catalog = MessageCatalog::default();
        assert_eq!(catalog.resolve("RandomBit").unwrap(), MessageKind::RandomBit);
        assert!(catalog.resolve("Speech").is_err());
    }

    #[test]
    fn test_bad_handle_rejected_at_construction() {
        let mut catalog = MessageCatalog::default();
        catalog.types.insert(
            "Voice".into(),
            MessageEntry {
                handle: "Vocoder".into(),
            },
        );
        assert!(MessageFactory::new(catalog, 0).is_err());
    }

    #[test]
    fn test_segments_get_independent_streams() {
        let mut factory = MessageFactory::new(MessageCatalog::default(), 5).unwrap();
        let a = factory.generate("tx0", "s0", "RandomBit", 256, 1e3).unwrap();
        let b = factory.generate("tx0", "s1", "RandomBit", 256, 1e3).unwrap();
        assert_ne!(a.payload, b.payload);
        let MessagePayload::Bits(bits) = &a.payload else {
            panic!("expected bits");
        };
        assert_eq!(bits.len(), 256);

        factory.reset();
        let again = factory.generate("tx0", "s0", "RandomBit", 256, 1e3).unwrap();
        assert_eq!(again.payload, a.payload);
    }
}
