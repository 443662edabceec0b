//! Item, on-chain item and seed lifecycle indexer.

use std::sync::Arc;

use async_trait::async_trait;

use bridgeindex_bus::BatchHandler;
use bridgeindex_core::message::{decode_batch, Envelope, ItemMessage};
use bridgeindex_core::IndexerError;
use bridgeindex_cosmos::CoreQuery;
use bridgeindex_storage::{Item, ItemChainMapping, Seed, Storage};

enum Change {
    Upsert(Item, Vec<ItemChainMapping>),
    Remove(String),
    UpsertMapping(ItemChainMapping),
    RemoveMapping { item_index: String, chain: String },
    UpsertSeed(Seed),
    RemoveSeed(String),
}

pub struct ItemIndexer {
    query: Arc<dyn CoreQuery>,
    storage: Arc<dyn Storage>,
}

impl ItemIndexer {
    pub fn new(query: Arc<dyn CoreQuery>, storage: Arc<dyn Storage>) -> Self {
        Self { query, storage }
    }

    async fn plan(&self, msg: ItemMessage) -> Result<Option<Change>, IndexerError> {
        let change = match msg {
            ItemMessage::ItemCreated(r) => {
                let Some(item) = self.query.item(&r.index).await? else {
                    tracing::warn!(handler = self.name(), item = %r.index, "Item not found, skipping");
                    return Ok(None);
                };
                let mappings = item
                    .on_chain
                    .iter()
                    .map(|t| ItemChainMapping {
                        item_index: item.index.clone(),
                        chain: t.chain.clone(),
                        address: t.address.clone(),
                        token_id: t.token_id.clone(),
                    })
                    .collect();
                Change::Upsert(
                    Item {
                        index: item.index,
                        collection_index: item.collection_index,
                        metadata_uri: item.metadata_uri,
                    },
                    mappings,
                )
            }
            ItemMessage::ItemRemoved(r) => Change::Remove(r.index),
            ItemMessage::ItemOnChainCreated(r) => {
                let token = self
                    .query
                    .item(&r.item_index)
                    .await?
                    .and_then(|item| item.on_chain.into_iter().find(|t| t.chain == r.chain));
                let Some(token) = token else {
                    tracing::warn!(
                        handler = self.name(),
                        item = %r.item_index,
                        chain = %r.chain,
                        "On-chain item not found, skipping"
                    );
                    return Ok(None);
                };
                Change::UpsertMapping(ItemChainMapping {
                    item_index: r.item_index,
                    chain: token.chain,
                    address: token.address,
                    token_id: token.token_id,
                })
            }
            ItemMessage::ItemOnChainRemoved(r) => Change::RemoveMapping {
                item_index: r.item_index,
                chain: r.chain,
            },
            ItemMessage::SeedCreated(r) => {
                let Some(seed) = self.query.seed(&r.seed).await? else {
                    tracing::warn!(handler = self.name(), seed = %r.seed, "Seed not found, skipping");
                    return Ok(None);
                };
                Change::UpsertSeed(Seed {
                    seed: seed.seed,
                    item_index: seed.item_index,
                })
            }
            ItemMessage::SeedRemoved(r) => Change::RemoveSeed(r.seed),
        };
        Ok(Some(change))
    }
}

#[async_trait]
impl BatchHandler for ItemIndexer {
    fn name(&self) -> &str {
        "items"
    }

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError> {
        let mut changes = Vec::new();
        for msg in decode_batch::<ItemMessage>(self.name(), batch) {
            changes.extend(self.plan(msg).await?);
        }
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.storage.begin().await?;
        for change in &changes {
            match change {
                Change::Upsert(item, mappings) => {
                    tx.upsert_item(item).await?;
                    for m in mappings {
                        tx.upsert_item_mapping(m).await?;
                    }
                }
                Change::Remove(index) => {
                    tx.delete_item(index).await?;
                }
                Change::UpsertMapping(m) => {
                    if !tx.item_exists(&m.item_index).await? {
                        tracing::warn!(handler = self.name(), item = %m.item_index, chain = %m.chain, "Mapping for unknown item, skipping");
                        continue;
                    }
                    tx.upsert_item_mapping(m).await?;
                }
                Change::RemoveMapping { item_index, chain } => {
                    tx.delete_item_mapping(item_index, chain).await?;
                }
                Change::UpsertSeed(s) => {
                    if !tx.item_exists(&s.item_index).await? {
                        tracing::warn!(handler = self.name(), item = %s.item_index, seed = %s.seed, "Seed for unknown item, skipping");
                        continue;
                    }
                    tx.upsert_seed(s).await?;
                }
                Change::RemoveSeed(seed) => {
                    tx.delete_seed(seed).await?;
                }
            }
        }
        tx.commit().await?;

        tracing::info!(handler = self.name(), count = changes.len(), "Item changes applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelopes, tx, MockCore};
    use bridgeindex_core::message::{ItemRef, OnChainItemRef, SeedRef};
    use bridgeindex_cosmos::{CoreItem, CoreSeed, OnChainRef};
    use bridgeindex_storage::InMemoryStorage;

    fn token(chain: &str, address: &str, id: &str) -> OnChainRef {
        OnChainRef {
            chain: chain.into(),
            address: address.into(),
            token_id: id.into(),
        }
    }

    fn setup() -> (Arc<MockCore>, InMemoryStorage, ItemIndexer) {
        let core = Arc::new(MockCore::default());
        core.items.lock().unwrap().insert(
            "i1".into(),
            CoreItem {
                index: "i1".into(),
                collection_index: "c1".into(),
                metadata_uri: "ipfs://i1".into(),
                on_chain: vec![token("Goerli", "0x1", "7")],
            },
        );
        core.seeds.lock().unwrap().insert(
            "s1".into(),
            CoreSeed {
                seed: "s1".into(),
                item_index: "i1".into(),
            },
        );
        let storage = InMemoryStorage::new();
        let indexer = ItemIndexer::new(core.clone(), Arc::new(storage.clone()));
        (core, storage, indexer)
    }

    fn item_ref(index: &str) -> ItemRef {
        ItemRef {
            index: index.into(),
            tx: tx("T", 1),
        }
    }

    #[tokio::test]
    async fn item_with_mappings_and_seed() {
        let (_core, storage, indexer) = setup();
        indexer
            .handle(&envelopes(&[
                ItemMessage::ItemCreated(item_ref("i1")),
                ItemMessage::SeedCreated(SeedRef {
                    seed: "s1".into(),
                    item_index: "i1".into(),
                    tx: tx("T", 2),
                }),
            ]))
            .await
            .unwrap();

        assert_eq!(storage.item_by_index("i1").await.unwrap().unwrap().collection_index, "c1");
        let mapping = storage.item_mapping("i1", "Goerli").await.unwrap().unwrap();
        assert_eq!(mapping.token_id, "7");
        assert_eq!(storage.seed("s1").await.unwrap().unwrap().item_index, "i1");
    }

    #[tokio::test]
    async fn mapping_for_absent_item_is_skipped() {
        let (core, storage, indexer) = setup();
        core.items.lock().unwrap().get_mut("i1").unwrap().on_chain.push(token("Solana", "mint", ""));

        indexer
            .handle(&envelopes(&[ItemMessage::ItemOnChainCreated(OnChainItemRef {
                item_index: "i1".into(),
                chain: "Solana".into(),
                tx: tx("T", 3),
            })]))
            .await
            .unwrap();

        assert!(storage.item_mapping("i1", "Solana").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_an_item_removes_its_mappings_and_seeds() {
        let (_core, storage, indexer) = setup();
        let create = envelopes(&[
            ItemMessage::ItemCreated(item_ref("i1")),
            ItemMessage::SeedCreated(SeedRef {
                seed: "s1".into(),
                item_index: "i1".into(),
                tx: tx("T", 2),
            }),
        ]);
        indexer.handle(&create).await.unwrap();
        indexer
            .handle(&envelopes(&[ItemMessage::ItemRemoved(item_ref("i1"))]))
            .await
            .unwrap();

        assert!(storage.item_by_index("i1").await.unwrap().is_none());
        assert!(storage.item_mappings("i1").await.is_empty());
        assert!(storage.seed("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn on_chain_removal() {
        let (_core, storage, indexer) = setup();
        indexer
            .handle(&envelopes(&[ItemMessage::ItemCreated(item_ref("i1"))]))
            .await
            .unwrap();
        indexer
            .handle(&envelopes(&[ItemMessage::ItemOnChainRemoved(OnChainItemRef {
                item_index: "i1".into(),
                chain: "Goerli".into(),
                tx: tx("T", 4),
            })]))
            .await
            .unwrap();
        assert!(storage.item_mapping("i1", "Goerli").await.unwrap().is_none());
        assert!(storage.item_by_index("i1").await.unwrap().is_some());
    }
}
