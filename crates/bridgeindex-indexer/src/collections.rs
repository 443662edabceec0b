//! Collection lifecycle indexer.
//!
//! Authoritative state is fetched from the core chain first; the storage
//! transaction is opened only afterwards so no lock spans network calls.

use std::sync::Arc;

use async_trait::async_trait;

use bridgeindex_bus::BatchHandler;
use bridgeindex_core::message::{decode_batch, CollectionMessage, Envelope};
use bridgeindex_core::IndexerError;
use bridgeindex_cosmos::CoreQuery;
use bridgeindex_storage::{Collection, CollectionData, Storage};

enum Change {
    Upsert(Collection),
    Remove(String),
    UpsertData(CollectionData),
    RemoveData { chain: String, address: String },
}

pub struct CollectionIndexer {
    query: Arc<dyn CoreQuery>,
    storage: Arc<dyn Storage>,
}

impl CollectionIndexer {
    pub fn new(query: Arc<dyn CoreQuery>, storage: Arc<dyn Storage>) -> Self {
        Self { query, storage }
    }

    async fn plan(&self, msg: CollectionMessage) -> Result<Option<Change>, IndexerError> {
        let change = match msg {
            CollectionMessage::CollectionCreated(r) => {
                let Some(c) = self.query.collection(&r.index).await? else {
                    tracing::warn!(handler = self.name(), collection = %r.index, "Collection not found, skipping");
                    return Ok(None);
                };
                Change::Upsert(Collection {
                    index: c.index,
                    name: c.name,
                    symbol: c.symbol,
                    metadata_uri: c.metadata_uri,
                })
            }
            CollectionMessage::CollectionRemoved(r) => Change::Remove(r.index),
            CollectionMessage::CollectionDataCreated(r) | CollectionMessage::CollectionDataUpdated(r) => {
                let Some(d) = self.query.collection_data(&r.chain, &r.address).await? else {
                    tracing::warn!(
                        handler = self.name(),
                        chain = %r.chain,
                        address = %r.address,
                        "Collection data not found, skipping"
                    );
                    return Ok(None);
                };
                Change::UpsertData(CollectionData {
                    chain: d.chain,
                    address: d.address,
                    collection_index: d.collection_index,
                    token_type: d.token_type,
                    decimals: d.decimals,
                    wrapped: d.wrapped,
                })
            }
            CollectionMessage::CollectionDataRemoved(r) => Change::RemoveData {
                chain: r.chain,
                address: r.address,
            },
        };
        Ok(Some(change))
    }
}

#[async_trait]
impl BatchHandler for CollectionIndexer {
    fn name(&self) -> &str {
        "collections"
    }

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError> {
        let mut changes = Vec::new();
        for msg in decode_batch::<CollectionMessage>(self.name(), batch) {
            changes.extend(self.plan(msg).await?);
        }
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.storage.begin().await?;
        for change in &changes {
            match change {
                Change::Upsert(c) => tx.upsert_collection(c).await?,
                Change::Remove(index) => {
                    if !tx.delete_collection(index).await? {
                        tracing::debug!(handler = self.name(), collection = %index, "Collection already absent");
                    }
                }
                Change::UpsertData(d) => {
                    if !tx.collection_exists(&d.collection_index).await? {
                        tracing::warn!(
                            handler = self.name(),
                            collection = %d.collection_index,
                            chain = %d.chain,
                            "Data for unknown collection, skipping"
                        );
                        continue;
                    }
                    tx.upsert_collection_data(d).await?;
                }
                Change::RemoveData { chain, address } => {
                    if !tx.delete_collection_data(chain, address).await? {
                        tracing::debug!(handler = self.name(), %chain, %address, "Collection data already absent");
                    }
                }
            }
        }
        tx.commit().await?;

        tracing::info!(handler = self.name(), count = changes.len(), "Collection changes applied");
        Ok(())
    }
}
