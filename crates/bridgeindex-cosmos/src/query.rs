//! Core-chain query service, reached through its REST gateway.
//!
//! Indexers never trust message payloads for state: they re-read the
//! authoritative operation, collection or item through [`CoreQuery`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bridgeindex_core::IndexerError;

/// A token location on one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainRef {
    pub chain: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "tokenID")]
    pub token_id: String,
}

/// Transfer details carried by a `TRANSFER` operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreTransfer {
    #[serde(default)]
    pub origin: String,
    /// Source-chain transaction hash.
    #[serde(default)]
    pub tx: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub bundle_data: String,
    #[serde(default)]
    pub bundle_salt: String,
    pub from: OnChainRef,
    pub to: OnChainRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreOperation {
    pub index: String,
    pub operation_type: String,
    /// Status as the core chain reports it, e.g. `INITIALIZED`.
    pub status: String,
    pub creator: String,
    /// Present for `TRANSFER` operations.
    pub transfer: Option<CoreTransfer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfirmation {
    pub root: String,
    /// Operation indexes the root covers.
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub creator: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreCollection {
    pub index: String,
    pub name: String,
    pub symbol: String,
    pub metadata_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreCollectionData {
    pub chain: String,
    pub address: String,
    pub collection_index: String,
    pub token_type: String,
    pub decimals: i32,
    pub wrapped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreItem {
    pub index: String,
    pub collection_index: String,
    pub metadata_uri: String,
    pub on_chain: Vec<OnChainRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSeed {
    pub seed: String,
    pub item_index: String,
}

/// Read access to core-chain state. `Ok(None)` means the entity does not exist.
#[async_trait]
pub trait CoreQuery: Send + Sync {
    async fn operation(&self, index: &str) -> Result<Option<CoreOperation>, IndexerError>;

    async fn confirmation(&self, root: &str) -> Result<Option<CoreConfirmation>, IndexerError>;

    async fn collection(&self, index: &str) -> Result<Option<CoreCollection>, IndexerError>;

    async fn collection_data(&self, chain: &str, address: &str) -> Result<Option<CoreCollectionData>, IndexerError>;

    async fn item(&self, index: &str) -> Result<Option<CoreItem>, IndexerError>;

    /// Index of the item deployed at `token`, if any.
    async fn on_chain_item(&self, token: &OnChainRef) -> Result<Option<String>, IndexerError>;

    async fn seed(&self, seed: &str) -> Result<Option<CoreSeed>, IndexerError>;
}

// ─── Gateway JSON shapes ──────────────────────────────────────────────────────

mod gateway {
    use super::*;

    #[derive(Deserialize)]
    pub struct OperationResponse {
        pub operation: Operation,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Operation {
        pub index: String,
        pub operation_type: String,
        #[serde(default)]
        pub details: Value,
        #[serde(default)]
        pub status: String,
        #[serde(default)]
        pub creator: String,
    }

    #[derive(Deserialize)]
    pub struct ConfirmationResponse {
        pub confirmation: CoreConfirmation,
    }

    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Meta {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub symbol: String,
        #[serde(default, rename = "metadataURI")]
        pub metadata_uri: String,
    }

    #[derive(Deserialize)]
    pub struct CollectionResponse {
        pub collection: Collection,
    }

    #[derive(Deserialize)]
    pub struct Collection {
        pub index: String,
        #[serde(default)]
        pub meta: Meta,
    }

    #[derive(Deserialize)]
    pub struct CollectionDataResponse {
        pub data: CollectionData,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollectionData {
        pub index: OnChainRef,
        pub collection: String,
        #[serde(default)]
        pub token_type: String,
        #[serde(default)]
        pub wrapped: bool,
        #[serde(default)]
        pub decimals: i32,
    }

    #[derive(Deserialize)]
    pub struct ItemResponse {
        pub item: Item,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Item {
        pub index: String,
        pub collection: String,
        #[serde(default)]
        pub meta: Meta,
        #[serde(default)]
        pub on_chain: Vec<OnChainRef>,
    }

    #[derive(Deserialize)]
    pub struct OnChainItemResponse {
        pub item: OnChainItem,
    }

    #[derive(Deserialize)]
    pub struct OnChainItem {
        pub item: String,
    }

    #[derive(Deserialize)]
    pub struct SeedResponse {
        pub seed: Seed,
    }

    #[derive(Deserialize)]
    pub struct Seed {
        pub seed: String,
        pub item: String,
    }
}

const TRANSFER_OPERATION: &str = "TRANSFER";

impl From<gateway::Operation> for CoreOperation {
    fn from(op: gateway::Operation) -> Self {
        let transfer = if op.operation_type.eq_ignore_ascii_case(TRANSFER_OPERATION) {
            serde_json::from_value::<CoreTransfer>(op.details)
                .map_err(|e| tracing::warn!(operation = %op.index, error = %e, "Unreadable transfer details"))
                .ok()
        } else {
            None
        };
        Self {
            index: op.index,
            operation_type: op.operation_type,
            status: op.status,
            creator: op.creator,
            transfer,
        }
    }
}

/// [`CoreQuery`] over the REST gateway.
pub struct RestCoreQuery {
    base_url: String,
    http: reqwest::Client,
}

impl RestCoreQuery {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Rpc(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, IndexerError> {
        let url = format!("{}/rarimo/rarimo-core/{path}", self.base_url);
        tracing::trace!(%url, "core query");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{path}: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("{path}: HTTP {status}: {body}")));
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| IndexerError::Decode(format!("{path}: {e}")))
    }
}

#[async_trait]
impl CoreQuery for RestCoreQuery {
    async fn operation(&self, index: &str) -> Result<Option<CoreOperation>, IndexerError> {
        let resp: Option<gateway::OperationResponse> = self.get(&format!("rarimocore/operation/{index}")).await?;
        Ok(resp.map(|r| r.operation.into()))
    }

    async fn confirmation(&self, root: &str) -> Result<Option<CoreConfirmation>, IndexerError> {
        let resp: Option<gateway::ConfirmationResponse> = self.get(&format!("rarimocore/confirmation/{root}")).await?;
        Ok(resp.map(|r| r.confirmation))
    }

    async fn collection(&self, index: &str) -> Result<Option<CoreCollection>, IndexerError> {
        let resp: Option<gateway::CollectionResponse> = self.get(&format!("tokenmanager/collection/{index}")).await?;
        Ok(resp.map(|r| CoreCollection {
            index: r.collection.index,
            name: r.collection.meta.name,
            symbol: r.collection.meta.symbol,
            metadata_uri: r.collection.meta.metadata_uri,
        }))
    }

    async fn collection_data(&self, chain: &str, address: &str) -> Result<Option<CoreCollectionData>, IndexerError> {
        let resp: Option<gateway::CollectionDataResponse> =
            self.get(&format!("tokenmanager/collection/{chain}/{address}")).await?;
        Ok(resp.map(|r| CoreCollectionData {
            chain: r.data.index.chain,
            address: r.data.index.address,
            collection_index: r.data.collection,
            token_type: r.data.token_type,
            decimals: r.data.decimals,
            wrapped: r.data.wrapped,
        }))
    }

    async fn item(&self, index: &str) -> Result<Option<CoreItem>, IndexerError> {
        let resp: Option<gateway::ItemResponse> = self.get(&format!("tokenmanager/item/{index}")).await?;
        Ok(resp.map(|r| CoreItem {
            index: r.item.index,
            collection_index: r.item.collection,
            metadata_uri: r.item.meta.metadata_uri,
            on_chain: r.item.on_chain,
        }))
    }

    async fn on_chain_item(&self, token: &OnChainRef) -> Result<Option<String>, IndexerError> {
        let path = format!(
            "tokenmanager/onchain_item/{}/{}/{}",
            token.chain, token.address, token.token_id
        );
        let resp: Option<gateway::OnChainItemResponse> = self.get(&path).await?;
        Ok(resp.map(|r| r.item.item))
    }

    async fn seed(&self, seed: &str) -> Result<Option<CoreSeed>, IndexerError> {
        let resp: Option<gateway::SeedResponse> = self.get(&format!("tokenmanager/seed/{seed}")).await?;
        Ok(resp.map(|r| CoreSeed {
            seed: r.seed.seed,
            item_index: r.seed.item,
        }))
    }
}
