//! Fixtures shared by the indexer tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use bridgeindex_core::message::{to_envelopes, Envelope, MessageFamily, TxContext};
use bridgeindex_core::IndexerError;
use bridgeindex_cosmos::{
    CoreCollection, CoreCollectionData, CoreConfirmation, CoreItem, CoreOperation, CoreQuery, CoreSeed, CoreTransfer,
    OnChainRef,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn tx(hash: &str, secs: i64) -> TxContext {
    TxContext {
        tx_hash: hash.into(),
        block_height: secs,
        block_time: at(secs),
    }
}

pub fn envelopes<M: MessageFamily>(msgs: &[M]) -> Vec<Envelope> {
    to_envelopes(msgs).unwrap()
}

#[derive(Default)]
pub struct MockCore {
    pub operations: Mutex<HashMap<String, CoreOperation>>,
    pub confirmations: Mutex<HashMap<String, CoreConfirmation>>,
    pub collections: Mutex<HashMap<String, CoreCollection>>,
    pub collection_data: Mutex<HashMap<(String, String), CoreCollectionData>>,
    pub items: Mutex<HashMap<String, CoreItem>>,
    pub on_chain_items: Mutex<HashMap<(String, String, String), String>>,
    pub seeds: Mutex<HashMap<String, CoreSeed>>,
}

impl MockCore {
    pub fn add_transfer(&self, index: &str, status: &str) {
        let transfer = CoreTransfer {
            origin: format!("origin-{index}"),
            tx: format!("0xsrc-{index}"),
            event_id: "1".into(),
            sender: "0xsender".into(),
            receiver: "0xreceiver".into(),
            amount: "100".into(),
            bundle_data: String::new(),
            bundle_salt: String::new(),
            from: OnChainRef {
                chain: "Goerli".into(),
                address: "0xtoken".into(),
                token_id: String::new(),
            },
            to: OnChainRef {
                chain: "Solana".into(),
                address: "mint".into(),
                token_id: String::new(),
            },
        };
        self.operations.lock().unwrap().insert(
            index.into(),
            CoreOperation {
                index: index.into(),
                operation_type: "TRANSFER".into(),
                status: status.into(),
                creator: "rarimo1creator".into(),
                transfer: Some(transfer),
            },
        );
    }

    pub fn add_confirmation(&self, root: &str, indexes: &[&str]) {
        self.confirmations.lock().unwrap().insert(
            root.into(),
            CoreConfirmation {
                root: root.into(),
                indexes: indexes.iter().map(|s| s.to_string()).collect(),
                creator: String::new(),
            },
        );
    }
}

#[async_trait]
impl CoreQuery for MockCore {
    async fn operation(&self, index: &str) -> Result<Option<CoreOperation>, IndexerError> {
        Ok(self.operations.lock().unwrap().get(index).cloned())
    }

    async fn confirmation(&self, root: &str) -> Result<Option<CoreConfirmation>, IndexerError> {
        Ok(self.confirmations.lock().unwrap().get(root).cloned())
    }

    async fn collection(&self, index: &str) -> Result<Option<CoreCollection>, IndexerError> {
        Ok(self.collections.lock().unwrap().get(index).cloned())
    }

    async fn collection_data(&self, chain: &str, address: &str) -> Result<Option<CoreCollectionData>, IndexerError> {
        let key = (chain.to_string(), address.to_string());
        Ok(self.collection_data.lock().unwrap().get(&key).cloned())
    }

    async fn item(&self, index: &str) -> Result<Option<CoreItem>, IndexerError> {
        Ok(self.items.lock().unwrap().get(index).cloned())
    }

    async fn on_chain_item(&self, token: &OnChainRef) -> Result<Option<String>, IndexerError> {
        let key = (token.chain.clone(), token.address.clone(), token.token_id.clone());
        Ok(self.on_chain_items.lock().unwrap().get(&key).cloned())
    }

    async fn seed(&self, seed: &str) -> Result<Option<CoreSeed>, IndexerError> {
        Ok(self.seeds.lock().unwrap().get(seed).cloned())
    }
}
