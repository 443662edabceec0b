//! Core-chain event types and their translation into bus messages.
//!
//! Load-bearing attributes are required: the core chain always emits them,
//! so their absence means the node and this indexer disagree on the event
//! schema, and continuing would silently drop operations.

use bridgeindex_core::message::{
    CollectionDataRef, CollectionMessage, CollectionRef, ConfirmationRef, ItemMessage, ItemRef, OnChainItemRef,
    OperationMessage, OperationRef, SeedRef, TxContext, VoteRef,
};
use bridgeindex_core::VoteChoice;

use crate::rpc::AbciEvent;

// Bridge submodule
pub const EVENT_NEW_OPERATION: &str = "new_operation";
pub const EVENT_NEW_CONFIRMATION: &str = "new_confirmation";
pub const EVENT_VOTE: &str = "vote";
pub const EVENT_OPERATION_APPROVED: &str = "operation_approved";
pub const EVENT_OPERATION_REJECTED: &str = "operation_rejected";

pub const ATTR_OPERATION_ID: &str = "operation_id";
pub const ATTR_OPERATION_TYPE: &str = "operation_type";
pub const ATTR_CONFIRMATION_ID: &str = "confirmation_id";
pub const ATTR_VOTE: &str = "vote";

pub const OPERATION_TYPE_TRANSFER: &str = "TRANSFER";

// Token manager
pub const EVENT_NEW_COLLECTION: &str = "new_collection";
pub const EVENT_REMOVED_COLLECTION: &str = "removed_collection";
pub const EVENT_NEW_COLLECTION_DATA: &str = "new_collection_data";
pub const EVENT_UPDATED_COLLECTION_DATA: &str = "updated_collection_data";
pub const EVENT_REMOVED_COLLECTION_DATA: &str = "removed_collection_data";
pub const EVENT_NEW_ITEM: &str = "new_item";
pub const EVENT_REMOVED_ITEM: &str = "removed_item";
pub const EVENT_NEW_ONCHAIN_ITEM: &str = "new_onchain_item";
pub const EVENT_REMOVED_ONCHAIN_ITEM: &str = "removed_onchain_item";
pub const EVENT_SEED_CREATED: &str = "seed_created";
pub const EVENT_SEED_REMOVED: &str = "seed_removed";

/// Every token-manager event type [`TokenBatches`] recognises.
pub const TOKEN_EVENTS: &[&str] = &[
    EVENT_NEW_COLLECTION,
    EVENT_REMOVED_COLLECTION,
    EVENT_NEW_COLLECTION_DATA,
    EVENT_UPDATED_COLLECTION_DATA,
    EVENT_REMOVED_COLLECTION_DATA,
    EVENT_NEW_ITEM,
    EVENT_REMOVED_ITEM,
    EVENT_NEW_ONCHAIN_ITEM,
    EVENT_REMOVED_ONCHAIN_ITEM,
    EVENT_SEED_CREATED,
    EVENT_SEED_REMOVED,
];

pub const ATTR_COLLECTION_INDEX: &str = "collection_index";
pub const ATTR_COLLECTION_DATA_CHAIN: &str = "collection_data_chain";
pub const ATTR_COLLECTION_DATA_ADDRESS: &str = "collection_data_address";
pub const ATTR_ITEM_INDEX: &str = "item_index";
pub const ATTR_ONCHAIN_ITEM_CHAIN: &str = "onchain_item_chain";
pub const ATTR_SEED: &str = "seed";

/// Value of `key`, panicking when the core chain left it out.
pub fn require_attribute<'a>(event: &'a AbciEvent, key: &str) -> &'a str {
    match event.attribute(key) {
        Some(v) => v,
        None => panic!("core-chain event {:?} is missing required attribute {key:?}", event.kind),
    }
}

/// Bridge-submodule messages, split by destination queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationBatches {
    pub transfers: Vec<OperationMessage>,
    pub confirmations: Vec<OperationMessage>,
    pub votes: Vec<OperationMessage>,
    pub approvals: Vec<OperationMessage>,
    pub rejections: Vec<OperationMessage>,
}

impl OperationBatches {
    pub fn len(&self) -> usize {
        self.transfers.len() + self.confirmations.len() + self.votes.len() + self.approvals.len() + self.rejections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sort one transaction's events into the batches.
    pub fn extend_from_events<'a>(&mut self, events: impl IntoIterator<Item = &'a AbciEvent>, tx: &TxContext) {
        for event in events {
            match event.kind.as_str() {
                EVENT_NEW_OPERATION => {
                    let kind = require_attribute(event, ATTR_OPERATION_TYPE);
                    if !kind.eq_ignore_ascii_case(OPERATION_TYPE_TRANSFER) {
                        continue;
                    }
                    self.transfers.push(OperationMessage::TransferOp(operation_ref(event, tx)));
                }
                EVENT_NEW_CONFIRMATION => {
                    self.confirmations.push(OperationMessage::ConfirmationOp(ConfirmationRef {
                        confirmation_id: require_attribute(event, ATTR_CONFIRMATION_ID).to_string(),
                        tx: tx.clone(),
                    }));
                }
                EVENT_VOTE => {
                    let operation_id = require_attribute(event, ATTR_OPERATION_ID).to_string();
                    let raw_choice = require_attribute(event, ATTR_VOTE);
                    match raw_choice.parse::<VoteChoice>() {
                        Ok(choice) => self.votes.push(OperationMessage::VoteOp(VoteRef {
                            operation_id,
                            choice,
                            tx: tx.clone(),
                        })),
                        Err(e) => {
                            tracing::warn!(tx = %tx.tx_hash, operation = %operation_id, error = %e, "Skipping vote")
                        }
                    }
                }
                EVENT_OPERATION_APPROVED => self.approvals.push(OperationMessage::ApprovalOp(operation_ref(event, tx))),
                EVENT_OPERATION_REJECTED => self.rejections.push(OperationMessage::RejectionOp(operation_ref(event, tx))),
                _ => {}
            }
        }
    }
}

fn operation_ref(event: &AbciEvent, tx: &TxContext) -> OperationRef {
    OperationRef {
        operation_id: require_attribute(event, ATTR_OPERATION_ID).to_string(),
        tx: tx.clone(),
    }
}

/// Token-manager messages for the collections and items queues.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TokenBatches {
    pub collections: Vec<CollectionMessage>,
    pub items: Vec<ItemMessage>,
}

impl TokenBatches {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.items.is_empty()
    }

    pub fn extend_from_events<'a>(&mut self, events: impl IntoIterator<Item = &'a AbciEvent>, tx: &TxContext) {
        for event in events {
            match event.kind.as_str() {
                EVENT_NEW_COLLECTION => self.collections.push(CollectionMessage::CollectionCreated(collection_ref(event, tx))),
                EVENT_REMOVED_COLLECTION => {
                    self.collections.push(CollectionMessage::CollectionRemoved(collection_ref(event, tx)))
                }
                EVENT_NEW_COLLECTION_DATA => {
                    self.collections.push(CollectionMessage::CollectionDataCreated(collection_data_ref(event, tx)))
                }
                EVENT_UPDATED_COLLECTION_DATA => {
                    self.collections.push(CollectionMessage::CollectionDataUpdated(collection_data_ref(event, tx)))
                }
                EVENT_REMOVED_COLLECTION_DATA => {
                    self.collections.push(CollectionMessage::CollectionDataRemoved(collection_data_ref(event, tx)))
                }
                EVENT_NEW_ITEM => self.items.push(ItemMessage::ItemCreated(item_ref(event, tx))),
                EVENT_REMOVED_ITEM => self.items.push(ItemMessage::ItemRemoved(item_ref(event, tx))),
                EVENT_NEW_ONCHAIN_ITEM => self.items.push(ItemMessage::ItemOnChainCreated(on_chain_item_ref(event, tx))),
                EVENT_REMOVED_ONCHAIN_ITEM => {
                    self.items.push(ItemMessage::ItemOnChainRemoved(on_chain_item_ref(event, tx)))
                }
                EVENT_SEED_CREATED => self.items.push(ItemMessage::SeedCreated(seed_ref(event, tx))),
                EVENT_SEED_REMOVED => self.items.push(ItemMessage::SeedRemoved(seed_ref(event, tx))),
                _ => {}
            }
        }
    }
}

fn collection_ref(event: &AbciEvent, tx: &TxContext) -> CollectionRef {
    CollectionRef {
        index: require_attribute(event, ATTR_COLLECTION_INDEX).to_string(),
        tx: tx.clone(),
    }
}

fn collection_data_ref(event: &AbciEvent, tx: &TxContext) -> CollectionDataRef {
    CollectionDataRef {
        collection_index: require_attribute(event, ATTR_COLLECTION_INDEX).to_string(),
        chain: require_attribute(event, ATTR_COLLECTION_DATA_CHAIN).to_string(),
        address: require_attribute(event, ATTR_COLLECTION_DATA_ADDRESS).to_string(),
        tx: tx.clone(),
    }
}

fn item_ref(event: &AbciEvent, tx: &TxContext) -> ItemRef {
    ItemRef {
        index: require_attribute(event, ATTR_ITEM_INDEX).to_string(),
        tx: tx.clone(),
    }
}

fn on_chain_item_ref(event: &AbciEvent, tx: &TxContext) -> OnChainItemRef {
    OnChainItemRef {
        item_index: require_attribute(event, ATTR_ITEM_INDEX).to_string(),
        chain: require_attribute(event, ATTR_ONCHAIN_ITEM_CHAIN).to_string(),
        tx: tx.clone(),
    }
}

fn seed_ref(event: &AbciEvent, tx: &TxContext) -> SeedRef {
    SeedRef {
        seed: require_attribute(event, ATTR_SEED).to_string(),
        item_index: require_attribute(event, ATTR_ITEM_INDEX).to_string(),
        tx: tx.clone(),
    }
}
