//! bridgeindex-near: bridge withdrawal scanning on NEAR.
//!
//! ```text
//! final head ─► block ─► chunks ─► transactions ─► receipt outcomes
//!                                                      │ executor == bridge contract
//!                                                      ▼
//!                                          EVENT_JSON: *_withdrawn ─► Withdrawal
//! ```

pub mod events;
pub mod producer;
pub mod rpc;

pub use events::{parse_withdrawals, NearWithdrawal, WithdrawalKind};
pub use producer::{NearChain, NearProducer};
pub use rpc::{HttpNearClient, NearBlock, NearRpcClient};
