//! bridgeindex-evm: bridge withdrawal scanning on EVM chains.
//!
//! # Architecture
//!
//! ```text
//! EvmProducer (one per chain)
//!     ├── WithdrawnHandler native   ── cursor evm_<chain>_native
//!     ├── WithdrawnHandler erc20    ── cursor evm_<chain>_erc20
//!     ├── WithdrawnHandler erc721   ── cursor evm_<chain>_erc721
//!     └── WithdrawnHandler erc1155  ── cursor evm_<chain>_erc1155
//!              │
//!              └── eth_getLogs → receipt → Withdrawal message
//! ```

pub mod handler;
pub mod producer;
pub mod rpc;

pub use handler::{origin_from_data, AssetKind, WithdrawnHandler};
pub use producer::{EvmChain, EvmProducer};
pub use rpc::{EvmRpcClient, HttpEvmClient, RawLog, TxReceipt};
