//! Validation core for a Bitcoin-style ledger
//!
//! secp256k1 arithmetic and ECDSA, the transaction and block wire codecs,
//! compact difficulty targets, Merkle roots, a script interpreter and the
//! transaction verifier built on top of it.

pub mod block;
pub mod config;
pub mod curves;
pub mod difficulty;
pub mod ecdsa;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod interpreter;
pub mod keys;
pub mod merkle;
pub mod opcodes;
pub mod params;
pub mod script;
pub mod scriptnum;
pub mod transaction;
pub mod verify;

pub use error::{LedgerError, Result};

pub use block::{Block, BlockHeader, genesis_header, next_difficulty};
pub use config::{Config, RetargetParams, ScriptLimits, VerifyPolicy};
pub use curves::{Curve, Point};
pub use difficulty::Difficulty;
pub use ecdsa::{Signature, sign, verify};
pub use interpreter::{Interpreter, ScriptError, VmState, evaluate};
pub use keys::{KeyPair, Network, PublicKey, address_to_pubkey_hash, b58decode, b58encode};
pub use merkle::{compute_root, merkle_root};
pub use params::SECP256K1;
pub use script::Script;
pub use transaction::{OutPoint, Tx, TxIn, TxOut};
pub use verify::{InputFailure, TxVerifier, UtxoView, VerifyError};
