//! # DC-net Core
//!
//! Anonymous broadcast for a closed room of nodes using a dining-cryptographers
//! network.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Message packing**: plaintexts become integers whose room-wide sum reveals
//!   how many nodes sent and what they sent, but not who sent it
//! - **Blinding keys**: per-round values that cancel across the room, generated
//!   by pairwise secret sharing or pairwise Diffie-Hellman
//! - **Commitments**: Pedersen commitments on keys and messages, plus a
//!   sigma-protocol proof toolkit
//! - **Collision resolution**: a binary-tree search over real and virtual rounds
//! - **Transport seam**: a `Relay` trait with an in-memory implementation, a
//!   pairwise barrier mesh and an aggregation task
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dcnet_core::{GroupParams, MemoryRelay, RoomConfig, SessionManager, SessionOptions};
//! use std::sync::Arc;
//!
//! let group = GroupParams::generate(256, 1024, &mut rand::thread_rng())?;
//! let room = Arc::new(RoomConfig::local(3, group).with_non_probabilistic_mode(true));
//! let relay = Arc::new(MemoryRelay::new());
//!
//! // One manager per node; every node runs concurrently.
//! let manager = SessionManager::new(room, 1, relay, SessionOptions::default())?;
//! let report = manager.run("hello").await?;
//! assert_eq!(report.messages, vec!["hello".to_string()]);
//! ```

pub mod commitment;
pub mod error;
pub mod group;
pub mod keygen;
pub mod message;
pub mod types;

// Runtime-dependent modules (require tokio)
#[cfg(feature = "runtime")]
pub mod mpc;
#[cfg(feature = "runtime")]
pub mod session;

pub use commitment::Commitment;
pub use error::{Error, Result};
pub use group::GroupParams;
pub use keygen::BlindingKeyGenerator;
pub use message::ProtocolMessage;
pub use types::{KeyStrategy, NodeIndex, RoomConfig, RoomId};

#[cfg(feature = "runtime")]
pub use mpc::{MemoryRelay, Relay};
#[cfg(feature = "runtime")]
pub use session::{SessionManager, SessionOptions, SessionReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
