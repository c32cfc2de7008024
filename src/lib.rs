//! # chord-ring
//!
//! A [Chord](https://pdos.csail.mit.edu/papers/chord:sigcomm01/chord_sigcomm.pdf)
//! distributed hash table node: given a 256-bit key, the ring resolves it to
//! the live node responsible for that key in O(log N) hops, and keeps doing
//! so while nodes join and fail.
//!
//! The crate is split into a handful of modules that can be reused
//! independently:
//!
//! - [`core`]: identifier arithmetic on the mod-2^256 ring, the routing
//!   state (predecessor, successor list, finger table), and the
//!   [`ChordNode`] state machine with its stabilization protocol.
//! - [`protocol`]: the JSON-serialized wire messages exchanged between
//!   peers.
//! - [`framing`]: length-prefixed frames so messages can share one stream.
//! - [`net`]: the [`TcpNetwork`] transport with its per-peer connection
//!   cache.
//! - [`server`]: the listener, the RPC dispatcher, and the [`create`] /
//!   [`join`] lifecycle entry points.
//!
//! ## Getting started
//!
//! ```no_run
//! use anyhow::Result;
//!
//! # async fn launch() -> Result<()> {
//! // first node of a fresh ring
//! let seed = chord_ring::create("127.0.0.1:8001").await?;
//!
//! // a second node joins through the first
//! let peer = chord_ring::join("127.0.0.2:8001", "127.0.0.1:8001").await?;
//!
//! // any node resolves any key to its owner's address
//! let key = chord_ring::hash_address("some key");
//! let owner = peer.lookup(key, seed.addr()).await?;
//! println!("{owner} owns the key");
//! # Ok(())
//! # }
//! ```
//!
//! Services can layer their own request/reply protocols on the node's
//! transport by registering an [`Application`] under an unused protocol
//! tag; the node calls back on every predecessor change and on every
//! inbound message carrying that tag.

pub mod core;
pub mod framing;
pub mod net;
pub mod protocol;
pub mod server;

pub use core::{
    finger_target, hash_address, in_arc, Application, ChordNetwork, ChordNode, Finger, NodeId,
    CHORD_PROTO,
};
pub use net::TcpNetwork;
pub use server::{create, join};
