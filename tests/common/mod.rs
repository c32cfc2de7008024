#![allow(dead_code)] // each test binary uses its own subset of these helpers

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use chord_ring::protocol::Envelope;
use chord_ring::{server, ChordNetwork, ChordNode};

/// In-memory transport: routes envelopes between in-process nodes by
/// address, through the real RPC dispatcher, with failure injection so
/// tests can kill a node without real sockets.
#[derive(Clone)]
pub struct TestNetwork {
    registry: Arc<NetworkRegistry>,
    self_addr: String,
}

#[derive(Default)]
pub struct NetworkRegistry {
    peers: RwLock<HashMap<String, Arc<ChordNode<TestNetwork>>>>,
    down: Mutex<HashSet<String>>,
}

impl NetworkRegistry {
    pub async fn register(&self, node: &Arc<ChordNode<TestNetwork>>) {
        let mut peers = self.peers.write().await;
        peers.insert(node.addr().to_string(), node.clone());
    }

    /// Mark a node as dead (or revive it): every exchange addressed to it
    /// fails with a transport error.
    pub async fn set_down(&self, addr: &str, down: bool) {
        let mut dead = self.down.lock().await;
        if down {
            dead.insert(addr.to_string());
        } else {
            dead.remove(addr);
        }
    }

    async fn is_down(&self, addr: &str) -> bool {
        self.down.lock().await.contains(addr)
    }

    async fn get(&self, addr: &str) -> Option<Arc<ChordNode<TestNetwork>>> {
        self.peers.read().await.get(addr).cloned()
    }
}

#[async_trait]
impl ChordNetwork for TestNetwork {
    async fn exchange(&self, addr: &str, msg: &Envelope) -> Result<Envelope> {
        if self.registry.is_down(addr).await {
            return Err(anyhow!("injected network failure reaching {addr}"));
        }
        let Some(peer) = self.registry.get(addr).await else {
            return Err(anyhow!("no node listening on {addr}"));
        };
        match server::dispatch(&peer, msg.clone(), &self.self_addr).await {
            Some(reply) => Ok(reply),
            None => Err(anyhow!("{addr} dropped the message")),
        }
    }
}

pub async fn spawn_node(
    registry: &Arc<NetworkRegistry>,
    addr: &str,
) -> Arc<ChordNode<TestNetwork>> {
    let network = TestNetwork {
        registry: registry.clone(),
        self_addr: addr.to_string(),
    };
    let node = ChordNode::new(addr, network);
    registry.register(&node).await;
    node
}

/// One deterministic maintenance round across the whole ring, standing in
/// for what each node's background loop would do over a tick.
pub async fn stabilize_round(nodes: &[Arc<ChordNode<TestNetwork>>]) {
    for node in nodes {
        node.stabilize().await;
        node.check_predecessor().await;
    }
}

pub async fn converge(nodes: &[Arc<ChordNode<TestNetwork>>], rounds: usize) {
    for _ in 0..rounds {
        stabilize_round(nodes).await;
    }
}

/// Run the finger repair domain to completion on every node.
pub async fn repair_all_fingers(nodes: &[Arc<ChordNode<TestNetwork>>]) {
    for node in nodes {
        for k in 2..=256 {
            node.fix(k).await;
        }
    }
}

pub fn by_addr<'a>(
    nodes: &'a [Arc<ChordNode<TestNetwork>>],
    addr: &str,
) -> &'a Arc<ChordNode<TestNetwork>> {
    nodes
        .iter()
        .find(|node| node.addr() == addr)
        .unwrap_or_else(|| panic!("no test node bound to {addr}"))
}
