//! Core Chord logic: identifier arithmetic, routing state, and the per-node
//! state machine.
//!
//! This module contains the fundamental building blocks of the ring:
//!
//! - **Identity**: [`NodeId`], [`hash_address`] mapping addresses onto the ring
//! - **Ring arithmetic**: [`in_arc`] for clockwise arc membership,
//!   [`finger_target`] for finger-table targets
//! - **Routing**: [`Finger`], the routing-state record holding predecessor,
//!   successor list, and finger table
//! - **Transport abstraction**: [`ChordNetwork`] so the same node runs over
//!   TCP in production and an in-memory network in tests
//! - **Node state machine**: [`ChordNode`] with lookup, the stabilization
//!   protocol, and the join/finalize lifecycle

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::protocol::{self, Envelope};

// ============================================================================
// Type Aliases
// ============================================================================

/// A 256-bit position on the identifier ring.
///
/// A node's id is the SHA-256 digest of the `host:port` string it binds to,
/// giving a uniform spread of nodes around the ring.
pub type NodeId = [u8; 32];

// ============================================================================
// Configuration Constants
// ============================================================================

/// Protocol tag reserved for Chord control traffic.
pub const CHORD_PROTO: u32 = 1;

/// Depth of the successor list. Slot 0 mirrors the successor; the rest are
/// failover candidates, so the ring survives up to this many simultaneous
/// adjacent failures.
pub const SUCCESSOR_LIST_LEN: usize = 256;

/// Finger table slots. Slot 0 is the node itself, slot k in 1..=256 targets
/// the owner of `self + 2^(k-1)`.
pub const FINGER_TABLE_LEN: usize = 257;

/// Delay between maintenance ticks; one stabilize / check-predecessor / fix
/// round runs per tick.
const MAINTENANCE_TICK: Duration = Duration::from_millis(100);

// ============================================================================
// Identifier Arithmetic
// ============================================================================

/// Hash a network address string onto the identifier ring.
pub fn hash_address(addr: &str) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(addr.as_bytes());
    hasher.finalize().into()
}

/// True iff `x` lies strictly inside the open arc from `a` to `b`, walking
/// clockwise. Both endpoints are excluded, and the arc `(a, a)` is empty.
pub fn in_arc(x: &NodeId, a: &NodeId, b: &NodeId) -> bool {
    let x = BigUint::from_bytes_be(x);
    let a = BigUint::from_bytes_be(a);
    let b = BigUint::from_bytes_be(b);
    if a < b {
        a < x && x < b
    } else if a > b {
        x > a || x < b
    } else {
        false
    }
}

/// The finger-table target `(id + 2^(k-1)) mod 2^256` for k in 1..=256,
/// returned as fixed-width big-endian bytes (left-padded with zeros).
pub fn finger_target(id: &NodeId, k: usize) -> NodeId {
    debug_assert!((1..FINGER_TABLE_LEN).contains(&k));
    let modulus = BigUint::from(1u8) << 256;
    let step = BigUint::from(1u8) << (k - 1);
    let sum: BigUint = (BigUint::from_bytes_be(id) + step) % modulus;

    let bytes = sum.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

// ============================================================================
// Fingers
// ============================================================================

/// A ring position paired with the network address serving it.
///
/// A finger with an empty address is the "unset" sentinel. Fingers compare
/// by address: routing cares about which node an entry reaches, and status
/// listings deduplicate adjacent entries that way.
#[derive(Clone, Debug, Default)]
pub struct Finger {
    pub id: NodeId,
    pub addr: String,
}

impl Finger {
    pub fn new(id: NodeId, addr: String) -> Self {
        Self { id, addr }
    }

    /// The sentinel for an empty routing slot.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn is_unset(&self) -> bool {
        self.addr.is_empty()
    }
}

impl PartialEq for Finger {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Finger {}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

// ============================================================================
// Routing State
// ============================================================================

/// The node's routing record.
///
/// `fingers[1]` is the canonical successor slot; the `successor` and
/// `successor_list[0]` views read and write it, so the three aliases can
/// never diverge. All access goes through the node's single mutex, which
/// serializes every read and write.
struct RoutingTable {
    predecessor: Finger,
    fingers: Vec<Finger>,
    successors: Vec<Finger>,
}

impl RoutingTable {
    fn new(me: Finger) -> Self {
        let mut fingers = vec![Finger::unset(); FINGER_TABLE_LEN];
        fingers[0] = me;
        Self {
            predecessor: Finger::unset(),
            fingers,
            successors: vec![Finger::unset(); SUCCESSOR_LIST_LEN],
        }
    }

    fn successor(&self) -> &Finger {
        &self.fingers[1]
    }

    fn successor_at(&self, index: usize) -> &Finger {
        if index == 0 {
            self.successor()
        } else {
            &self.successors[index]
        }
    }

    fn set_successor_at(&mut self, index: usize, finger: Finger) {
        if index == 0 {
            self.fingers[1] = finger;
        } else {
            self.successors[index] = finger;
        }
    }

    /// Finger table with trailing unset slots trimmed. Slot 0 (self) always
    /// leads the list.
    fn finger_list(&self) -> Vec<Finger> {
        let mut list = self.fingers.clone();
        while list.len() > 1 && list.last().is_some_and(Finger::is_unset) {
            list.pop();
        }
        list
    }

    /// Successor list with trailing unset slots trimmed. Slot 0 reads the
    /// canonical successor.
    fn successor_list(&self) -> Vec<Finger> {
        let mut list = Vec::with_capacity(SUCCESSOR_LIST_LEN);
        list.push(self.successor().clone());
        list.extend(self.successors[1..].iter().cloned());
        while list.last().is_some_and(Finger::is_unset) {
            list.pop();
        }
        list
    }
}

// ============================================================================
// Application Hook
// ============================================================================

/// Callbacks a layered service registers against a protocol tag.
///
/// Tag 1 is reserved for Chord itself; everything else is free for services
/// that piggyback on the node's transport.
pub trait Application: Send + Sync + 'static {
    /// Invoked after this node adopts `predecessor` as its new predecessor.
    fn notify(&self, predecessor: &NodeId, me: &NodeId);

    /// Invoked for each inbound message carrying the application's tag. The
    /// returned bytes are sent back to `from` as the reply payload.
    fn message(&self, from: &str, payload: &[u8]) -> Vec<u8>;
}

// ============================================================================
// Network Trait
// ============================================================================

/// Request/reply transport between ring peers.
///
/// The trait abstracts the byte-stream layer so the node logic runs over
/// real TCP in production and over an in-memory registry in tests.
#[async_trait]
pub trait ChordNetwork: Send + Sync + 'static {
    /// Send one message to the node serving `addr` and await its reply.
    async fn exchange(&self, addr: &str, msg: &Envelope) -> Result<Envelope>;

    /// Drop any cached transport state. Called once during finalize.
    async fn close(&self) {}
}

// ============================================================================
// Chord Node
// ============================================================================

/// A Chord node: one position on the ring plus the machinery that keeps its
/// routing state converging under churn.
///
/// The type is generic over the [`ChordNetwork`] transport so tests can use
/// an in-memory mock while production uses [`crate::net::TcpNetwork`]. A
/// node is always handled as `Arc<ChordNode<_>>`; the listener and the
/// maintenance loop hold their own clones.
pub struct ChordNode<N: ChordNetwork> {
    me: Finger,
    routing: Mutex<RoutingTable>,
    network: N,
    applications: Mutex<HashMap<u8, Arc<dyn Application>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<N: ChordNetwork> ChordNode<N> {
    /// Build a node identified by `addr` without starting any background
    /// work. [`crate::server::create`] layers the listener and maintenance
    /// loop on top.
    pub fn new(addr: &str, network: N) -> Arc<Self> {
        let me = Finger::new(hash_address(addr), addr.to_string());
        Arc::new(Self {
            routing: Mutex::new(RoutingTable::new(me.clone())),
            me,
            network,
            applications: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.me.id
    }

    pub fn addr(&self) -> &str {
        &self.me.addr
    }

    // ------------------------------------------------------------------
    // Routing-state access
    // ------------------------------------------------------------------

    pub async fn predecessor(&self) -> Finger {
        self.routing.lock().await.predecessor.clone()
    }

    pub async fn successor(&self) -> Finger {
        self.routing.lock().await.successor().clone()
    }

    pub async fn successor_at(&self, index: usize) -> Finger {
        self.routing.lock().await.successor_at(index).clone()
    }

    pub async fn finger(&self, index: usize) -> Finger {
        self.routing.lock().await.fingers[index].clone()
    }

    pub(crate) async fn finger_list(&self) -> Vec<Finger> {
        self.routing.lock().await.finger_list()
    }

    pub(crate) async fn successor_list(&self) -> Vec<Finger> {
        self.routing.lock().await.successor_list()
    }

    async fn set_finger(&self, index: usize, finger: Finger) {
        self.routing.lock().await.fingers[index] = finger;
    }

    async fn set_successor(&self, finger: Finger) {
        self.routing.lock().await.set_successor_at(0, finger);
    }

    /// Replace successor-list slots 1..=255 with the peer's view. Slot 0 is
    /// the canonical successor and is left alone.
    async fn adopt_successor_list(&self, list: Vec<Finger>) {
        let mut routing = self.routing.lock().await;
        for (i, finger) in list.into_iter().take(SUCCESSOR_LIST_LEN - 1).enumerate() {
            routing.set_successor_at(i + 1, finger);
        }
    }

    /// Write the predecessor slot. Adopting a real predecessor fires every
    /// registered application's notify callback; clearing does not.
    async fn set_predecessor(&self, finger: Finger) {
        {
            self.routing.lock().await.predecessor = finger.clone();
        }
        if finger.is_unset() {
            return;
        }
        let apps: Vec<Arc<dyn Application>> =
            self.applications.lock().await.values().cloned().collect();
        for app in apps {
            app.notify(&finger.id, &self.me.id);
        }
    }

    // ------------------------------------------------------------------
    // Outbound RPC helpers
    // ------------------------------------------------------------------

    async fn ping(&self, addr: &str) -> Result<bool> {
        let reply = self.network.exchange(addr, &Envelope::ping()).await?;
        Ok(protocol::parse_pong(&reply))
    }

    async fn fetch_fingers(&self, addr: &str) -> Result<Vec<Finger>> {
        let reply = self.network.exchange(addr, &Envelope::get_fingers()).await?;
        protocol::parse_fingers(&reply)
    }

    async fn fetch_successors(&self, addr: &str) -> Result<Vec<Finger>> {
        let reply = self.network.exchange(addr, &Envelope::get_succ()).await?;
        protocol::parse_fingers(&reply)
    }

    async fn fetch_predecessor(&self, addr: &str) -> Result<Option<Finger>> {
        let reply = self.network.exchange(addr, &Envelope::get_pred()).await?;
        protocol::parse_pred(&reply)
    }

    async fn fetch_id(&self, addr: &str) -> Result<NodeId> {
        let reply = self.network.exchange(addr, &Envelope::get_id()).await?;
        protocol::parse_id(&reply)
    }

    async fn claim_predecessor_of(&self, addr: &str) -> Result<()> {
        self.network
            .exchange(addr, &Envelope::claim_pred(&self.me))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Resolve `key` to the address of the node responsible for it, starting
    /// the traversal at `start`.
    ///
    /// Each hop asks the current node for its finger table and moves to the
    /// highest finger lying inside the arc between that node and the key,
    /// which strictly shrinks the remaining clockwise distance. An
    /// unreachable finger is skipped in favor of the next lower one; when no
    /// finger is closer, the current node's immediate successor is the
    /// answer. A failure to reach `start` itself is the caller's to handle
    /// (it may retry through a backup).
    pub async fn lookup(&self, key: NodeId, start: &str) -> Result<String> {
        let mut current = start.to_string();
        let mut fingers = self.fetch_fingers(&current).await?;

        loop {
            if fingers.len() < 2 {
                // the responder is alone on its ring
                return Ok(current);
            }
            if key == fingers[0].id {
                return Ok(fingers[0].addr.clone());
            }

            let mut advanced = false;
            for i in (1..fingers.len()).rev() {
                let candidate = fingers[i].clone();
                if candidate.is_unset() || !in_arc(&candidate.id, &fingers[0].id, &key) {
                    continue;
                }
                match self.fetch_fingers(&candidate.addr).await {
                    Ok(next) => {
                        trace!(
                            key = %hex::encode(&key[..8]),
                            hop = %candidate.addr,
                            "lookup advancing"
                        );
                        current = candidate.addr;
                        fingers = next;
                        advanced = true;
                        break;
                    }
                    Err(err) => {
                        debug!(
                            finger = %candidate.addr,
                            "closer finger unreachable ({err:#}); walking down"
                        );
                    }
                }
            }

            if !advanced {
                // no finger is closer: the responder's successor owns the key
                return Ok(fingers[1].addr.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// One stabilization pass: verify the successor is alive (failing over
    /// to the successor list if not), refresh the successor list from it,
    /// adopt its predecessor when that node sits between us, and announce
    /// ourselves as its predecessor candidate.
    pub async fn stabilize(&self) {
        let mut successor = self.successor().await;
        if successor.is_unset() {
            return;
        }

        if self.ping(&successor.addr).await.is_err() {
            let candidate = self.successor_at(1).await;
            if candidate == self.me {
                debug!(node = %self.me.addr, "successor list exhausted; ring is down to us");
                self.set_successor(Finger::unset()).await;
            } else {
                debug!(
                    node = %self.me.addr,
                    failed = %successor.addr,
                    promoted = %candidate.addr,
                    "successor unreachable; promoting backup"
                );
                self.set_successor(candidate).await;
            }
            return;
        }

        match self.fetch_successors(&successor.addr).await {
            Ok(list) => self.adopt_successor_list(list).await,
            Err(_) => return,
        }

        match self.fetch_predecessor(&successor.addr).await {
            Ok(Some(pred))
                if !pred.is_unset()
                    && pred.id != self.me.id
                    && in_arc(&pred.id, &self.me.id, &successor.id) =>
            {
                debug!(
                    node = %self.me.addr,
                    adopted = %pred.addr,
                    "successor knows a closer predecessor; adopting it as successor"
                );
                self.set_successor(pred.clone()).await;
                successor = pred;
            }
            Ok(_) => {}
            Err(_) => return,
        }

        if let Err(err) = self.claim_predecessor_of(&successor.addr).await {
            debug!(node = %self.me.addr, successor = %successor.addr, "claim failed: {err:#}");
        }
    }

    /// Drop the predecessor if it stops answering pings. Ring correctness
    /// never depends on knowing a predecessor; the slot refills on the next
    /// claim.
    pub async fn check_predecessor(&self) {
        let predecessor = self.predecessor().await;
        if predecessor.is_unset() {
            return;
        }
        match self.ping(&predecessor.addr).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                debug!(
                    node = %self.me.addr,
                    predecessor = %predecessor.addr,
                    "predecessor unresponsive; clearing"
                );
                self.set_predecessor(Finger::unset()).await;
            }
        }
    }

    /// Repair finger slot `k` by looking up its target. Slots 0 and 1 are
    /// self and the successor and are maintained elsewhere, so the repair
    /// domain is 2..=256.
    pub async fn fix(&self, k: usize) {
        if !(2..FINGER_TABLE_LEN).contains(&k) {
            return;
        }
        let successor = self.successor().await;
        if successor.is_unset() {
            return;
        }

        let target = finger_target(&self.me.id, k);
        let owner = match self.lookup(target, &successor.addr).await {
            Ok(addr) => Some(addr),
            Err(_) => {
                let backup = self.successor_at(1).await;
                if backup.is_unset() {
                    None
                } else {
                    self.lookup(target, &backup.addr).await.ok()
                }
            }
        };
        let Some(owner) = owner else { return };
        if owner.is_empty() || owner == self.me.addr {
            return;
        }

        match self.fetch_id(&owner).await {
            Ok(id) => {
                trace!(node = %self.me.addr, slot = k, owner = %owner, "finger repaired");
                self.set_finger(k, Finger::new(id, owner)).await;
            }
            Err(err) => {
                debug!(node = %self.me.addr, slot = k, "finger owner vanished: {err:#}");
            }
        }
    }

    /// Spawn the periodic maintenance loop: every tick runs stabilize, then
    /// check-predecessor, then fix with a counter cycling 1..=256.
    pub async fn start_maintenance(self: Arc<Self>) {
        let node = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut counter = 0usize;
            loop {
                sleep(MAINTENANCE_TICK).await;
                node.stabilize().await;
                node.check_predecessor().await;
                counter = counter % 256 + 1;
                node.fix(counter).await;
            }
        });
        self.track_task(handle).await;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Join an existing ring through `peer`: find our successor by looking
    /// up our own id, then seed the canonical successor slot with it.
    /// Everything else (predecessor, successor list, fingers) fills in over
    /// the next stabilization rounds.
    pub async fn bootstrap(&self, peer: &str) -> Result<()> {
        let successor = self
            .lookup(self.me.id, peer)
            .await
            .with_context(|| format!("looking up our successor via {peer}"))?;
        if successor.is_empty() {
            bail!("bootstrap peer {peer} returned no successor");
        }
        let id = self
            .fetch_id(&successor)
            .await
            .with_context(|| format!("fetching the id of successor {successor}"))?;
        debug!(node = %self.me.addr, successor = %successor, "joined ring");
        self.set_successor(Finger::new(id, successor)).await;
        Ok(())
    }

    /// Register an application under a protocol tag. Returns false when the
    /// tag is already bound or is the reserved Chord tag.
    pub async fn register(&self, tag: u8, app: Arc<dyn Application>) -> bool {
        if u32::from(tag) == CHORD_PROTO {
            return false;
        }
        let mut apps = self.applications.lock().await;
        if apps.contains_key(&tag) {
            return false;
        }
        apps.insert(tag, app);
        true
    }

    pub(crate) async fn application(&self, tag: u8) -> Option<Arc<dyn Application>> {
        self.applications.lock().await.get(&tag).cloned()
    }

    /// Send an application payload to `addr` under `tag` over the node's
    /// transport and return the peer's reply payload.
    pub async fn application_call(&self, addr: &str, tag: u8, payload: Vec<u8>) -> Result<Vec<u8>> {
        if u32::from(tag) == CHORD_PROTO {
            bail!("protocol tag 1 is reserved for chord control traffic");
        }
        let reply = self
            .network
            .exchange(addr, &Envelope::application(u32::from(tag), payload))
            .await?;
        Ok(reply.payload.unwrap_or_default())
    }

    /// Handle an inbound predecessor claim: adopt `candidate` when we have
    /// no predecessor or it sits between the current one and us.
    pub(crate) async fn claim_candidate(&self, candidate: Finger) {
        if candidate.is_unset() {
            return;
        }
        let predecessor = self.predecessor().await;
        if predecessor.is_unset() || in_arc(&candidate.id, &predecessor.id, &self.me.id) {
            self.adopt_predecessor(candidate).await;
        }
    }

    async fn adopt_predecessor(&self, candidate: Finger) {
        debug!(node = %self.me.addr, predecessor = %candidate.addr, "adopting predecessor");
        self.set_predecessor(candidate.clone()).await;
        // a lone node bootstraps its successor from the first claimant
        if self.successor().await.is_unset() {
            self.set_successor(candidate).await;
        }
    }

    pub(crate) async fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Stop the listener and maintenance loop and drop cached connections.
    /// No handoff is attempted; the ring heals through stabilization.
    pub async fn finalize(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        self.network.close().await;
        debug!(node = %self.me.addr, "finalized");
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// One status line: id, successor, predecessor.
    pub async fn info(&self) -> String {
        let routing = self.routing.lock().await;
        let successor = match routing.successor() {
            f if f.is_unset() => "unknown".to_string(),
            f => f.to_string(),
        };
        let predecessor = match &routing.predecessor {
            f if f.is_unset() => "unknown".to_string(),
            f => f.to_string(),
        };
        format!(
            "{}\t{}\t{}",
            hex::encode(self.me.id),
            successor,
            predecessor
        )
    }

    /// Render the finger table, deduplicating runs that point at the same
    /// address.
    pub async fn show_fingers(&self) -> String {
        let fingers = { self.routing.lock().await.fingers.clone() };
        let mut out = String::new();
        let mut set = 0usize;
        let mut previous: Option<&Finger> = None;
        for (i, finger) in fingers.iter().enumerate() {
            if finger.is_unset() {
                continue;
            }
            set += 1;
            if i == 0 || previous != Some(finger) {
                out.push_str(&finger.addr);
                out.push('\n');
            }
            previous = Some(finger);
        }
        out.push_str(&format!("total fingers set: {set}\n"));
        out
    }

    /// Render the successor list, deduplicating adjacent duplicates.
    pub async fn show_succ(&self) -> String {
        let successors = self.successor_list().await;
        let mut out = String::new();
        let mut previous: Option<&Finger> = None;
        for (i, finger) in successors.iter().enumerate() {
            if finger.is_unset() {
                continue;
            }
            if i == 0 || previous != Some(finger) {
                out.push_str(&finger.addr);
                out.push('\n');
            }
            previous = Some(finger);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Transport for nodes that never talk to anyone.
    struct NullNetwork;

    #[async_trait]
    impl ChordNetwork for NullNetwork {
        async fn exchange(&self, _addr: &str, _msg: &Envelope) -> Result<Envelope> {
            Err(anyhow!("no network"))
        }
    }

    fn id_from_byte(last: u8) -> NodeId {
        let mut id = [0u8; 32];
        id[31] = last;
        id
    }

    #[test]
    fn hash_address_is_deterministic_and_address_sensitive() {
        let a = hash_address("127.0.0.1:8001");
        assert_eq!(a, hash_address("127.0.0.1:8001"));
        assert_ne!(a, hash_address("127.0.0.1:8002"));
    }

    #[test]
    fn in_arc_handles_plain_and_wrapping_arcs() {
        let (two, five, ten) = (id_from_byte(2), id_from_byte(5), id_from_byte(10));
        let byte_255 = id_from_byte(255);

        // plain arc
        assert!(in_arc(&five, &two, &ten));
        assert!(!in_arc(&ten, &two, &five));

        // wrapping arc (10, 2): members sit above 10 or below 2
        assert!(in_arc(&byte_255, &ten, &two));
        let one = id_from_byte(1);
        assert!(in_arc(&one, &ten, &two));
        assert!(!in_arc(&five, &ten, &two));
    }

    #[test]
    fn in_arc_excludes_endpoints_and_empty_arcs() {
        let (five, ten, twenty) = (id_from_byte(5), id_from_byte(10), id_from_byte(20));
        // left endpoint
        assert!(!in_arc(&ten, &ten, &twenty));
        // right endpoint
        assert!(!in_arc(&twenty, &ten, &twenty));
        // the arc (a, a) is empty
        assert!(!in_arc(&ten, &five, &five));
    }

    #[test]
    fn finger_target_adds_the_right_power_of_two() {
        let zero = [0u8; 32];

        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(finger_target(&zero, 1), one);

        let mut top = [0u8; 32];
        top[0] = 0x80;
        assert_eq!(finger_target(&zero, 256), top);

        // wraps around the top of the ring
        let all_ones = [0xffu8; 32];
        assert_eq!(finger_target(&all_ones, 1), zero);
    }

    #[test]
    fn finger_target_is_left_padded_to_fixed_width() {
        let zero = [0u8; 32];
        let target = finger_target(&zero, 9);
        assert_eq!(target[30], 1);
        assert!(target[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn fingers_compare_and_render_by_address() {
        let a = Finger::new(id_from_byte(1), "127.0.0.1:8001".into());
        let b = Finger::new(id_from_byte(2), "127.0.0.1:8001".into());
        let c = Finger::new(id_from_byte(1), "127.0.0.1:8002".into());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "127.0.0.1:8001");
        assert!(Finger::unset().is_unset());
    }

    #[tokio::test]
    async fn successor_views_never_diverge() {
        let node = ChordNode::new("127.0.0.1:8001", NullNetwork);
        let succ = Finger::new(id_from_byte(9), "127.0.0.1:8002".into());
        node.set_successor(succ.clone()).await;

        assert_eq!(node.finger(1).await, succ);
        assert_eq!(node.successor().await, succ);
        assert_eq!(node.successor_at(0).await, succ);

        // writing through the successor-list alias is visible everywhere too
        let other = Finger::new(id_from_byte(3), "127.0.0.1:8003".into());
        {
            let mut routing = node.routing.lock().await;
            routing.set_successor_at(0, other.clone());
        }
        assert_eq!(node.finger(1).await, other);
        assert_eq!(node.successor().await, other);
    }

    #[tokio::test]
    async fn finger_table_slot_zero_is_self() {
        let node = ChordNode::new("127.0.0.1:8001", NullNetwork);
        let list = node.finger_list().await;
        assert_eq!(list[0].addr, "127.0.0.1:8001");
        assert_eq!(list[0].id, hash_address("127.0.0.1:8001"));
        // a fresh node advertises only itself
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn register_rejects_the_reserved_and_duplicate_tags() {
        struct Quiet;
        impl Application for Quiet {
            fn notify(&self, _predecessor: &NodeId, _me: &NodeId) {}
            fn message(&self, _from: &str, _payload: &[u8]) -> Vec<u8> {
                Vec::new()
            }
        }

        let node = ChordNode::new("127.0.0.1:8001", NullNetwork);
        assert!(!node.register(1, Arc::new(Quiet)).await);
        assert!(node.register(2, Arc::new(Quiet)).await);
        assert!(!node.register(2, Arc::new(Quiet)).await);
    }

    #[tokio::test]
    async fn clearing_the_predecessor_skips_notify_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(Arc<AtomicUsize>);
        impl Application for Counting {
            fn notify(&self, _predecessor: &NodeId, _me: &NodeId) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn message(&self, _from: &str, _payload: &[u8]) -> Vec<u8> {
                Vec::new()
            }
        }

        let node = ChordNode::new("127.0.0.1:8001", NullNetwork);
        let count = Arc::new(AtomicUsize::new(0));
        assert!(node.register(2, Arc::new(Counting(count.clone()))).await);

        node.set_predecessor(Finger::new(id_from_byte(7), "127.0.0.1:8002".into()))
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        node.set_predecessor(Finger::unset()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_listings_deduplicate_repeated_addresses() {
        let node = ChordNode::new("127.0.0.1:8001", NullNetwork);
        let peer = Finger::new(id_from_byte(9), "127.0.0.1:8002".into());
        node.set_successor(peer.clone()).await;
        node.set_finger(2, peer.clone()).await;
        node.set_finger(3, peer.clone()).await;

        let listing = node.show_fingers().await;
        let peer_lines = listing
            .lines()
            .filter(|line| *line == "127.0.0.1:8002")
            .count();
        assert_eq!(peer_lines, 1);
        assert!(listing.contains("total fingers set: 4"));

        let successors = node.show_succ().await;
        assert_eq!(successors.lines().next(), Some("127.0.0.1:8002"));
        assert_eq!(successors.lines().count(), 1);
    }

    #[tokio::test]
    async fn first_claim_bootstraps_the_successor() {
        let node = ChordNode::new("127.0.0.1:8001", NullNetwork);
        let claimant = Finger::new(id_from_byte(42), "127.0.0.1:8002".into());
        node.claim_candidate(claimant.clone()).await;

        assert_eq!(node.predecessor().await, claimant);
        assert_eq!(node.successor().await, claimant);
    }
}
