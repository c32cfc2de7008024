//! Listener, per-connection handlers, and the inbound RPC dispatcher.
//!
//! [`create`] and [`join`] are the lifecycle entry points: they build a
//! [`ChordNode`] over TCP, bind its listener, and start the maintenance
//! loop. Each accepted stream gets its own handler task that reads framed
//! messages until EOF, hands them to [`dispatch`], and writes the reply
//! back. `dispatch` is also the seam the in-memory test transport drives,
//! so mock rings exercise the same command handling as real ones.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, trace, warn};

use crate::core::{ChordNetwork, ChordNode, Finger, CHORD_PROTO};
use crate::framing::{read_frame, write_frame};
use crate::net::TcpNetwork;
use crate::protocol::{self, Command, Envelope};

/// Idle lifetime granted to each accepted stream.
const HANDLER_TTL: Duration = Duration::from_secs(180);

/// Start a new ring of one: bind the listener on `addr`, start maintenance,
/// and return the node. A bind failure is fatal and surfaces here.
pub async fn create(addr: &str) -> Result<Arc<ChordNode<TcpNetwork>>> {
    let node = ChordNode::new(addr, TcpNetwork::new());
    let listener = listen(node.clone(), addr).await?;
    node.track_task(listener).await;
    node.clone().start_maintenance().await;
    Ok(node)
}

/// Start a node on `addr` and join the ring that `bootstrap` belongs to. On
/// a failed join the half-started node is finalized before the error is
/// returned.
pub async fn join(addr: &str, bootstrap: &str) -> Result<Arc<ChordNode<TcpNetwork>>> {
    let node = create(addr).await?;
    if let Err(err) = node.bootstrap(bootstrap).await {
        node.finalize().await;
        return Err(err.context(format!("joining the ring via {bootstrap}")));
    }
    Ok(node)
}

/// Bind `addr` and spawn the accept loop, returning its task handle.
pub async fn listen<N: ChordNetwork>(
    node: Arc<ChordNode<N>>,
    addr: &str,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding listener on {addr}"))?;
    debug!(node = %node.addr(), "listening");
    Ok(tokio::spawn(accept_loop(node, listener)))
}

async fn accept_loop<N: ChordNetwork>(node: Arc<ChordNode<N>>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(node.clone(), stream, peer.to_string()));
            }
            Err(err) => {
                warn!(node = %node.addr(), "accept failed: {err}");
            }
        }
    }
}

/// Serve one inbound stream: read frames until EOF, error, or the idle
/// deadline, dispatching each message and writing back the reply. The
/// stream closes when the handler returns, on every exit path.
pub async fn handle_connection<N: ChordNetwork>(
    node: Arc<ChordNode<N>>,
    mut stream: TcpStream,
    peer: String,
) {
    let deadline = Instant::now() + HANDLER_TTL;
    loop {
        let frame = match timeout_at(deadline, read_frame(&mut stream)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break, // clean EOF
            Ok(Err(err)) => {
                debug!(%peer, "read failed: {err:#}");
                break;
            }
            Err(_) => {
                trace!(%peer, "handler idle deadline reached");
                break;
            }
        };

        let message = match protocol::decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                // a peer speaking garbage is treated like a failed peer
                debug!(%peer, "malformed message: {err:#}");
                break;
            }
        };

        let Some(reply) = dispatch(&node, message, &peer).await else {
            continue;
        };
        let bytes = match protocol::encode(&reply) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(%peer, "encoding reply failed: {err:#}");
                break;
            }
        };
        match timeout_at(deadline, write_frame(&mut stream, &bytes)).await {
            Ok(Ok(())) => {}
            _ => break,
        }
    }
}

/// Map one inbound message to a reply against the node's routing state.
///
/// `None` means the message produces no reply: an unknown command, an
/// unexpected one, or a foreign protocol tag nobody registered for. The
/// sender sees that as a transport timeout and falls back on its own.
pub async fn dispatch<N: ChordNetwork>(
    node: &ChordNode<N>,
    message: Envelope,
    peer: &str,
) -> Option<Envelope> {
    if message.proto != CHORD_PROTO {
        return dispatch_application(node, message, peer).await;
    }

    let body = message.chord?;
    let Some(cmd) = Command::from_wire(body.cmd) else {
        debug!(peer, cmd = body.cmd, "unknown command");
        return None;
    };
    trace!(peer, ?cmd, "dispatching");

    match cmd {
        Command::Ping => Some(Envelope::pong()),
        Command::GetId => Some(Envelope::send_id(*node.id())),
        Command::GetFingers => Some(Envelope::send_fingers(
            Command::GetFingers,
            &node.finger_list().await,
        )),
        Command::GetSucc => Some(Envelope::send_fingers(
            Command::GetSucc,
            &node.successor_list().await,
        )),
        Command::GetPred => {
            let predecessor = node.predecessor().await;
            if predecessor.is_unset() {
                Some(Envelope::null())
            } else {
                Some(Envelope::send_pred(&predecessor))
            }
        }
        Command::ClaimPred => {
            if let Some(candidate) = body.pred.map(Finger::from) {
                node.claim_candidate(candidate).await;
            }
            Some(Envelope::null())
        }
        Command::Pong => {
            debug!(peer, "unsolicited pong");
            None
        }
    }
}

async fn dispatch_application<N: ChordNetwork>(
    node: &ChordNode<N>,
    message: Envelope,
    peer: &str,
) -> Option<Envelope> {
    let Ok(tag) = u8::try_from(message.proto) else {
        debug!(peer, proto = message.proto, "protocol tag out of range");
        return None;
    };
    match node.application(tag).await {
        Some(app) => {
            let reply = app.message(peer, message.payload.as_deref().unwrap_or_default());
            Some(Envelope::application(message.proto, reply))
        }
        None => {
            debug!(peer, proto = message.proto, "no application registered; dropping message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash_address;

    fn test_node() -> Arc<ChordNode<TcpNetwork>> {
        ChordNode::new("127.0.0.1:9001", TcpNetwork::new())
    }

    #[tokio::test]
    async fn ping_earns_a_pong() {
        let node = test_node();
        let reply = dispatch(&node, Envelope::ping(), "peer").await.unwrap();
        assert!(protocol::parse_pong(&reply));
    }

    #[tokio::test]
    async fn get_id_returns_the_hash_of_our_address() {
        let node = test_node();
        let reply = dispatch(&node, Envelope::get_id(), "peer").await.unwrap();
        assert_eq!(
            protocol::parse_id(&reply).unwrap(),
            hash_address("127.0.0.1:9001")
        );
    }

    #[tokio::test]
    async fn get_pred_is_null_until_someone_claims() {
        let node = test_node();
        let reply = dispatch(&node, Envelope::get_pred(), "peer").await.unwrap();
        assert_eq!(protocol::parse_pred(&reply).unwrap(), None);

        let claimant = Finger::new(hash_address("127.0.0.1:9002"), "127.0.0.1:9002".into());
        let ack = dispatch(&node, Envelope::claim_pred(&claimant), "peer")
            .await
            .unwrap();
        assert_eq!(protocol::parse_pred(&ack).unwrap(), None); // null acknowledgement

        let reply = dispatch(&node, Envelope::get_pred(), "peer").await.unwrap();
        assert_eq!(
            protocol::parse_pred(&reply).unwrap().unwrap().addr,
            "127.0.0.1:9002"
        );
    }

    #[tokio::test]
    async fn get_fingers_leads_with_self() {
        let node = test_node();
        let reply = dispatch(&node, Envelope::get_fingers(), "peer")
            .await
            .unwrap();
        let fingers = protocol::parse_fingers(&reply).unwrap();
        assert_eq!(fingers[0].addr, "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn foreign_protocol_without_application_is_dropped() {
        let node = test_node();
        let reply = dispatch(&node, Envelope::application(7, b"hi".to_vec()), "peer").await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn unsolicited_pong_is_dropped() {
        let node = test_node();
        assert!(dispatch(&node, Envelope::pong(), "peer").await.is_none());
    }
}
