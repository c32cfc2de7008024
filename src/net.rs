//! TCP transport with a per-peer connection cache.
//!
//! Outbound exchanges reuse one cached stream per peer. Every fresh stream
//! is granted an absolute idle deadline; once it passes, the stream is
//! discarded and the next exchange dials anew. A write failure on a cached
//! stream (the usual way a stale connection surfaces) triggers exactly one
//! redial; nothing else is retried here, since each caller has its own
//! fallback (successor list, next finger).

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::debug;

use crate::core::ChordNetwork;
use crate::framing::{read_frame, write_frame};
use crate::protocol::{self, Envelope};

/// Idle lifetime granted to each fresh outbound stream.
const STREAM_TTL: Duration = Duration::from_secs(120);

struct CachedStream {
    stream: TcpStream,
    expires: Instant,
}

/// Connection-cached request/reply transport over TCP.
///
/// The cached stream is taken out of the map for the duration of a round
/// trip, so concurrent exchanges with the same peer each get their own
/// stream and only the last one returned stays cached.
#[derive(Default)]
pub struct TcpNetwork {
    connections: tokio::sync::Mutex<HashMap<String, CachedStream>>,
}

impl TcpNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    async fn dial(addr: &str) -> Result<CachedStream> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("dialing {addr}"))?;
        Ok(CachedStream {
            stream,
            expires: Instant::now() + STREAM_TTL,
        })
    }

    async fn send_request(conn: &mut CachedStream, bytes: &[u8]) -> Result<()> {
        timeout_at(conn.expires, write_frame(&mut conn.stream, bytes))
            .await
            .map_err(|_| anyhow!("stream deadline exceeded during write"))?
    }

    async fn read_reply(conn: &mut CachedStream) -> Result<Vec<u8>> {
        let frame = timeout_at(conn.expires, read_frame(&mut conn.stream))
            .await
            .map_err(|_| anyhow!("stream deadline exceeded during read"))??;
        match frame {
            Some(reply) => Ok(reply),
            None => bail!("peer closed the stream before replying"),
        }
    }
}

#[async_trait]
impl ChordNetwork for TcpNetwork {
    async fn exchange(&self, addr: &str, msg: &Envelope) -> Result<Envelope> {
        let bytes = protocol::encode(msg)?;

        let cached = { self.connections.lock().await.remove(addr) };
        let mut conn = match cached {
            Some(conn) if Instant::now() < conn.expires => conn,
            _ => Self::dial(addr).await?,
        };

        if let Err(err) = Self::send_request(&mut conn, &bytes).await {
            debug!(peer = addr, "write on cached stream failed ({err:#}); redialing");
            conn = Self::dial(addr).await?;
            Self::send_request(&mut conn, &bytes).await?;
        }

        let reply = Self::read_reply(&mut conn).await?;
        let reply = protocol::decode(&reply)
            .with_context(|| format!("malformed reply from {addr}"))?;

        // only a stream that completed a clean round trip goes back in the cache
        self.connections.lock().await.insert(addr.to_string(), conn);
        Ok(reply)
    }

    async fn close(&self) {
        self.connections.lock().await.clear();
    }
}
