use crate::config::ServerConfig;
use crate::error::ReconcileError;
use crate::registry::BrickRegistry;
use cmd_lib::*;
use std::time::{Duration, Instant};

/// Records older than this are still used but flagged, since the peer may be gone.
const STALE_RECORD_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBricks {
    pub peer: String,
    pub bricks: Vec<String>,
}

/// Bricks of every declared peer, in peer declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrickLayout {
    pub peers: Vec<PeerBricks>,
    /// Declared peers that have not published a brick record yet.
    pub missing: Vec<String>,
}

impl BrickLayout {
    pub fn brick_count(&self) -> usize {
        self.peers.iter().map(|p| p.bricks.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// This node's bricks for a volume: one brick per volume per server.
pub fn plan_bricks(server: &ServerConfig, volume: &str) -> Vec<String> {
    vec![server.brick_path(volume).display().to_string()]
}

pub fn aggregate_bricks(
    registry: &dyn BrickRegistry,
    volume: &str,
    peers: &[String],
) -> Result<BrickLayout, ReconcileError> {
    let mut layout = BrickLayout::default();
    for peer in peers {
        match registry.lookup(volume, peer)? {
            Some(record) if !record.bricks.is_empty() => {
                let age = record.age_secs();
                if age > STALE_RECORD_SECS {
                    warn!("Bricks of peer {peer} for volume {volume} were registered {age}s ago");
                } else {
                    debug!(
                        "Peer {peer} registered {} brick(s) for volume {volume}",
                        record.bricks.len()
                    );
                }
                layout.peers.push(PeerBricks {
                    peer: peer.clone(),
                    bricks: record.bricks,
                });
            }
            _ => {
                warn!("No bricks found for volume {volume} from peer {peer}");
                layout.missing.push(peer.clone());
            }
        }
    }
    Ok(layout)
}

/// Aggregates repeatedly until every declared peer has published its
/// bricks or `timeout` elapses; returns the last layout either way.
pub fn await_peer_bricks(
    registry: &dyn BrickRegistry,
    volume: &str,
    peers: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<BrickLayout, ReconcileError> {
    let start = Instant::now();
    loop {
        let layout = aggregate_bricks(registry, volume, peers)?;
        if layout.is_complete() || start.elapsed() >= timeout {
            return Ok(layout);
        }
        info!(
            "Volume {volume}: waiting for {} of {} peer(s) to register bricks",
            layout.missing.len(),
            peers.len()
        );
        std::thread::sleep(poll_interval);
    }
}
