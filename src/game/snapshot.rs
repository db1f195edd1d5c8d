//! Snapshot cadence and construction

use crate::ws::protocol::{PlayerSnapshot, ServerMsg};

use super::PlayerState;

/// Decides when a room is due for a snapshot and builds it.
///
/// Cadence is wall-clock based and independent of the tick rate. A late tick
/// that spans several intervals still yields a single snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    /// Minimum milliseconds between snapshots
    interval_ms: f64,
    /// Wall-clock time of the last snapshot, 0 before the first one
    last_sent_ms: u64,
}

impl SnapshotBuilder {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms,
            last_sent_ms: 0,
        }
    }

    /// Check if it's time to send a snapshot, and mark it sent if so
    pub fn should_send(&mut self, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.last_sent_ms) as f64;
        if elapsed >= self.interval_ms {
            self.last_sent_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Build a snapshot message
    pub fn build(&self, room_id: &str, now_ms: u64, players: &[PlayerState]) -> ServerMsg {
        ServerMsg::State {
            room_id: room_id.to_string(),
            t: now_ms,
            players: players.iter().map(player_snapshot).collect(),
        }
    }
}

fn player_snapshot(p: &PlayerState) -> PlayerSnapshot {
    PlayerSnapshot {
        id: p.id,
        name: p.name.clone(),
        x: round2(p.x),
        y: round2(p.y),
        vx: round2(p.vel_x),
        vy: round2(p.vel_y),
        last_seq: p.last_seq,
    }
}

/// Round to two decimals, halves toward positive infinity
pub fn round2(v: f64) -> f64 {
    (v * 100.0 + 0.5).floor() / 100.0
}
