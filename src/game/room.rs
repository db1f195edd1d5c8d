//! Room state and the per-room simulation step

use std::collections::VecDeque;

use tracing::debug;

use crate::config::WorldBounds;
use crate::ws::protocol::ServerMsg;

use super::physics::PhysicsSystem;
use super::snapshot::SnapshotBuilder;
use super::{ConnId, InputCommand, RoomId};

/// Player state in a room (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: ConnId,
    pub name: String,

    // Position and movement
    pub x: f64,
    pub y: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub speed: f64,

    /// Sequence of the most recently processed input, not the highest seen
    pub last_seq: i32,
    /// Inputs received since the last tick, oldest first
    pub pending: VecDeque<InputCommand>,
}

impl PlayerState {
    pub fn new(id: ConnId, name: String, spawn_x: f64, spawn_y: f64, speed: f64) -> Self {
        Self {
            id,
            name,
            x: spawn_x,
            y: spawn_y,
            vel_x: 0.0,
            vel_y: 0.0,
            speed,
            last_seq: 0,
            pending: VecDeque::new(),
        }
    }

    /// Apply every queued input in arrival order.
    ///
    /// An empty queue leaves position and velocity untouched; there is no decay.
    fn drain_inputs(&mut self, tick_dt: f64, bounds: WorldBounds) {
        while let Some(input) = self.pending.pop_front() {
            let (vel_x, vel_y) = PhysicsSystem::velocity(&input, self.speed);
            self.vel_x = vel_x;
            self.vel_y = vel_y;

            let step = PhysicsSystem::step_length(&input, tick_dt);
            let (x, y) = PhysicsSystem::integrate(self.x, self.y, vel_x, vel_y, step, bounds);
            self.x = x;
            self.y = y;

            self.last_seq = input.seq;
        }
    }
}

/// A bounded group of players sharing one world and one snapshot stream.
///
/// Capacity is enforced by the dispatcher's assignment policy, not here.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    bounds: WorldBounds,
    /// Join order is snapshot order
    players: Vec<PlayerState>,
    snapshots: SnapshotBuilder,
}

impl Room {
    pub fn new(id: RoomId, bounds: WorldBounds, snapshot_interval_ms: f64) -> Self {
        Self {
            id,
            bounds,
            players: Vec::new(),
            snapshots: SnapshotBuilder::new(snapshot_interval_ms),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn players(&self) -> &[PlayerState] {
        &self.players
    }

    pub fn player(&self, id: &ConnId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == *id)
    }

    fn player_mut(&mut self, id: &ConnId) -> Option<&mut PlayerState> {
        self.players.iter_mut().find(|p| p.id == *id)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.players.iter().map(|p| p.id)
    }

    /// Add a player. A player already present under the same id is replaced in place.
    pub fn add_player(&mut self, player: PlayerState) {
        match self.player_mut(&player.id) {
            Some(existing) => *existing = player,
            None => self.players.push(player),
        }
    }

    pub fn remove_player(&mut self, id: &ConnId) -> Option<PlayerState> {
        let idx = self.players.iter().position(|p| p.id == *id)?;
        Some(self.players.remove(idx))
    }

    /// Returns the previous name when the player exists
    pub fn set_player_name(&mut self, id: &ConnId, name: &str) -> Option<String> {
        let player = self.player_mut(id)?;
        Some(std::mem::replace(&mut player.name, name.to_string()))
    }

    /// Queue an input for the next tick. No-op for unknown players.
    ///
    /// The queue is unbounded: a stalled or bursty client can grow it without limit.
    pub fn enqueue_input(&mut self, id: &ConnId, input: InputCommand) -> bool {
        match self.player_mut(id) {
            Some(player) => {
                player.pending.push_back(input);
                true
            }
            None => false,
        }
    }

    /// Run one simulation step and return a snapshot if one is due
    pub fn update(&mut self, tick_dt: f64, now_ms: u64) -> Option<ServerMsg> {
        for player in &mut self.players {
            player.drain_inputs(tick_dt, self.bounds);
        }

        if self.snapshots.should_send(now_ms) {
            debug!(room_id = %self.id, player_count = self.players.len(), "Snapshot due");
            Some(self.snapshots.build(&self.id, now_ms, &self.players))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const BOUNDS: WorldBounds = WorldBounds {
        width: 1000,
        height: 600,
    };

    fn room() -> Room {
        Room::new("r1".to_string(), BOUNDS, 1000.0 / 15.0)
    }

    fn right(seq: i32, dt: f64) -> InputCommand {
        InputCommand {
            seq,
            right: true,
            dt,
            ..InputCommand::default()
        }
    }

    #[test]
    fn input_moves_player_on_update() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 100.0, 100.0, 220.0));

        assert!(room.enqueue_input(&id, right(1, 0.1)));
        // not applied until the tick
        assert_eq!(room.player(&id).unwrap().x, 100.0);

        room.update(0.033, 10_000);
        let p = room.player(&id).unwrap();
        assert!((p.x - 122.0).abs() < 1e-9);
        assert_eq!(p.y, 100.0);
        assert_eq!(p.vel_x, 220.0);
        assert_eq!(p.vel_y, 0.0);
        assert_eq!(p.last_seq, 1);
        assert!(p.pending.is_empty());
    }

    #[test]
    fn whole_queue_is_drained_in_order() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 100.0, 100.0, 100.0));

        room.enqueue_input(&id, right(5, 0.1));
        room.enqueue_input(&id, right(3, 0.1));
        room.enqueue_input(
            &id,
            InputCommand {
                seq: 4,
                down: true,
                dt: 0.2,
                ..InputCommand::default()
            },
        );

        room.update(0.033, 10_000);
        let p = room.player(&id).unwrap();
        assert!((p.x - 120.0).abs() < 1e-9);
        assert!((p.y - 120.0).abs() < 1e-9);
        assert_eq!((p.vel_x, p.vel_y), (0.0, 100.0));
        // last processed wins, even though 5 was seen earlier
        assert_eq!(p.last_seq, 4);
    }

    #[test]
    fn zero_dt_uses_tick_delta() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 100.0, 100.0, 200.0));

        room.enqueue_input(&id, right(1, 0.0));
        room.update(0.05, 10_000);
        assert!((room.player(&id).unwrap().x - 110.0).abs() < 1e-9);
    }

    #[test]
    fn idle_player_keeps_velocity_and_position() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 100.0, 100.0, 220.0));

        room.enqueue_input(&id, right(1, 0.1));
        room.update(0.033, 10_000);
        let before = room.player(&id).unwrap().x;

        room.update(0.033, 10_033);
        room.update(0.033, 10_066);
        let p = room.player(&id).unwrap();
        assert_eq!(p.x, before);
        assert_eq!(p.vel_x, 220.0);
    }

    #[test]
    fn left_at_edge_clamps_to_zero() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 0.0, 300.0, 220.0));

        room.enqueue_input(
            &id,
            InputCommand {
                seq: 1,
                left: true,
                dt: 1.0,
                ..InputCommand::default()
            },
        );
        room.update(0.033, 10_000);
        assert_eq!(room.player(&id).unwrap().x, 0.0);
    }

    #[test]
    fn snapshot_follows_its_own_cadence() {
        let mut room = room();
        room.add_player(PlayerState::new(Uuid::new_v4(), "a".to_string(), 1.0, 1.0, 220.0));

        assert!(room.update(0.033, 10_000).is_some());
        assert!(room.update(0.033, 10_033).is_none());
        assert!(room.update(0.033, 10_067).is_some());
        assert!(room.update(0.033, 10_100).is_none());
    }

    #[test]
    fn operations_on_removed_player_are_noops() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 1.0, 1.0, 220.0));

        assert!(room.remove_player(&id).is_some());
        assert!(room.remove_player(&id).is_none());
        assert!(!room.enqueue_input(&id, right(1, 0.1)));
        assert!(room.set_player_name(&id, "Bob").is_none());
        assert!(room.is_empty());
    }

    #[test]
    fn rename_returns_old_name() {
        let mut room = room();
        let id = Uuid::new_v4();
        room.add_player(PlayerState::new(id, "Ann".to_string(), 1.0, 1.0, 220.0));

        assert_eq!(room.set_player_name(&id, "Bob").as_deref(), Some("Ann"));
        assert_eq!(room.player(&id).unwrap().name, "Bob");
    }
}
