//! Dispatcher - sessions, room registry and message routing
//!
//! The dispatcher is the single owner of every room and of the
//! connection -> room index. It is driven from one execution context (the
//! scheduler task), so neither map needs a lock and the two always change
//! together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::{ConnId, InputCommand, PlayerState, Room, RoomId};
use crate::util::time::Clock;
use crate::ws::protocol::{ClientMsg, ServerMsg, SystemNotice, WorldInfo};

/// Longest display name kept, in characters
pub const MAX_NAME_CHARS: usize = 24;
/// Longest chat line relayed, in characters
pub const MAX_CHAT_CHARS: usize = 200;
/// Minimum distance between a spawn point and any world edge
pub const SPAWN_MARGIN: f64 = 20.0;

/// Outbound channel of a single connection
pub type Outbox = mpsc::UnboundedSender<ServerMsg>;

/// Everything the dispatcher reacts to
#[derive(Debug)]
pub enum DispatchEvent {
    Connect { conn_id: ConnId, outbox: Outbox },
    Message { conn_id: ConnId, msg: ClientMsg },
    Disconnect { conn_id: ConnId },
}

/// Counters readable from outside the dispatcher's context
#[derive(Debug, Default)]
pub struct RegistryStats {
    connections: AtomicUsize,
    rooms: AtomicUsize,
    players: AtomicUsize,
}

impl RegistryStats {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn rooms(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    pub fn players(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }
}

/// Session-scoped state of one connection
#[derive(Debug)]
struct Session {
    name: Option<String>,
    outbox: Outbox,
}

/// Routes client messages, owns rooms, drives ticks
pub struct Dispatcher {
    config: GameConfig,
    clock: Arc<dyn Clock>,
    rng: ChaCha8Rng,
    sessions: HashMap<ConnId, Session>,
    /// Creation order; first-fit assignment scans it front to back
    rooms: Vec<Room>,
    conn_rooms: HashMap<ConnId, RoomId>,
    last_tick_ms: u64,
    stats: Arc<RegistryStats>,
}

impl Dispatcher {
    pub fn new(config: GameConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(config, clock, ChaCha8Rng::from_entropy())
    }

    /// Dispatcher with reproducible spawn positions
    pub fn with_seed(config: GameConfig, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(config, clock, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, clock: Arc<dyn Clock>, rng: ChaCha8Rng) -> Self {
        let last_tick_ms = clock.now_millis();
        Self {
            config,
            clock,
            rng,
            sessions: HashMap::new(),
            rooms: Vec::new(),
            conn_rooms: HashMap::new(),
            last_tick_ms,
            stats: Arc::new(RegistryStats::default()),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<RegistryStats> {
        self.stats.clone()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id() == room_id)
    }

    /// Room the connection currently belongs to
    pub fn room_of(&self, conn_id: &ConnId) -> Option<&Room> {
        self.conn_rooms
            .get(conn_id)
            .and_then(|room_id| self.room(room_id))
    }

    pub fn is_connected(&self, conn_id: &ConnId) -> bool {
        self.sessions.contains_key(conn_id)
    }

    /// Restart tick delta measurement from now
    pub fn reset_clock(&mut self) {
        self.last_tick_ms = self.clock.now_millis();
    }

    pub fn handle(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Connect { conn_id, outbox } => self.connect(conn_id, outbox),
            DispatchEvent::Message { conn_id, msg } => self.handle_message(conn_id, msg),
            DispatchEvent::Disconnect { conn_id } => self.disconnect(conn_id),
        }
    }

    /// Register a connection. No room is assigned yet.
    pub fn connect(&mut self, conn_id: ConnId, outbox: Outbox) {
        self.sessions.insert(conn_id, Session { name: None, outbox });
        info!(conn_id = %conn_id, "Connection registered");
        self.publish_stats();
    }

    pub fn handle_message(&mut self, conn_id: ConnId, msg: ClientMsg) {
        if !self.sessions.contains_key(&conn_id) {
            debug!(conn_id = %conn_id, "Message from unregistered connection ignored");
            return;
        }

        match msg {
            ClientMsg::Identify { name } => self.identify(conn_id, name.as_deref()),
            ClientMsg::Rename { name } => self.rename(conn_id, name.as_deref()),
            ClientMsg::Join => self.join(conn_id),
            ClientMsg::Input(input) => self.submit_input(conn_id, input),
            ClientMsg::Chat { message } => self.chat(conn_id, message.as_deref()),
            ClientMsg::Ping { token } => self.ping(conn_id, token),
            ClientMsg::Leave => self.leave(conn_id),
        }
    }

    /// Drop the connection, leaving its room first
    pub fn disconnect(&mut self, conn_id: ConnId) {
        self.leave(conn_id);
        if self.sessions.remove(&conn_id).is_some() {
            info!(conn_id = %conn_id, "Connection closed");
        }
        self.publish_stats();
    }

    fn identify(&mut self, conn_id: ConnId, name: Option<&str>) {
        let name = name
            .and_then(sanitize_name)
            .unwrap_or_else(|| guest_name(&conn_id));

        let Some(session) = self.sessions.get_mut(&conn_id) else {
            return;
        };
        session.name = Some(name.clone());

        let reply = ServerMsg::IdentifyOk {
            id: conn_id,
            name,
            tick_rate: self.config.tick_rate,
            snapshot_rate: self.config.snapshot_rate,
            world: WorldInfo {
                width: self.config.world.width,
                height: self.config.world.height,
            },
        };
        self.send_to(&conn_id, reply);
    }

    fn rename(&mut self, conn_id: ConnId, name: Option<&str>) {
        let Some(new_name) = name.and_then(sanitize_name) else {
            return;
        };
        let old_name = self.display_name(&conn_id);
        if let Some(session) = self.sessions.get_mut(&conn_id) {
            session.name = Some(new_name.clone());
        }

        let Some(idx) = self.room_index_of(&conn_id) else {
            return;
        };
        self.rooms[idx].set_player_name(&conn_id, &new_name);
        self.broadcast(
            idx,
            ServerMsg::System(SystemNotice::Rename {
                player_id: conn_id,
                old_name,
                new_name,
            }),
        );
    }

    /// Place the connection in the first room with spare capacity, creating
    /// one when every room is full. A connection whose own room is the first
    /// fit is re-spawned in place; one bound elsewhere leaves its room first.
    fn join(&mut self, conn_id: ConnId) {
        if let Some(current) = self.room_index_of(&conn_id) {
            if self.first_fit() != Some(current) {
                self.leave(conn_id);
            }
        }

        let idx = self.find_or_create_room();
        let name = self.display_name(&conn_id);
        let (x, y) = self.spawn_point();
        let player = PlayerState::new(conn_id, name.clone(), x, y, self.config.player_speed);

        let room = &mut self.rooms[idx];
        room.add_player(player);
        let room_id = room.id().to_string();
        let count = room.player_count();
        self.conn_rooms.insert(conn_id, room_id.clone());

        self.broadcast(idx, ServerMsg::System(SystemNotice::Count { count }));
        self.send_to(
            &conn_id,
            ServerMsg::Joined {
                room_id: room_id.clone(),
            },
        );
        self.broadcast(
            idx,
            ServerMsg::System(SystemNotice::Join {
                player_id: conn_id,
                name,
            }),
        );

        info!(room_id = %room_id, conn_id = %conn_id, player_count = count, "Player joined room");
        self.publish_stats();
    }

    fn submit_input(&mut self, conn_id: ConnId, input: InputCommand) {
        if let Some(idx) = self.room_index_of(&conn_id) {
            self.rooms[idx].enqueue_input(&conn_id, input);
        }
    }

    fn chat(&mut self, conn_id: ConnId, message: Option<&str>) {
        let Some(message) = message.filter(|m| !m.trim().is_empty()) else {
            return;
        };
        let Some(idx) = self.room_index_of(&conn_id) else {
            return;
        };

        let msg = ServerMsg::Chat {
            sender_id: conn_id,
            sender_name: self.display_name(&conn_id),
            message: message.chars().take(MAX_CHAT_CHARS).collect(),
        };
        self.broadcast(idx, msg);
    }

    fn ping(&self, conn_id: ConnId, token: Value) {
        self.send_to(&conn_id, ServerMsg::Pong { token });
    }

    /// Remove the connection from its room. Empty rooms are deleted at once.
    fn leave(&mut self, conn_id: ConnId) {
        let Some(room_id) = self.conn_rooms.remove(&conn_id) else {
            return;
        };
        let Some(idx) = self.rooms.iter().position(|r| r.id() == room_id) else {
            return;
        };

        let room = &mut self.rooms[idx];
        room.remove_player(&conn_id);
        let count = room.player_count();

        self.broadcast(idx, ServerMsg::System(SystemNotice::Count { count }));
        self.broadcast(
            idx,
            ServerMsg::System(SystemNotice::Leave { player_id: conn_id }),
        );
        info!(room_id = %room_id, conn_id = %conn_id, player_count = count, "Player left room");

        if self.rooms[idx].is_empty() {
            self.rooms.remove(idx);
            info!(room_id = %room_id, "Room deleted (empty)");
        }
        self.publish_stats();
    }

    /// One global simulation step over every room, in registry order
    pub fn tick(&mut self) {
        let now = self.clock.now_millis();
        let dt = now.saturating_sub(self.last_tick_ms) as f64 / 1000.0;
        self.last_tick_ms = now;

        for room in &mut self.rooms {
            if let Some(snapshot) = room.update(dt, now) {
                for member in room.member_ids() {
                    deliver(&self.sessions, &member, snapshot.clone());
                }
            }
        }
    }

    fn first_fit(&self) -> Option<usize> {
        let cap = self.config.max_players_per_room;
        self.rooms.iter().position(|r| r.player_count() < cap)
    }

    fn find_or_create_room(&mut self) -> usize {
        if let Some(idx) = self.first_fit() {
            return idx;
        }

        let room_id = self.new_room_id();
        info!(room_id = %room_id, "Room created");
        self.rooms.push(Room::new(
            room_id,
            self.config.world,
            self.config.snapshot_interval_ms(),
        ));
        self.rooms.len() - 1
    }

    fn new_room_id(&self) -> RoomId {
        loop {
            let id: RoomId = Uuid::new_v4().simple().to_string()[..8].to_string();
            if self.room(&id).is_none() {
                return id;
            }
        }
    }

    fn spawn_point(&mut self) -> (f64, f64) {
        let width = self.config.world.width as f64;
        let height = self.config.world.height as f64;
        let x = self.rng.gen::<f64>() * (width - 2.0 * SPAWN_MARGIN).max(0.0) + SPAWN_MARGIN;
        let y = self.rng.gen::<f64>() * (height - 2.0 * SPAWN_MARGIN).max(0.0) + SPAWN_MARGIN;
        (x.min(width), y.min(height))
    }

    fn room_index_of(&self, conn_id: &ConnId) -> Option<usize> {
        let room_id = self.conn_rooms.get(conn_id)?;
        self.rooms.iter().position(|r| r.id() == room_id)
    }

    fn display_name(&self, conn_id: &ConnId) -> String {
        self.sessions
            .get(conn_id)
            .and_then(|s| s.name.clone())
            .unwrap_or_else(|| guest_name(conn_id))
    }

    fn send_to(&self, conn_id: &ConnId, msg: ServerMsg) {
        deliver(&self.sessions, conn_id, msg);
    }

    fn broadcast(&self, room_idx: usize, msg: ServerMsg) {
        for member in self.rooms[room_idx].member_ids() {
            deliver(&self.sessions, &member, msg.clone());
        }
    }

    fn publish_stats(&self) {
        self.stats
            .connections
            .store(self.sessions.len(), Ordering::Relaxed);
        self.stats.rooms.store(self.rooms.len(), Ordering::Relaxed);
        self.stats.players.store(
            self.rooms.iter().map(Room::player_count).sum(),
            Ordering::Relaxed,
        );
    }
}

fn deliver(sessions: &HashMap<ConnId, Session>, conn_id: &ConnId, msg: ServerMsg) {
    if let Some(session) = sessions.get(conn_id) {
        if session.outbox.send(msg).is_err() {
            debug!(conn_id = %conn_id, "Send to closed connection dropped");
        }
    }
}

/// Trim and cap a display name; `None` when nothing is left
pub fn sanitize_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NAME_CHARS).collect())
}

/// Fallback name derived from the connection id
pub fn guest_name(conn_id: &ConnId) -> String {
    let id = conn_id.to_string();
    format!("Guest-{}", &id[..5])
}
