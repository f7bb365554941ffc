//! Simulation context
//!
//! `Simulation` owns everything a tick touches: the entity registry, the
//! spatial grid, AI controllers and per-client views. There is no global
//! state; embedders create as many independent arenas as they want and
//! drive each with `tick()`. The tick pipeline is fixed:
//!
//! 1. apply staged client commands (inputs, spawn requests)
//! 2. acceleration from client and AI input state
//! 3. movement integration and spatial refresh
//! 4. collision response and AI target acquisition
//! 5. camera follow and per-view synchronization
//! 6. deletion finalization (ids are freed only here)
//!
//! Synchronization runs before finalization so every view observes the
//! deletion of an entity on the same tick it dies, never a reused id
//! wearing stale state.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::game::constants::ai::DEFAULT_VIEW_RANGE;
use crate::game::fields::{
    arena_fields, camera, name_fields, physics as physics_fields, relations, FieldValue, GroupId,
    WireString,
};
use crate::game::registry::{EntityId, EntityKind, EntityRegistry, NULL_ENTITY};
use crate::game::spatial::{Aabb, SpatialGrid};
use crate::game::systems::ai::{Ai, AiManager};
use crate::game::systems::physics;
use crate::net::input::{decode_client_packet, ClientCommand, InputState};
use crate::net::sync::{synchronize, ClientView};
use crate::util::vec2::Vec2;

/// Transport-level connection id
pub type ClientId = u32;

/// Footprint radius for freshly spawned tanks
const TANK_SPAWN_SIZE: f32 = 50.0;

/// Footprint radius for polygon shapes
const SHAPE_SPAWN_SIZE: f32 = 25.0;

/// Per-connection state inside the simulation
struct Client {
    view: ClientView,
    camera: EntityId,
    /// Controlled tank; `NULL_ENTITY` while spectating or between deaths
    tank: EntityId,
    input: InputState,
    /// Display name from a staged spawn request, consumed next tick
    pending_spawn: Option<WireString>,
}

/// Aggregate counters for one tick
#[derive(Debug, Default, Clone)]
pub struct TickStats {
    pub tick: u64,
    pub entities: usize,
    pub clients: usize,
}

/// One self-contained arena
pub struct Simulation {
    config: SimConfig,
    registry: EntityRegistry,
    spatial: SpatialGrid,
    ai: AiManager,
    clients: FxHashMap<ClientId, Client>,
    arena: EntityId,
    tick: u64,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        let mut registry = EntityRegistry::new(config.max_entities);
        let spatial = SpatialGrid::new(config.cell_size);

        // Arena singleton carrying the world bounds, visible to every view
        let arena = registry.create(EntityKind::Arena, 0);
        if let Some(group) = registry
            .get_mut(arena)
            .and_then(|e| e.group_mut(GroupId::Arena))
        {
            let half = config.arena_half_extent;
            group.write(arena_fields::LEFT, FieldValue::Float(-half));
            group.write(arena_fields::TOP, FieldValue::Float(-half));
            group.write(arena_fields::RIGHT, FieldValue::Float(half));
            group.write(arena_fields::BOTTOM, FieldValue::Float(half));
        }

        Self {
            config,
            registry,
            spatial,
            ai: AiManager::new(),
            clients: FxHashMap::default(),
            arena,
            tick: 0,
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn arena_entity(&self) -> EntityId {
        self.arena
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Register a connection and give it a camera entity. The client sees
    /// the arena immediately; a tank arrives once it sends a spawn request.
    pub fn connect(&mut self, client_id: ClientId) -> EntityId {
        let camera_id = self.registry.create(EntityKind::Camera, self.tick);
        self.clients.insert(
            client_id,
            Client {
                view: ClientView::new(camera_id),
                camera: camera_id,
                tank: NULL_ENTITY,
                input: InputState::default(),
                pending_spawn: None,
            },
        );
        debug!(client_id, camera = camera_id, "client connected");
        camera_id
    }

    /// Tear down a connection: its tank and camera die this tick
    pub fn disconnect(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };
        if client.tank != NULL_ENTITY {
            self.registry.mark_for_deletion(client.tank);
        }
        self.registry.mark_for_deletion(client.camera);
        debug!(client_id, "client disconnected");
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stage one raw client packet; decoded and applied between ticks.
    /// Malformed packets are dropped whole.
    pub fn stage_packet(&mut self, client_id: ClientId, bytes: &[u8]) {
        let Some(client) = self.clients.get_mut(&client_id) else {
            warn!(client_id, "packet from unknown client");
            return;
        };
        match decode_client_packet(bytes) {
            Ok(ClientCommand::Input { flags, mouse }) => client.input.apply(flags, mouse),
            Ok(ClientCommand::Spawn { name }) => client.pending_spawn = Some(name),
            Ok(ClientCommand::Ping) => {}
            Err(error) => {
                warn!(client_id, %error, len = bytes.len(), "dropping malformed packet");
            }
        }
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Spawn a player tank at a position, optionally on a team
    pub fn spawn_tank(&mut self, name: &str, at: Vec2, team: EntityId) -> EntityId {
        let id = self.registry.create(EntityKind::Tank, self.tick);
        if id == NULL_ENTITY {
            return NULL_ENTITY;
        }
        let Some(entity) = self.registry.get_mut(id) else {
            return NULL_ENTITY;
        };
        entity.set_position(at);
        if let Some(group) = entity.group_mut(GroupId::Physics) {
            group.write(physics_fields::SIZE, FieldValue::Float(TANK_SPAWN_SIZE));
        }
        if let Some(group) = entity.group_mut(GroupId::Name) {
            group.write(name_fields::NAME, FieldValue::Text(WireString::new(name)));
        }
        if team != NULL_ENTITY {
            if let Some(group) = entity.group_mut(GroupId::Relations) {
                group.write(relations::TEAM, FieldValue::Entity(team));
            }
        }
        self.refresh_spatial(id);
        id
    }

    /// Spawn an AI-driven tank with the default view range
    pub fn spawn_bot(&mut self, name: &str, at: Vec2, team: EntityId) -> EntityId {
        let id = self.spawn_tank(name, at, team);
        if id != NULL_ENTITY {
            self.ai
                .register(Ai::new(id).with_view_range(DEFAULT_VIEW_RANGE));
        }
        id
    }

    /// Spawn an inert polygon shape
    pub fn spawn_shape(&mut self, at: Vec2) -> EntityId {
        let id = self.registry.create(EntityKind::Shape, self.tick);
        if id != NULL_ENTITY {
            if let Some(entity) = self.registry.get_mut(id) {
                entity.set_position(at);
                if let Some(group) = entity.group_mut(GroupId::Physics) {
                    group.write(physics_fields::SIZE, FieldValue::Float(SHAPE_SPAWN_SIZE));
                }
            }
            self.refresh_spatial(id);
        }
        id
    }

    pub fn spawn_team(&mut self) -> EntityId {
        self.registry.create(EntityKind::Team, self.tick)
    }

    // ========================================================================
    // Tick pipeline
    // ========================================================================

    /// Advance one tick and return the update packet for every client
    /// with something to hear about
    pub fn tick(&mut self) -> Vec<(ClientId, Vec<u8>)> {
        self.apply_spawn_requests();
        self.apply_movement();

        physics::integrate(&mut self.registry, self.config.arena_half_extent);
        for id in self.registry.live_ids() {
            self.refresh_spatial(id);
        }
        physics::resolve_collisions(&mut self.registry, &self.spatial);
        self.ai.update(&self.registry, &self.spatial, self.tick);

        self.follow_cameras();
        let packets = self.synchronize_views();
        self.finalize_deletions();

        self.tick += 1;
        packets
    }

    /// Consume staged spawn requests for clients without a live tank
    fn apply_spawn_requests(&mut self) {
        let mut spawns: Vec<(ClientId, WireString)> = Vec::new();
        for (&client_id, client) in self.clients.iter_mut() {
            if client.tank != NULL_ENTITY && self.registry.exists(client.tank) {
                client.pending_spawn = None;
                continue;
            }
            if let Some(name) = client.pending_spawn.take() {
                spawns.push((client_id, name));
            }
        }
        for (client_id, name) in spawns {
            let tank = self.spawn_tank(name.as_str(), Vec2::ZERO, NULL_ENTITY);
            if tank == NULL_ENTITY {
                warn!(client_id, "spawn failed, registry full");
                continue;
            }
            let Some(client) = self.clients.get_mut(&client_id) else {
                continue;
            };
            client.tank = tank;
            if let Some(group) = self
                .registry
                .get_mut(client.camera)
                .and_then(|e| e.group_mut(GroupId::Camera))
            {
                group.write(camera::PLAYER, FieldValue::Entity(tank));
            }
            debug!(client_id, tank, "tank spawned");
        }
    }

    /// Turn client and AI input state into acceleration and aim
    fn apply_movement(&mut self) {
        let mut moves: Vec<(EntityId, Vec2, Vec2)> = Vec::new();
        for client in self.clients.values() {
            if client.tank != NULL_ENTITY {
                moves.push((client.tank, client.input.movement, client.input.mouse));
            }
        }
        for ai in self.ai.iter() {
            moves.push((ai.owner, ai.inputs.movement, ai.inputs.mouse));
        }

        for (id, movement, mouse) in moves {
            if !self.registry.exists(id) {
                continue;
            }
            physics::accelerate(&mut self.registry, id, movement);
            if mouse != Vec2::ZERO {
                if let Some(group) = self
                    .registry
                    .get_mut(id)
                    .and_then(|e| e.group_mut(GroupId::Position))
                {
                    group.write(
                        crate::game::fields::position::ANGLE,
                        FieldValue::Double(mouse.angle() as f64),
                    );
                }
            }
        }
    }

    /// Update spatial membership from the entity's current footprint
    fn refresh_spatial(&mut self, id: EntityId) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        if !entity.has_group(GroupId::Position) {
            return;
        }
        let radius = entity.footprint();
        if radius <= 0.0 {
            return;
        }
        self.spatial.update(id, Aabb::square(entity.position(), radius));
    }

    /// Cameras track their player's tank
    fn follow_cameras(&mut self) {
        let mut follows: Vec<(EntityId, Vec2)> = Vec::new();
        for client in self.clients.values_mut() {
            if client.tank == NULL_ENTITY {
                continue;
            }
            match self.registry.get(client.tank) {
                Some(tank) if !tank.needs_delete => {
                    follows.push((client.camera, tank.position()));
                }
                _ => {
                    // Tank died; free the slot so a new spawn request works
                    client.tank = NULL_ENTITY;
                }
            }
        }
        for (camera_id, pos) in follows {
            if let Some(group) = self
                .registry
                .get_mut(camera_id)
                .and_then(|e| e.group_mut(GroupId::Camera))
            {
                group.write(camera::CAMERA_X, FieldValue::Float(pos.x));
                group.write(camera::CAMERA_Y, FieldValue::Float(pos.y));
            }
        }
    }

    fn synchronize_views(&mut self) -> Vec<(ClientId, Vec<u8>)> {
        let always_visible = [self.arena];
        let mut packets = Vec::with_capacity(self.clients.len());
        for (&client_id, client) in self.clients.iter_mut() {
            let (bytes, _stats) = synchronize(
                &mut client.view,
                &self.registry,
                &self.spatial,
                &always_visible,
                self.tick,
            );
            if !bytes.is_empty() {
                packets.push((client_id, bytes));
            }
        }
        packets
    }

    /// Free staged deletions and evict every reference to the freed ids
    fn finalize_deletions(&mut self) {
        let freed = self.registry.finalize();
        if freed.is_empty() {
            return;
        }
        for &id in &freed {
            self.spatial.remove(id);
            self.ai.unregister(id);
            for client in self.clients.values_mut() {
                client.view.forget(id);
            }
        }
        self.ai.clear_targets_of(&freed);
        debug!(count = freed.len(), "entities finalized");
    }

    pub fn stats(&self) -> TickStats {
        TickStats {
            tick: self.tick,
            entities: self.registry.len(),
            clients: self.clients.len(),
        }
    }
}
