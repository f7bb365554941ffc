//! AI target acquisition
//!
//! Every AI-driven entity owns an `Ai` record writing the same
//! `InputState` a connected client would, so entities cannot tell whether
//! a human or the AI is steering them. The controller is a small state
//! machine:
//!
//! - `Idle`: no target; the turret sweeps passively and a search runs on
//!   the entity's staggered tick.
//! - `HasTarget`: an acquired target is re-validated every tick with a
//!   widened escape radius, so a target can drift somewhat beyond view
//!   range before being dropped.
//! - `Possessed`: a client took over the entity; the AI writes nothing
//!   until the possessing input object is marked deleted.

use rustc_hash::FxHashMap;

use crate::game::constants::ai::{
    DEFAULT_VIEW_RANGE, PASSIVE_ROTATION, PASSIVE_SWEEP_RADIUS, SEARCH_INTERVAL, SEARCH_OFFSET,
};
use crate::game::registry::{caps, EntityId, EntityRegistry, NULL_ENTITY};
use crate::game::spatial::SpatialGrid;
use crate::net::input::InputState;
use crate::util::vec2::Vec2;

/// Extra per-entity target predicate (besides the built-in team, liveness
/// and ownership checks)
pub type TargetFilter = fn(&EntityRegistry, EntityId, EntityId) -> bool;

/// Multiplier applied to `view_range^2` when re-validating a held target.
/// Acquisition uses the plain squared range; dropping uses this wider
/// band so targets skirting the edge do not flicker.
const RETENTION_RANGE_SQ_SCALE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiState {
    Idle,
    HasTarget,
    Possessed,
}

/// One AI controller bound to an owner entity
pub struct Ai {
    pub state: AiState,
    pub owner: EntityId,
    pub target: Option<EntityId>,
    /// Acquisition radius in world units; `f32::INFINITY` scans the whole
    /// arena instead of the spatial grid
    pub view_range: f32,
    pub inputs: InputState,
    /// Angle of the idle turret sweep
    passive_angle: f32,
    filter: Option<TargetFilter>,
}

impl Ai {
    pub fn new(owner: EntityId) -> Self {
        Self {
            state: AiState::Idle,
            owner,
            target: None,
            view_range: DEFAULT_VIEW_RANGE,
            inputs: InputState::default(),
            passive_angle: 0.0,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: TargetFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_view_range(mut self, view_range: f32) -> Self {
        self.view_range = view_range;
        self
    }

    /// Hand control to a client; the AI stops writing inputs until the
    /// possessing input object is marked deleted
    pub fn possess(&mut self) {
        self.state = AiState::Possessed;
        self.target = None;
    }

    /// Whether `candidate` may be targeted by `owner` at all (liveness,
    /// ownership, team and caller filter; range is checked separately)
    fn targetable(&self, registry: &EntityRegistry, candidate: EntityId) -> bool {
        let Some(entity) = registry.get(candidate) else {
            return false;
        };
        if candidate == self.owner || entity.needs_delete {
            return false;
        }
        if !entity.has_cap(caps::LIVING) || entity.has_cap(caps::BASE) {
            return false;
        }
        // Drones and other owned projectiles are not worth shooting at
        if entity.owner() != NULL_ENTITY {
            return false;
        }
        if entity.footprint() <= 0.0 {
            return false;
        }
        if let Some(owner) = registry.get(self.owner) {
            let team = owner.team();
            if team != NULL_ENTITY && team == entity.team() {
                return false;
            }
        }
        match self.filter {
            Some(filter) => filter(registry, self.owner, candidate),
            None => true,
        }
    }

    /// Re-check a held target. Existence and team are enforced strictly;
    /// distance uses the widened retention band.
    fn target_still_valid(&self, registry: &EntityRegistry, target: EntityId) -> bool {
        if !self.targetable(registry, target) {
            return false;
        }
        let (Some(owner_pos), Some(target_pos)) =
            (root_position(registry, self.owner), entity_position(registry, target))
        else {
            return false;
        };
        if self.view_range.is_infinite() {
            return true;
        }
        owner_pos.distance_sq_to(target_pos)
            <= RETENTION_RANGE_SQ_SCALE * self.view_range * self.view_range
    }

    /// Scan for the best candidate: tanks beat everything else regardless
    /// of distance, nearest wins within a class
    fn find_target(
        &self,
        registry: &EntityRegistry,
        spatial: &SpatialGrid,
    ) -> Option<EntityId> {
        let origin = root_position(registry, self.owner)?;

        let candidates = if self.view_range.is_infinite() {
            registry.live_ids()
        } else {
            spatial.query(origin.x, origin.y, self.view_range, self.view_range)
        };

        let range_sq = self.view_range * self.view_range;
        let mut best: Option<(EntityId, f32, bool)> = None;
        for id in candidates {
            if !self.targetable(registry, id) {
                continue;
            }
            let Some(pos) = entity_position(registry, id) else {
                continue;
            };
            let dist_sq = origin.distance_sq_to(pos);
            if !self.view_range.is_infinite() && dist_sq > range_sq {
                continue;
            }
            let is_tank = registry
                .get(id)
                .map(|e| e.has_cap(caps::TANK))
                .unwrap_or(false);
            best = match best {
                None => Some((id, dist_sq, is_tank)),
                Some((_, best_dist, best_tank)) => {
                    let better = match (is_tank, best_tank) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => dist_sq < best_dist,
                    };
                    if better {
                        Some((id, dist_sq, is_tank))
                    } else {
                        best
                    }
                }
            };
        }
        best.map(|(id, _, _)| id)
    }

    /// Point the controlled entity at the target: mouse becomes the
    /// owner-to-target offset, movement the normalized pursuit direction
    fn aim_at(&mut self, registry: &EntityRegistry, target: EntityId) {
        let (Some(owner_pos), Some(target_pos)) =
            (root_position(registry, self.owner), entity_position(registry, target))
        else {
            return;
        };
        let offset = target_pos - owner_pos;
        self.inputs.mouse = offset;
        self.inputs.movement = offset.normalize();
    }

    /// Slow turret sweep while no target is held
    fn sweep(&mut self) {
        self.passive_angle += PASSIVE_ROTATION;
        self.inputs.mouse = Vec2::from_polar(self.passive_angle, PASSIVE_SWEEP_RADIUS);
        self.inputs.movement = Vec2::ZERO;
    }

    fn step(&mut self, registry: &EntityRegistry, spatial: &SpatialGrid, tick: u64) {
        if self.state == AiState::Possessed {
            if self.inputs.deleted {
                // The possessing client went away; resume with clean inputs
                self.inputs = InputState::default();
                self.state = AiState::Idle;
            } else {
                return;
            }
        }

        // Held target: re-validate every tick
        if let Some(target) = self.target {
            if self.target_still_valid(registry, target) {
                self.state = AiState::HasTarget;
                self.aim_at(registry, target);
                return;
            }
            self.target = None;
            self.state = AiState::Idle;
        }

        // Idle: search on this entity's staggered tick only
        let creation_tick = registry
            .get(self.owner)
            .map(|e| e.creation_tick)
            .unwrap_or(0);
        if (tick.wrapping_add(creation_tick)) % SEARCH_INTERVAL == SEARCH_OFFSET {
            if let Some(target) = self.find_target(registry, spatial) {
                self.target = Some(target);
                self.state = AiState::HasTarget;
                self.aim_at(registry, target);
                return;
            }
        }
        self.sweep();
    }
}

fn entity_position(registry: &EntityRegistry, id: EntityId) -> Option<Vec2> {
    registry.get(id).map(|e| e.position())
}

/// Position of the root of an entity's parent chain; turrets and drones
/// search from where their mount actually is
fn root_position(registry: &EntityRegistry, id: EntityId) -> Option<Vec2> {
    entity_position(registry, registry.resolve_root(id))
}

/// All AI controllers, keyed by owner entity
#[derive(Default)]
pub struct AiManager {
    states: FxHashMap<EntityId, Ai>,
}

impl AiManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ai: Ai) {
        self.states.insert(ai.owner, ai);
    }

    pub fn unregister(&mut self, owner: EntityId) -> Option<Ai> {
        self.states.remove(&owner)
    }

    pub fn get(&self, owner: EntityId) -> Option<&Ai> {
        self.states.get(&owner)
    }

    pub fn get_mut(&mut self, owner: EntityId) -> Option<&mut Ai> {
        self.states.get_mut(&owner)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ai> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop any held target that was freed this tick so reused ids are
    /// never chased by a stale controller
    pub fn clear_targets_of(&mut self, freed: &[EntityId]) {
        for ai in self.states.values_mut() {
            if let Some(target) = ai.target {
                if freed.contains(&target) {
                    ai.target = None;
                    if ai.state == AiState::HasTarget {
                        ai.state = AiState::Idle;
                    }
                }
            }
        }
    }

    /// Run every controller for one tick
    pub fn update(&mut self, registry: &EntityRegistry, spatial: &SpatialGrid, tick: u64) {
        for ai in self.states.values_mut() {
            ai.step(registry, spatial, tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fields::{relations, FieldValue, GroupId};
    use crate::game::registry::EntityKind;
    use crate::game::spatial::Aabb;

    struct Harness {
        registry: EntityRegistry,
        spatial: SpatialGrid,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: EntityRegistry::new(256),
                spatial: SpatialGrid::default(),
            }
        }

        fn spawn(&mut self, kind: EntityKind, at: Vec2, team: EntityId) -> EntityId {
            let id = self.registry.create(kind, 0);
            let entity = self.registry.get_mut(id).unwrap();
            entity.set_position(at);
            entity
                .group_mut(GroupId::Physics)
                .unwrap()
                .write(crate::game::fields::physics::SIZE, FieldValue::Float(25.0));
            if team != NULL_ENTITY {
                entity
                    .group_mut(GroupId::Relations)
                    .unwrap()
                    .write(relations::TEAM, FieldValue::Entity(team));
            }
            self.spatial.update(id, Aabb::square(at, 25.0));
            id
        }

        fn tank(&mut self, at: Vec2, team: EntityId) -> EntityId {
            self.spawn(EntityKind::Tank, at, team)
        }

        fn shape(&mut self, at: Vec2) -> EntityId {
            self.spawn(EntityKind::Shape, at, NULL_ENTITY)
        }
    }

    fn run_search(h: &Harness, ai: &mut Ai) {
        // SEARCH_OFFSET with creation_tick 0 guarantees the gate opens
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET);
    }

    #[test]
    fn test_tank_preferred_over_closer_shape() {
        let mut h = Harness::new();
        let team_a = h.registry.create(EntityKind::Team, 0);
        let hunter = h.tank(Vec2::ZERO, team_a);
        h.shape(Vec2::new(10.0, 0.0));
        let far_tank = h.tank(Vec2::new(500.0, 0.0), NULL_ENTITY);

        let mut ai = Ai::new(hunter);
        run_search(&h, &mut ai);
        assert_eq!(ai.state, AiState::HasTarget);
        assert_eq!(ai.target, Some(far_tank), "tank at 500 beats shape at 10");
    }

    #[test]
    fn test_nearest_wins_within_class() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        h.shape(Vec2::new(400.0, 0.0));
        let near = h.shape(Vec2::new(60.0, 0.0));

        let mut ai = Ai::new(hunter);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, Some(near));
    }

    #[test]
    fn test_two_team_scenario_with_aim() {
        let mut h = Harness::new();
        let team_a = h.registry.create(EntityKind::Team, 0);
        let team_b = h.registry.create(EntityKind::Team, 0);
        let hunter = h.tank(Vec2::new(0.0, 0.0), team_a);
        let prey = h.tank(Vec2::new(50.0, 0.0), team_b);
        // A teammate even closer must be ignored
        h.tank(Vec2::new(30.0, 0.0), team_a);

        let mut ai = Ai::new(hunter);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, Some(prey));
        // Mouse carries the owner-to-target offset, movement the pursuit
        assert_eq!(ai.inputs.mouse, Vec2::new(50.0, 0.0));
        assert!((ai.inputs.movement.length() - 1.0).abs() < 1e-5);
        assert!(ai.inputs.movement.x > 0.0);
    }

    #[test]
    fn test_same_team_never_targeted() {
        let mut h = Harness::new();
        let team = h.registry.create(EntityKind::Team, 0);
        let hunter = h.tank(Vec2::ZERO, team);
        h.tank(Vec2::new(50.0, 0.0), team);

        let mut ai = Ai::new(hunter);
        run_search(&h, &mut ai);
        assert_eq!(ai.state, AiState::Idle);
        assert_eq!(ai.target, None);
    }

    #[test]
    fn test_retention_band_wider_than_acquisition() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        let prey = h.tank(Vec2::new(100.0, 0.0), NULL_ENTITY);
        let mut ai = Ai::new(hunter).with_view_range(1000.0);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, Some(prey));

        // Beyond view range but inside sqrt(2) * range: still held
        let drifted = Vec2::new(1300.0, 0.0);
        h.registry.get_mut(prey).unwrap().set_position(drifted);
        h.spatial.update(prey, Aabb::square(drifted, 25.0));
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET + 1);
        assert_eq!(ai.target, Some(prey));

        // Beyond the retention band: dropped
        let escaped = Vec2::new(1500.0, 0.0);
        h.registry.get_mut(prey).unwrap().set_position(escaped);
        h.spatial.update(prey, Aabb::square(escaped, 25.0));
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET + 1);
        assert_eq!(ai.target, None);
        assert_eq!(ai.state, AiState::Idle);
    }

    #[test]
    fn test_out_of_range_not_acquired() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        h.tank(Vec2::new(3000.0, 0.0), NULL_ENTITY);

        let mut ai = Ai::new(hunter).with_view_range(1000.0);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, None);
    }

    #[test]
    fn test_search_staggered_by_creation_tick() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        h.shape(Vec2::new(50.0, 0.0));

        let mut ai = Ai::new(hunter);
        // Off-phase tick: no search, turret sweeps instead
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET + 1);
        assert_eq!(ai.target, None);
        assert_ne!(ai.inputs.mouse, Vec2::ZERO);

        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET + SEARCH_INTERVAL);
        assert!(ai.target.is_some());
    }

    #[test]
    fn test_possession_pauses_ai_until_release() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        h.shape(Vec2::new(50.0, 0.0));

        let mut ai = Ai::new(hunter);
        ai.possess();
        ai.inputs.apply(0, Vec2::new(7.0, 7.0));
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET);
        // Possessed: inputs untouched, no target acquired
        assert_eq!(ai.inputs.mouse, Vec2::new(7.0, 7.0));
        assert_eq!(ai.target, None);

        // Client leaves; the AI resumes with fresh inputs and can search
        ai.inputs.deleted = true;
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET);
        assert!(!ai.inputs.deleted);
        assert!(ai.target.is_some());
    }

    #[test]
    fn test_staged_deletion_drops_target() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        let prey = h.shape(Vec2::new(50.0, 0.0));

        let mut ai = Ai::new(hunter);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, Some(prey));

        h.registry.mark_for_deletion(prey);
        ai.step(&h.registry, &h.spatial, SEARCH_OFFSET + 1);
        assert_eq!(ai.target, None);
    }

    #[test]
    fn test_clear_targets_of_freed_ids() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        let prey = h.shape(Vec2::new(50.0, 0.0));

        let mut manager = AiManager::new();
        manager.register(Ai::new(hunter));
        manager.update(&h.registry, &h.spatial, SEARCH_OFFSET);
        assert_eq!(manager.get(hunter).unwrap().target, Some(prey));

        manager.clear_targets_of(&[prey]);
        let ai = manager.get(hunter).unwrap();
        assert_eq!(ai.target, None);
        assert_eq!(ai.state, AiState::Idle);
    }

    #[test]
    fn test_infinite_view_range_scans_whole_arena() {
        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        let far = h.shape(Vec2::new(100_000.0, 0.0));

        let mut ai = Ai::new(hunter).with_view_range(f32::INFINITY);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, Some(far));
    }

    #[test]
    fn test_custom_filter_rejects_candidates() {
        fn only_tanks(registry: &EntityRegistry, _owner: EntityId, candidate: EntityId) -> bool {
            registry
                .get(candidate)
                .map(|e| e.has_cap(caps::TANK))
                .unwrap_or(false)
        }

        let mut h = Harness::new();
        let hunter = h.tank(Vec2::ZERO, NULL_ENTITY);
        h.shape(Vec2::new(30.0, 0.0));

        let mut ai = Ai::new(hunter).with_filter(only_tanks);
        run_search(&h, &mut ai);
        assert_eq!(ai.target, None);
    }
}
