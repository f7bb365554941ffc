//! Entity registry and lifecycle
//!
//! Fixed-capacity slot table mapping integer ids to entities. Ids are
//! reused FIFO (lowest id freed longest ago) through a free list, but only
//! after `finalize`-time purging has removed every non-owning reference to
//! the old occupant. Deletion is staged: `mark_for_deletion` flags an
//! entity while leaving it observable for the rest of the tick, and the
//! simulation context frees the slot once all systems have run.

use std::collections::VecDeque;

use crate::game::fields::{
    relations, FieldGroup, FieldValue, GroupId, GROUP_COUNT,
};
use crate::util::vec2::Vec2;

/// Stable integer handle into the registry's slot table
pub type EntityId = u16;

/// Sentinel id: "no entity". Never occupies a slot.
pub const NULL_ENTITY: EntityId = u16::MAX;

// ============================================================================
// Entity kinds and capabilities
// ============================================================================

/// Closed set of entity kinds, resolved once at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityKind {
    Tank = 0,
    Projectile = 1,
    Shape = 2,
    Base = 3,
    Camera = 4,
    Arena = 5,
    Team = 6,
}

impl EntityKind {
    pub fn from_tag(tag: u8) -> Option<EntityKind> {
        match tag {
            0 => Some(EntityKind::Tank),
            1 => Some(EntityKind::Projectile),
            2 => Some(EntityKind::Shape),
            3 => Some(EntityKind::Base),
            4 => Some(EntityKind::Camera),
            5 => Some(EntityKind::Arena),
            6 => Some(EntityKind::Team),
            _ => None,
        }
    }

    /// Field groups attached to entities of this kind
    pub fn groups(self) -> &'static [GroupId] {
        match self {
            EntityKind::Tank => &[
                GroupId::Relations,
                GroupId::Physics,
                GroupId::Health,
                GroupId::Name,
                GroupId::Position,
                GroupId::Style,
                GroupId::Score,
                GroupId::Barrel,
            ],
            EntityKind::Projectile => &[
                GroupId::Relations,
                GroupId::Physics,
                GroupId::Health,
                GroupId::Position,
                GroupId::Style,
            ],
            EntityKind::Shape => &[
                GroupId::Relations,
                GroupId::Physics,
                GroupId::Health,
                GroupId::Position,
                GroupId::Style,
                GroupId::Score,
            ],
            EntityKind::Base => &[
                GroupId::Relations,
                GroupId::Physics,
                GroupId::Health,
                GroupId::Position,
                GroupId::Style,
            ],
            EntityKind::Camera => &[GroupId::Camera],
            EntityKind::Arena => &[GroupId::Arena],
            EntityKind::Team => &[GroupId::Team],
        }
    }

    /// Capability bits cached on the entity so hot loops never re-inspect
    /// the kind or attached groups
    pub fn caps(self) -> u8 {
        match self {
            EntityKind::Tank => caps::LIVING | caps::TANK | caps::HAS_HEALTH,
            EntityKind::Projectile => caps::LIVING | caps::HAS_HEALTH,
            EntityKind::Shape => caps::LIVING | caps::HAS_HEALTH,
            EntityKind::Base => caps::LIVING | caps::BASE | caps::HAS_HEALTH,
            EntityKind::Camera | EntityKind::Arena | EntityKind::Team => 0,
        }
    }
}

/// Capability bits
pub mod caps {
    /// Participates in collision and target acquisition
    pub const LIVING: u8 = 1 << 0;
    /// Tank-type entity (preferred by AI targeting)
    pub const TANK: u8 = 1 << 1;
    /// Team base; excluded from target acquisition
    pub const BASE: u8 = 1 << 2;
    /// Carries a Health group
    pub const HAS_HEALTH: u8 = 1 << 3;
}

// ============================================================================
// Entity
// ============================================================================

/// A simulated object: id, kind, lifecycle flags and attached field groups
#[derive(Debug)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Cached capability bits (see [`caps`])
    pub caps: u8,
    /// Set at creation; cleared by `finalize` after the create tick
    pub needs_create: bool,
    /// Staged deletion flag; slot freed at `finalize`
    pub needs_delete: bool,
    /// Tick this entity was created on (also staggers AI search cost)
    pub creation_tick: u64,
    /// Server-internal velocity; not replicated, positions are
    pub velocity: Vec2,
    groups: [Option<FieldGroup>; GROUP_COUNT],
}

impl Entity {
    fn new(id: EntityId, kind: EntityKind, creation_tick: u64) -> Self {
        let mut groups: [Option<FieldGroup>; GROUP_COUNT] = std::array::from_fn(|_| None);
        for &gid in kind.groups() {
            groups[gid.index()] = Some(FieldGroup::new(gid));
        }
        Self {
            id,
            kind,
            caps: kind.caps(),
            needs_create: true,
            needs_delete: false,
            creation_tick,
            velocity: Vec2::ZERO,
            groups,
        }
    }

    #[inline]
    pub fn has_cap(&self, cap: u8) -> bool {
        self.caps & cap != 0
    }

    #[inline]
    pub fn has_group(&self, id: GroupId) -> bool {
        self.groups[id.index()].is_some()
    }

    #[inline]
    pub fn group(&self, id: GroupId) -> Option<&FieldGroup> {
        self.groups[id.index()].as_ref()
    }

    #[inline]
    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut FieldGroup> {
        self.groups[id.index()].as_mut()
    }

    /// Present groups in wire declaration order
    pub fn present_groups(&self) -> impl Iterator<Item = &FieldGroup> {
        self.groups.iter().filter_map(|g| g.as_ref())
    }

    // Convenience accessors for hot fields

    pub fn position(&self) -> Vec2 {
        match self.group(GroupId::Position) {
            Some(g) => Vec2::new(
                g.get(crate::game::fields::position::X).as_float(),
                g.get(crate::game::fields::position::Y).as_float(),
            ),
            None => Vec2::ZERO,
        }
    }

    pub fn set_position(&mut self, pos: Vec2) {
        if let Some(g) = self.group_mut(GroupId::Position) {
            g.write(crate::game::fields::position::X, FieldValue::Float(pos.x));
            g.write(crate::game::fields::position::Y, FieldValue::Float(pos.y));
        }
    }

    /// Non-owning parent reference (relative coordinates, destruction
    /// cascades); `NULL_ENTITY` when absent
    pub fn parent(&self) -> EntityId {
        self.group(GroupId::Relations)
            .map(|g| g.get(relations::PARENT).as_entity())
            .unwrap_or(NULL_ENTITY)
    }

    /// Non-owning owner reference; `NULL_ENTITY` when unowned
    pub fn owner(&self) -> EntityId {
        self.group(GroupId::Relations)
            .map(|g| g.get(relations::OWNER).as_entity())
            .unwrap_or(NULL_ENTITY)
    }

    /// Team reference; `NULL_ENTITY` means teamless (hostile to everyone)
    pub fn team(&self) -> EntityId {
        self.group(GroupId::Relations)
            .map(|g| g.get(relations::TEAM).as_entity())
            .unwrap_or(NULL_ENTITY)
    }

    /// Collision/targeting footprint radius; zero means intangible
    pub fn footprint(&self) -> f32 {
        self.group(GroupId::Physics)
            .map(|g| g.get(crate::game::fields::physics::SIZE).as_float())
            .unwrap_or(0.0)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Fixed-capacity entity slot table with FIFO id reuse
pub struct EntityRegistry {
    slots: Vec<Option<Entity>>,
    /// Ids freed by finalize, reused oldest-first
    free: VecDeque<EntityId>,
    /// Next never-used slot; fresh ids are preferred over reuse only until
    /// the table has been fully touched once
    high_water: usize,
    /// Entities staged for deletion this tick
    pending_delete: Vec<EntityId>,
    live_count: usize,
}

impl EntityRegistry {
    pub fn new(capacity: usize) -> Self {
        // The top id is the null sentinel; a slot there would alias it
        assert!(
            capacity < NULL_ENTITY as usize,
            "registry capacity {} would overlap the null id",
            capacity
        );
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            free: VecDeque::new(),
            high_water: 0,
            pending_delete: Vec::new(),
            live_count: 0,
        }
    }

    /// Allocate a slot and attach the field groups for `kind`.
    ///
    /// Returns `NULL_ENTITY` when the id space is exhausted; that is a
    /// capacity error logged here, and the simulation continues without
    /// the new entity.
    pub fn create(&mut self, kind: EntityKind, tick: u64) -> EntityId {
        let id = if let Some(id) = self.free.pop_front() {
            id
        } else if self.high_water < self.slots.len() {
            let id = self.high_water as EntityId;
            self.high_water += 1;
            id
        } else {
            tracing::error!(
                capacity = self.slots.len(),
                ?kind,
                "entity id space exhausted"
            );
            return NULL_ENTITY;
        };

        self.slots[id as usize] = Some(Entity::new(id, kind, tick));
        self.live_count += 1;
        id
    }

    /// True while the slot is occupied, including entities pending
    /// deletion this tick. Call sites that care about the dying state must
    /// check `needs_delete` explicitly.
    #[inline]
    pub fn exists(&self, id: EntityId) -> bool {
        self.slots
            .get(id as usize)
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(id as usize).and_then(|s| s.as_mut())
    }

    /// Stage an entity for deletion. The slot stays occupied (and
    /// `exists` stays true) until `finalize` so systems still iterating
    /// this tick observe a consistent "exists but dying" state.
    pub fn mark_for_deletion(&mut self, id: EntityId) {
        if let Some(entity) = self.get_mut(id) {
            if !entity.needs_delete {
                entity.needs_delete = true;
                self.pending_delete.push(id);
            }
        }
    }

    /// Ids staged for deletion this tick, in staging order
    pub fn pending_deletions(&self) -> &[EntityId] {
        &self.pending_delete
    }

    /// Free every staged slot and null any relations reference pointing at
    /// a freed id, then admit the ids to the free list. The simulation
    /// context is responsible for purging the spatial index and client
    /// views before calling this.
    pub fn finalize(&mut self) -> Vec<EntityId> {
        let freed = std::mem::take(&mut self.pending_delete);
        for &id in &freed {
            if self.slots[id as usize].take().is_some() {
                self.live_count -= 1;
            }
        }

        if !freed.is_empty() {
            self.purge_relation_links(&freed);
        }

        for slot in self.slots.iter_mut().flatten() {
            slot.needs_create = false;
        }

        for &id in &freed {
            self.free.push_back(id);
        }
        freed
    }

    /// Null parent/owner/team references to freed ids so no live relation
    /// survives id reuse
    fn purge_relation_links(&mut self, freed: &[EntityId]) {
        for slot in self.slots.iter_mut().flatten() {
            let Some(group) = slot.group_mut(GroupId::Relations) else {
                continue;
            };
            for idx in [relations::PARENT, relations::OWNER, relations::TEAM] {
                let referenced = group.get(idx).as_entity();
                if referenced != NULL_ENTITY && freed.contains(&referenced) {
                    group.write(idx, FieldValue::Entity(NULL_ENTITY));
                }
            }
        }
    }

    /// Resolve the effective root of a parent chain (relative-coordinate
    /// anchor). Hop-capped because relations are non-owning and may form
    /// cycles.
    pub fn resolve_root(&self, id: EntityId) -> EntityId {
        let mut current = id;
        for _ in 0..16 {
            let parent = match self.get(current) {
                Some(e) => e.parent(),
                None => return current,
            };
            if parent == NULL_ENTITY || !self.exists(parent) {
                return current;
            }
            current = parent;
        }
        current
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    /// Snapshot of live ids; lets callers mutate entities while walking
    pub fn live_ids(&self) -> Vec<EntityId> {
        self.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fields::position;

    #[test]
    fn test_create_attaches_kind_groups() {
        let mut registry = EntityRegistry::new(64);
        let id = registry.create(EntityKind::Tank, 0);
        let tank = registry.get(id).unwrap();

        assert!(tank.has_group(GroupId::Position));
        assert!(tank.has_group(GroupId::Barrel));
        assert!(!tank.has_group(GroupId::Camera));
        assert!(tank.needs_create);
        assert!(tank.has_cap(caps::TANK));
    }

    #[test]
    fn test_exists_during_staged_deletion() {
        let mut registry = EntityRegistry::new(64);
        let id = registry.create(EntityKind::Shape, 0);

        registry.mark_for_deletion(id);
        assert!(registry.exists(id), "staged entities still exist");
        assert!(registry.get(id).unwrap().needs_delete);

        registry.finalize();
        assert!(!registry.exists(id));
    }

    #[test]
    fn test_id_reuse_is_fifo() {
        let mut registry = EntityRegistry::new(64);
        let a = registry.create(EntityKind::Shape, 0);
        let b = registry.create(EntityKind::Shape, 0);

        registry.mark_for_deletion(a);
        registry.finalize();
        registry.mark_for_deletion(b);
        registry.finalize();

        // a was freed first, so a comes back first
        assert_eq!(registry.create(EntityKind::Shape, 1), a);
        assert_eq!(registry.create(EntityKind::Shape, 1), b);
    }

    #[test]
    fn test_capacity_exhaustion_returns_sentinel() {
        let mut registry = EntityRegistry::new(2);
        assert_ne!(registry.create(EntityKind::Shape, 0), NULL_ENTITY);
        assert_ne!(registry.create(EntityKind::Shape, 0), NULL_ENTITY);
        assert_eq!(registry.create(EntityKind::Shape, 0), NULL_ENTITY);
    }

    #[test]
    #[should_panic(expected = "overlap the null id")]
    fn test_capacity_overlapping_null_id_rejected() {
        EntityRegistry::new(NULL_ENTITY as usize);
    }

    #[test]
    fn test_finalize_purges_parent_links() {
        let mut registry = EntityRegistry::new(64);
        let parent = registry.create(EntityKind::Tank, 0);
        let child = registry.create(EntityKind::Projectile, 0);

        let group = registry
            .get_mut(child)
            .unwrap()
            .group_mut(GroupId::Relations)
            .unwrap();
        group.write(relations::PARENT, FieldValue::Entity(parent));
        group.write(relations::OWNER, FieldValue::Entity(parent));

        registry.mark_for_deletion(parent);
        registry.finalize();

        let child_ref = registry.get(child).unwrap();
        assert_eq!(child_ref.parent(), NULL_ENTITY);
        assert_eq!(child_ref.owner(), NULL_ENTITY);
    }

    #[test]
    fn test_finalize_clears_needs_create() {
        let mut registry = EntityRegistry::new(64);
        let id = registry.create(EntityKind::Tank, 0);
        registry.finalize();
        assert!(!registry.get(id).unwrap().needs_create);
    }

    #[test]
    fn test_resolve_root_follows_parent_chain() {
        let mut registry = EntityRegistry::new(64);
        let root = registry.create(EntityKind::Tank, 0);
        let mid = registry.create(EntityKind::Projectile, 0);
        let leaf = registry.create(EntityKind::Projectile, 0);

        registry
            .get_mut(mid)
            .unwrap()
            .group_mut(GroupId::Relations)
            .unwrap()
            .write(relations::PARENT, FieldValue::Entity(root));
        registry
            .get_mut(leaf)
            .unwrap()
            .group_mut(GroupId::Relations)
            .unwrap()
            .write(relations::PARENT, FieldValue::Entity(mid));

        assert_eq!(registry.resolve_root(leaf), root);
        assert_eq!(registry.resolve_root(root), root);
    }

    #[test]
    fn test_resolve_root_survives_cycles() {
        let mut registry = EntityRegistry::new(64);
        let a = registry.create(EntityKind::Tank, 0);
        let b = registry.create(EntityKind::Tank, 0);

        registry
            .get_mut(a)
            .unwrap()
            .group_mut(GroupId::Relations)
            .unwrap()
            .write(relations::PARENT, FieldValue::Entity(b));
        registry
            .get_mut(b)
            .unwrap()
            .group_mut(GroupId::Relations)
            .unwrap()
            .write(relations::PARENT, FieldValue::Entity(a));

        // Must terminate; which node it lands on is unspecified
        let root = registry.resolve_root(a);
        assert!(root == a || root == b);
    }

    #[test]
    fn test_position_accessor_round_trip() {
        let mut registry = EntityRegistry::new(64);
        let id = registry.create(EntityKind::Shape, 0);
        let entity = registry.get_mut(id).unwrap();

        entity.set_position(Vec2::new(12.0, -34.0));
        assert_eq!(entity.position(), Vec2::new(12.0, -34.0));

        let group = entity.group(GroupId::Position).unwrap();
        assert_eq!(group.get(position::X).as_float(), 12.0);
    }
}
