//! Per-client diff synchronization
//!
//! Each connected client owns a `ClientView`: the set of entities that
//! client currently knows about and, per field, the generation it last
//! observed. Every tick the synchronizer walks the entities visible to
//! the view (spatial query around the camera plus always-visible
//! singletons) and emits:
//!
//! - a deletion record for known entities that left visibility or were
//!   staged for deletion,
//! - a full creation record (every field of every present group) for
//!   newly visible entities,
//! - only the fields whose generation moved since this view last saw
//!   them for already-known entities.
//!
//! Within one entity record, groups and fields are emitted in schema
//! declaration order; the client decoder has no field names on the wire,
//! only position-encoded types. Two views observing the same entity may
//! carry different pending sets because they became visible at different
//! times.

use hashbrown::HashSet;
use rustc_hash::FxHashMap;

use crate::game::constants::view::{BASE_VIEW_HEIGHT, BASE_VIEW_WIDTH, VIEW_MARGIN};
use crate::game::fields::{camera, GroupId};
use crate::game::registry::{Entity, EntityId, EntityRegistry};
use crate::game::spatial::SpatialGrid;
use crate::net::codec::WireWriter;

/// Server packet tags
pub mod server_packets {
    /// Incremental state update (deletions, creations, field diffs)
    pub const UPDATE: u8 = 0x00;
}

/// Per-connection record of what the client has been told
pub struct ClientView {
    /// The client's own camera entity; always visible to this view
    pub camera: EntityId,
    /// Known entities and the per-field generations last sent, flattened
    /// over present groups in declaration order
    known: FxHashMap<EntityId, Vec<u64>>,
}

/// Per-sync emission counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub bytes: usize,
}

impl ClientView {
    pub fn new(camera: EntityId) -> Self {
        Self {
            camera,
            known: FxHashMap::default(),
        }
    }

    pub fn knows(&self, id: EntityId) -> bool {
        self.known.contains_key(&id)
    }

    /// Drop a known entity without emitting anything; used by finalize to
    /// evict references for views that did not synchronize this tick
    pub fn forget(&mut self, id: EntityId) {
        self.known.remove(&id);
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}

/// Per-field generations flattened over present groups in declaration order
fn flatten_generations(entity: &Entity) -> Vec<u64> {
    let mut gens = Vec::new();
    for group in entity.present_groups() {
        for idx in 0..group.len() {
            gens.push(group.generation(idx));
        }
    }
    gens
}

/// Visible rectangle half-extents for a camera entity
fn view_half_extents(registry: &EntityRegistry, camera_id: EntityId) -> Option<(f32, f32, f32, f32)> {
    let entity = registry.get(camera_id)?;
    let group = entity.group(GroupId::Camera)?;
    let fov = group.get(camera::FOV).as_float().max(0.05);
    let cx = group.get(camera::CAMERA_X).as_float();
    let cy = group.get(camera::CAMERA_Y).as_float();
    let half_w = (BASE_VIEW_WIDTH / fov) * 0.5 + VIEW_MARGIN;
    let half_h = (BASE_VIEW_HEIGHT / fov) * 0.5 + VIEW_MARGIN;
    Some((cx, cy, half_w, half_h))
}

/// Synchronize one view: compute visibility, emit the update packet, and
/// advance the view's observed generations. Returns an empty buffer when
/// the client is already up to date (the transport skips the flush).
pub fn synchronize(
    view: &mut ClientView,
    registry: &EntityRegistry,
    spatial: &SpatialGrid,
    always_visible: &[EntityId],
    tick: u64,
) -> (Vec<u8>, SyncStats) {
    let mut stats = SyncStats::default();

    // Visible set: spatial query around the camera plus singletons
    let mut visible: HashSet<EntityId> = HashSet::new();
    if let Some((cx, cy, half_w, half_h)) = view_half_extents(registry, view.camera) {
        for id in spatial.query(cx, cy, half_w, half_h) {
            visible.insert(id);
        }
    }
    visible.insert(view.camera);
    for &id in always_visible {
        visible.insert(id);
    }
    // Dying or already-freed entities are never visible
    visible.retain(|&id| {
        registry
            .get(id)
            .map(|e| !e.needs_delete)
            .unwrap_or(false)
    });

    // Deletions: known entities that are no longer visible
    let mut deletions: Vec<EntityId> = view
        .known
        .keys()
        .copied()
        .filter(|id| !visible.contains(id))
        .collect();
    deletions.sort_unstable(); // deterministic packet layout

    // Creations: visible entities this view has never seen
    let mut creations: Vec<EntityId> = visible
        .iter()
        .copied()
        .filter(|id| !view.knows(*id))
        .collect();
    creations.sort_unstable();

    // Updates: known, still-visible entities with at least one moved
    // generation
    let mut updates: Vec<EntityId> = Vec::new();
    for (&id, gens) in &view.known {
        if !visible.contains(&id) {
            continue;
        }
        let Some(entity) = registry.get(id) else {
            continue;
        };
        if flatten_generations(entity) != *gens {
            updates.push(id);
        }
    }
    updates.sort_unstable();

    if deletions.is_empty() && creations.is_empty() && updates.is_empty() {
        return (Vec::new(), stats);
    }

    let mut writer = WireWriter::with_capacity(256);
    writer.write_u8(server_packets::UPDATE);
    writer.write_varuint(tick);

    writer.write_varuint(deletions.len() as u64);
    for &id in &deletions {
        writer.write_entity(id);
        view.known.remove(&id);
        stats.deleted += 1;
    }

    writer.write_varuint(creations.len() as u64);
    for &id in &creations {
        // Visibility filter above guarantees existence
        let Some(entity) = registry.get(id) else {
            continue;
        };
        write_full_record(&mut writer, entity);
        view.known.insert(id, flatten_generations(entity));
        stats.created += 1;
    }

    writer.write_varuint(updates.len() as u64);
    for &id in &updates {
        let Some(entity) = registry.get(id) else {
            continue;
        };
        if let Some(gens) = view.known.get_mut(&id) {
            write_partial_record(&mut writer, entity, gens);
            stats.updated += 1;
        }
    }

    stats.bytes = writer.len();
    (writer.into_bytes(), stats)
}

/// Full creation record: id, kind, group presence mask, then every field
/// of every present group in declaration order
fn write_full_record(writer: &mut WireWriter, entity: &Entity) {
    writer.write_entity(entity.id);
    writer.write_varuint(entity.kind as u64);

    let mut group_bits: u64 = 0;
    for group in entity.present_groups() {
        group_bits |= group.id().bit();
    }
    writer.write_varuint(group_bits);

    for group in entity.present_groups() {
        let defs = group.id().fields();
        for idx in 0..group.len() {
            writer.write_value(defs[idx].ty, group.get(idx));
        }
    }
}

/// Partial record: id, mask of groups with dirty fields, then per group a
/// field mask and only the dirty values. Observed generations advance to
/// current as a side effect.
fn write_partial_record(writer: &mut WireWriter, entity: &Entity, gens: &mut [u64]) {
    writer.write_entity(entity.id);

    // First pass: which groups have at least one moved field
    let mut group_bits: u64 = 0;
    let mut offset = 0usize;
    for group in entity.present_groups() {
        for idx in 0..group.len() {
            if group.generation(idx) != gens[offset + idx] {
                group_bits |= group.id().bit();
            }
        }
        offset += group.len();
    }
    writer.write_varuint(group_bits);

    // Second pass: per dirty group, field mask then values
    offset = 0;
    for group in entity.present_groups() {
        if group_bits & group.id().bit() != 0 {
            let defs = group.id().fields();
            let mut field_bits: u64 = 0;
            for idx in 0..group.len() {
                if group.generation(idx) != gens[offset + idx] {
                    field_bits |= 1 << idx;
                }
            }
            writer.write_varuint(field_bits);
            for idx in 0..group.len() {
                if field_bits & (1 << idx) != 0 {
                    writer.write_value(defs[idx].ty, group.get(idx));
                    gens[offset + idx] = group.generation(idx);
                }
            }
        }
        offset += group.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fields::{position, FieldValue};
    use crate::game::registry::EntityKind;
    use crate::game::spatial::Aabb;
    use crate::net::codec::WireReader;
    use crate::util::vec2::Vec2;

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

        fn camera(&mut self, at: Vec2) -> EntityId {
            let id = self.registry.create(EntityKind::Camera, 0);
            let group = self
                .registry
                .get_mut(id)
                .unwrap()
                .group_mut(GroupId::Camera)
                .unwrap();
            group.write(camera::CAMERA_X, FieldValue::Float(at.x));
            group.write(camera::CAMERA_Y, FieldValue::Float(at.y));
            id
        }

        fn shape(&mut self, at: Vec2, size: f32) -> EntityId {
            let id = self.registry.create(EntityKind::Shape, 0);
            let entity = self.registry.get_mut(id).unwrap();
            entity.set_position(at);
            entity
                .group_mut(GroupId::Physics)
                .unwrap()
                .write(crate::game::fields::physics::SIZE, FieldValue::Float(size));
            self.spatial.update(id, Aabb::square(at, size));
            id
        }

        fn sync(&mut self, view: &mut ClientView, tick: u64) -> (Vec<u8>, SyncStats) {
            synchronize(view, &self.registry, &self.spatial, &[], tick)
        }
    }

    /// Parse the packet header and section counts
    fn parse_counts(bytes: &[u8]) -> (u64, u64, u64, u64) {
        let mut reader = WireReader::new(bytes);
        assert_eq!(reader.read_u8().unwrap(), server_packets::UPDATE);
        let tick = reader.read_varuint().unwrap();
        let deletes = reader.read_varuint().unwrap();
        for _ in 0..deletes {
            reader.read_entity().unwrap();
        }
        let creates = reader.read_varuint().unwrap();
        // Creates are not walked here; callers using this helper only
        // assert on counts for packets whose create section is empty
        (tick, deletes, creates, 0)
    }

    #[test]
    fn test_first_sync_emits_full_creation() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        let shape = h.shape(Vec2::new(100.0, 50.0), 25.0);
        let mut view = ClientView::new(cam);

        let (bytes, stats) = h.sync(&mut view, 1);
        assert!(!bytes.is_empty());
        assert_eq!(stats.created, 2); // camera + shape
        assert_eq!(stats.updated, 0);
        assert!(view.knows(cam));
        assert!(view.knows(shape));
    }

    #[test]
    fn test_no_change_emits_zero_bytes() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        h.shape(Vec2::new(100.0, 50.0), 25.0);
        let mut view = ClientView::new(cam);

        h.sync(&mut view, 1);
        let (bytes, stats) = h.sync(&mut view, 2);
        assert!(bytes.is_empty(), "clean tick must emit nothing");
        assert_eq!(stats, SyncStats::default());
    }

    #[test]
    fn test_single_field_change_emits_only_that_field() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        let shape = h.shape(Vec2::new(100.0, 50.0), 25.0);
        let mut view = ClientView::new(cam);
        h.sync(&mut view, 1);

        h.registry
            .get_mut(shape)
            .unwrap()
            .group_mut(GroupId::Position)
            .unwrap()
            .write(position::X, FieldValue::Float(130.0));

        let (bytes, stats) = h.sync(&mut view, 2);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.created, 0);

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), server_packets::UPDATE);
        assert_eq!(reader.read_varuint().unwrap(), 2); // tick
        assert_eq!(reader.read_varuint().unwrap(), 0); // deletions
        assert_eq!(reader.read_varuint().unwrap(), 0); // creations
        assert_eq!(reader.read_varuint().unwrap(), 1); // updates
        assert_eq!(reader.read_entity().unwrap(), shape);
        assert_eq!(
            reader.read_varuint().unwrap(),
            GroupId::Position.bit(),
            "only the position group is dirty"
        );
        assert_eq!(
            reader.read_varuint().unwrap(),
            1 << position::X,
            "only the x field is dirty"
        );
        assert_eq!(reader.read_float().unwrap(), 130.0);
        assert!(reader.expect_end().is_ok());
    }

    #[test]
    fn test_new_visibility_sends_full_state_regardless_of_generations() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        // Spawn far outside the view, mutate it repeatedly, then move in
        let shape = h.shape(Vec2::new(50_000.0, 0.0), 25.0);
        let mut view = ClientView::new(cam);
        h.sync(&mut view, 1);
        assert!(!view.knows(shape));

        for step in 0..5 {
            h.registry
                .get_mut(shape)
                .unwrap()
                .group_mut(GroupId::Position)
                .unwrap()
                .write(position::X, FieldValue::Float(49_000.0 - step as f32));
        }
        // Move into view
        h.registry
            .get_mut(shape)
            .unwrap()
            .set_position(Vec2::new(200.0, 0.0));
        h.spatial
            .update(shape, Aabb::square(Vec2::new(200.0, 0.0), 25.0));

        let (bytes, stats) = h.sync(&mut view, 2);
        assert_eq!(stats.created, 1);
        assert!(view.knows(shape));

        // The creation record carries every field: decode it back against
        // the schema and compare to a freshly emitted full record
        let mut expected = WireWriter::new();
        write_full_record(&mut expected, h.registry.get(shape).unwrap());

        let mut reader = WireReader::new(&bytes);
        reader.read_u8().unwrap();
        reader.read_varuint().unwrap(); // tick
        assert_eq!(reader.read_varuint().unwrap(), 0); // deletions
        assert_eq!(reader.read_varuint().unwrap(), 1); // creations
        let record = &bytes[reader.pos()..bytes.len() - 1]; // minus update count 0
        assert_eq!(record, expected.as_bytes());
    }

    #[test]
    fn test_leaving_visibility_emits_deletion() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        let shape = h.shape(Vec2::new(100.0, 0.0), 25.0);
        let mut view = ClientView::new(cam);
        h.sync(&mut view, 1);

        // Move the shape far away
        h.registry
            .get_mut(shape)
            .unwrap()
            .set_position(Vec2::new(50_000.0, 0.0));
        h.spatial
            .update(shape, Aabb::square(Vec2::new(50_000.0, 0.0), 25.0));

        let (bytes, stats) = h.sync(&mut view, 2);
        assert_eq!(stats.deleted, 1);
        assert!(!view.knows(shape));

        let (_, deletes, _, _) = parse_counts(&bytes);
        assert_eq!(deletes, 1);
    }

    #[test]
    fn test_staged_deletion_emits_deletion_record() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        let shape = h.shape(Vec2::new(100.0, 0.0), 25.0);
        let mut view = ClientView::new(cam);
        h.sync(&mut view, 1);

        h.registry.mark_for_deletion(shape);
        let (_, stats) = h.sync(&mut view, 2);
        assert_eq!(stats.deleted, 1);
        assert!(!view.knows(shape));
    }

    #[test]
    fn test_per_view_dirty_sets_are_independent() {
        let mut h = Harness::new();
        let cam_a = h.camera(Vec2::ZERO);
        let cam_b = h.camera(Vec2::ZERO);
        let shape = h.shape(Vec2::new(100.0, 0.0), 25.0);

        let mut view_a = ClientView::new(cam_a);
        let mut view_b = ClientView::new(cam_b);

        // Only view A observes the entity, then it changes
        h.sync(&mut view_a, 1);
        h.registry
            .get_mut(shape)
            .unwrap()
            .group_mut(GroupId::Position)
            .unwrap()
            .write(position::X, FieldValue::Float(170.0));

        // View B first sees it now: full creation, not a diff
        let (_, stats_b) = h.sync(&mut view_b, 2);
        assert!(stats_b.created >= 1);
        assert_eq!(stats_b.updated, 0);

        // View A gets exactly the diff
        let (_, stats_a) = h.sync(&mut view_a, 2);
        assert_eq!(stats_a.updated, 1);
        assert_eq!(stats_a.created, 0);

        // Both views are now current; nothing further to send
        assert!(h.sync(&mut view_a, 3).0.is_empty());
        assert!(h.sync(&mut view_b, 3).0.is_empty());
    }

    #[test]
    fn test_always_visible_singletons_are_included() {
        let mut h = Harness::new();
        let cam = h.camera(Vec2::ZERO);
        let arena = h.registry.create(EntityKind::Arena, 0);
        let mut view = ClientView::new(cam);

        let (_, stats) = synchronize(&mut view, &h.registry, &h.spatial, &[arena], 1);
        assert_eq!(stats.created, 2);
        assert!(view.knows(arena));
    }
}
